//! Update Broadcaster - fans committed claims out to subscribers
//!
//! The engine hands every committed update to an ordered feed while it still
//! holds its mutation lock, so the feed carries updates in commit order. The
//! dispatcher (`run`, or `drain_pending` for synchronous callers) takes
//! updates off the feed and pushes them to each subscriber's bounded queue
//! without ever touching the engine lock.
//!
//! A subscriber whose queue is full is dropped and its handle marked
//! `Failed`; it has to resubscribe and start again from a fresh snapshot.

use crate::types::{ClaimRecord, LeaderboardUpdate, RankingSnapshot, Sequence};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Subscription ID
pub type SubscriptionId = u64;

/// Lifecycle of a subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Receiving updates
    Active,
    /// Dropped by the broadcaster (queue overflow); resubscribe for a fresh snapshot
    Failed,
    /// Ended by `unsubscribe`
    Closed,
}

impl SubscriptionStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Failed,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Failed => 1,
            Self::Closed => 2,
        }
    }
}

/// Broadcaster-side state for one subscriber
struct Subscriber {
    sender: mpsc::Sender<LeaderboardUpdate>,
    /// Sequence already covered by the subscriber's initial snapshot
    after_sequence: Sequence,
    status: Arc<AtomicU8>,
}

/// Observer handle returned by `subscribe`
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    initial_snapshot: Arc<RankingSnapshot>,
    initial_history: Vec<ClaimRecord>,
    receiver: mpsc::Receiver<LeaderboardUpdate>,
    status: Arc<AtomicU8>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Ranking at the moment of subscription. Every update received later
    /// has a higher sequence than `initial_snapshot().as_of_sequence`.
    pub fn initial_snapshot(&self) -> &Arc<RankingSnapshot> {
        &self.initial_snapshot
    }

    /// History page taken together with the initial snapshot (newest first)
    pub fn initial_history(&self) -> &[ClaimRecord] {
        &self.initial_history
    }

    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Wait for the next update. Returns `None` once the subscription has
    /// ended and its queue is drained; check `status()` to tell why.
    pub async fn recv(&mut self) -> Option<LeaderboardUpdate> {
        self.receiver.recv().await
    }

    /// Next queued update, if any
    pub fn try_recv(&mut self) -> Option<LeaderboardUpdate> {
        self.receiver.try_recv().ok()
    }
}

/// Fans leaderboard updates out to subscribers
pub struct UpdateBroadcaster {
    /// Active subscribers by ID
    subscribers: DashMap<SubscriptionId, Subscriber>,
    /// Next subscription ID
    next_id: AtomicU64,
    /// Per-subscriber queue capacity
    capacity: usize,
    /// Ordered commit feed, written under the engine lock
    feed_tx: mpsc::UnboundedSender<LeaderboardUpdate>,
    feed_rx: Mutex<Option<mpsc::UnboundedReceiver<LeaderboardUpdate>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl UpdateBroadcaster {
    /// Create a broadcaster whose subscribers buffer up to `capacity` updates
    pub fn new(capacity: usize) -> Self {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            feed_tx,
            feed_rx: Mutex::new(Some(feed_rx)),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a subscriber whose view starts at `initial_snapshot`.
    ///
    /// The caller must hold the engine lock so that no update is committed
    /// between taking the snapshot and registering.
    pub(crate) fn register(
        &self,
        initial_snapshot: Arc<RankingSnapshot>,
        initial_history: Vec<ClaimRecord>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(self.capacity);
        let status = Arc::new(AtomicU8::new(SubscriptionStatus::Active.as_u8()));

        self.subscribers.insert(
            id,
            Subscriber {
                sender,
                after_sequence: initial_snapshot.as_of_sequence,
                status: status.clone(),
            },
        );

        tracing::debug!(
            "Created subscription {} at sequence {}",
            id,
            initial_snapshot.as_of_sequence
        );

        Subscription {
            id,
            initial_snapshot,
            initial_history,
            receiver,
            status,
        }
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        match self.subscribers.remove(&subscription_id) {
            Some((_, sub)) => {
                sub.status
                    .store(SubscriptionStatus::Closed.as_u8(), Ordering::Release);
                tracing::debug!("Removed subscription {}", subscription_id);
                true
            }
            None => false,
        }
    }

    /// Queue a committed update for fan-out. Never blocks.
    pub(crate) fn enqueue(&self, update: LeaderboardUpdate) {
        if self.feed_tx.send(update).is_err() {
            tracing::debug!("Update feed closed, dropping update");
        }
    }

    /// Deliver one update to every subscriber that has not seen it yet.
    /// Returns the number of subscribers it was delivered to.
    pub fn publish(&self, update: &LeaderboardUpdate) -> usize {
        let sequence = update.sequence();
        let mut delivered = 0;
        let mut failed = Vec::new();
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if sequence <= sub.after_sequence {
                continue;
            }

            match sub.sender.try_send(update.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => failed.push(*entry.key()),
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in failed {
            if let Some((_, sub)) = self.subscribers.remove(&id) {
                sub.status
                    .store(SubscriptionStatus::Failed.as_u8(), Ordering::Release);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Subscription {} fell behind at sequence {}, dropping it",
                    id,
                    sequence
                );
            }
        }

        for id in closed {
            if self.subscribers.remove(&id).is_some() {
                tracing::debug!("Subscription {} receiver gone, removed", id);
            }
        }

        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Publish everything currently waiting on the feed.
    ///
    /// For callers without a dispatcher task. Returns 0 once `run` owns the
    /// feed.
    pub fn drain_pending(&self) -> usize {
        let mut guard = self.feed_rx.lock();
        let Some(rx) = guard.as_mut() else {
            return 0;
        };

        let mut published = 0;
        while let Ok(update) = rx.try_recv() {
            self.publish(&update);
            published += 1;
        }
        published
    }

    /// Dispatcher loop: publish feed updates in commit order. The broadcaster
    /// keeps the feed sender alive, so this runs until its task is aborted.
    /// Only one dispatcher can run.
    pub async fn run(self: Arc<Self>) {
        let feed = self.feed_rx.lock().take();
        let Some(mut rx) = feed else {
            tracing::warn!("Update dispatcher already running");
            return;
        };

        tracing::info!("Update dispatcher started");

        while let Some(update) = rx.recv().await {
            let n = self.publish(&update);
            tracing::trace!("Published sequence {} to {} subscribers", update.sequence(), n);
        }
    }

    /// Get subscription count
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Check if a subscription exists
    pub fn has_subscription(&self, subscription_id: SubscriptionId) -> bool {
        self.subscribers.contains_key(&subscription_id)
    }

    /// Total deliveries and dropped subscribers so far
    pub fn delivery_stats(&self) -> (u64, u64) {
        (
            self.delivered.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
        )
    }
}

impl Default for UpdateBroadcaster {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SUBSCRIBER_QUEUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticipantId;

    fn update(sequence: Sequence) -> LeaderboardUpdate {
        LeaderboardUpdate {
            record: ClaimRecord {
                sequence,
                participant_id: ParticipantId(1),
                points: 1,
                total_after: sequence,
                timestamp_ms: 0,
            },
            snapshot: Arc::new(RankingSnapshot {
                as_of_sequence: sequence,
                entries: vec![],
            }),
        }
    }

    fn snapshot_at(sequence: Sequence) -> Arc<RankingSnapshot> {
        Arc::new(RankingSnapshot {
            as_of_sequence: sequence,
            entries: vec![],
        })
    }

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let broadcaster = UpdateBroadcaster::new(8);
        let mut sub = broadcaster.register(snapshot_at(0), vec![]);
        assert_eq!(sub.id(), 1);

        assert_eq!(broadcaster.publish(&update(1)), 1);

        let received = sub.recv().await.unwrap();
        assert_eq!(received.sequence(), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_runs_until_aborted() {
        let broadcaster = Arc::new(UpdateBroadcaster::new(8));
        let mut sub = broadcaster.register(snapshot_at(0), vec![]);
        let dispatcher = tokio::spawn(broadcaster.clone().run());

        broadcaster.enqueue(update(1));
        assert_eq!(sub.recv().await.unwrap().sequence(), 1);

        // Idle with no subscribers left, the loop keeps waiting on the feed
        broadcaster.unsubscribe(sub.id());
        tokio::task::yield_now().await;
        assert!(!dispatcher.is_finished());

        // A second dispatcher finds the feed taken and returns at once
        broadcaster.clone().run().await;
        assert_eq!(broadcaster.drain_pending(), 0);

        dispatcher.abort();
        assert!(dispatcher.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_skips_updates_covered_by_initial_snapshot() {
        let broadcaster = UpdateBroadcaster::new(8);
        let mut sub = broadcaster.register(snapshot_at(5), vec![]);

        broadcaster.publish(&update(4));
        broadcaster.publish(&update(5));
        broadcaster.publish(&update(6));

        assert_eq!(sub.try_recv().map(|u| u.sequence()), Some(6));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_fails_only_that_subscriber() {
        let broadcaster = UpdateBroadcaster::new(2);
        let slow = broadcaster.register(snapshot_at(0), vec![]);
        let mut fast = broadcaster.register(snapshot_at(0), vec![]);

        for seq in 1..=3 {
            broadcaster.publish(&update(seq));
            assert_eq!(fast.try_recv().map(|u| u.sequence()), Some(seq));
        }

        assert_eq!(slow.status(), SubscriptionStatus::Failed);
        assert!(!broadcaster.has_subscription(slow.id()));
        assert_eq!(fast.status(), SubscriptionStatus::Active);
        assert_eq!(broadcaster.delivery_stats().1, 1);
    }

    #[test]
    fn test_unsubscribe() {
        let broadcaster = UpdateBroadcaster::new(4);
        let sub = broadcaster.register(snapshot_at(0), vec![]);
        assert!(broadcaster.has_subscription(sub.id()));

        assert!(broadcaster.unsubscribe(sub.id()));
        assert!(!broadcaster.has_subscription(sub.id()));
        assert_eq!(sub.status(), SubscriptionStatus::Closed);
        assert!(!broadcaster.unsubscribe(sub.id()));
    }

    #[test]
    fn test_dropped_receiver_is_removed() {
        let broadcaster = UpdateBroadcaster::new(4);
        let sub = broadcaster.register(snapshot_at(0), vec![]);
        drop(sub);

        assert_eq!(broadcaster.publish(&update(1)), 0);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_drain_pending_preserves_feed_order() {
        let broadcaster = UpdateBroadcaster::new(16);
        let mut sub = broadcaster.register(snapshot_at(0), vec![]);

        for seq in 1..=4 {
            broadcaster.enqueue(update(seq));
        }
        assert_eq!(broadcaster.drain_pending(), 4);

        let seqs: Vec<_> = std::iter::from_fn(|| sub.try_recv().map(|u| u.sequence())).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }
}
