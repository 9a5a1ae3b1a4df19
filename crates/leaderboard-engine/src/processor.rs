//! Claim Processor - the leaderboard engine
//!
//! `Leaderboard` owns the ranking table and the claim ledger behind a single
//! mutex. Every write (registration, claim) and every consistent read
//! (snapshot, history, subscribe) goes through that one critical section,
//! which gives all claims a single total order.

use crate::{
    award::AwardPolicy,
    broadcaster::{Subscription, SubscriptionId, UpdateBroadcaster},
    error::{LeaderboardError, Result},
    ledger::ClaimLedger,
    ranking::RankingTable,
    types::{now_ms, ClaimRecord, LeaderboardUpdate, Participant, ParticipantId, RankingSnapshot, Sequence},
    LeaderboardConfig,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// State guarded by the engine lock
pub(crate) struct LeaderboardState {
    pub(crate) table: RankingTable,
    pub(crate) ledger: ClaimLedger,
}

/// Engine statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LeaderboardStats {
    pub participants: usize,
    pub claims: usize,
    pub last_sequence: Sequence,
    pub subscribers: usize,
    pub updates_delivered: u64,
    pub subscribers_dropped: u64,
    pub halted: bool,
}

/// The leaderboard engine
pub struct Leaderboard {
    state: Mutex<LeaderboardState>,
    policy: Arc<dyn AwardPolicy>,
    broadcaster: Arc<UpdateBroadcaster>,
    /// Set once an inconsistency is detected; all writes are refused after
    halted: AtomicBool,
    config: LeaderboardConfig,
}

impl Leaderboard {
    /// Create an empty leaderboard
    pub fn new(config: LeaderboardConfig, policy: Arc<dyn AwardPolicy>) -> Self {
        Self::from_parts(config, policy, RankingTable::new(), ClaimLedger::new())
    }

    pub(crate) fn from_parts(
        config: LeaderboardConfig,
        policy: Arc<dyn AwardPolicy>,
        table: RankingTable,
        ledger: ClaimLedger,
    ) -> Self {
        Self {
            state: Mutex::new(LeaderboardState { table, ledger }),
            policy,
            broadcaster: Arc::new(UpdateBroadcaster::new(config.subscriber_queue_capacity)),
            halted: AtomicBool::new(false),
            config,
        }
    }

    /// Broadcaster handle, e.g. to spawn its dispatcher:
    /// `tokio::spawn(leaderboard.broadcaster().run())`
    pub fn broadcaster(&self) -> Arc<UpdateBroadcaster> {
        self.broadcaster.clone()
    }

    pub fn config(&self) -> &LeaderboardConfig {
        &self.config
    }

    /// Register a participant starting at zero points
    pub fn register_participant(&self, name: &str) -> Result<Participant> {
        self.register_with_points(name, 0)
    }

    /// Register a participant with seeded starting points
    pub fn register_with_points(&self, name: &str, initial_points: u64) -> Result<Participant> {
        let name = self.validate_name(name)?;

        let mut state = self.state.lock();
        self.ensure_writable()?;
        let participant = state.table.register(name, initial_points, now_ms());
        drop(state);

        tracing::info!(
            "Registered participant {} ({}) with {} points",
            participant.id,
            participant.name,
            initial_points
        );
        Ok(participant)
    }

    fn validate_name(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LeaderboardError::Validation(
                "participant name must not be empty".to_string(),
            ));
        }
        if name.chars().count() > self.config.max_name_len {
            return Err(LeaderboardError::Validation(format!(
                "participant name longer than {} characters",
                self.config.max_name_len
            )));
        }
        Ok(name.to_string())
    }

    /// Claim points for a participant.
    ///
    /// The award is drawn first; the ledger append and the score update then
    /// happen under one lock acquisition, and the resulting update is queued
    /// for subscribers before the lock is released.
    pub fn claim(&self, participant_id: ParticipantId) -> Result<ClaimRecord> {
        let mut state = self.state.lock();
        // Halts are raised under this lock, so the check cannot go stale
        self.ensure_writable()?;

        let participant = state
            .table
            .get(participant_id)
            .ok_or(LeaderboardError::NotFound(participant_id))?;

        let points = self.policy.award(participant).map_err(|e| {
            tracing::error!("Award policy failed for {}: {}", participant_id, e);
            LeaderboardError::InternalConsistency(format!("award policy failed: {}", e))
        })?;
        if points == 0 {
            return Err(LeaderboardError::InternalConsistency(
                "award policy returned zero points".to_string(),
            ));
        }

        let total_after = participant.total_points.checked_add(points).ok_or_else(|| {
            LeaderboardError::InternalConsistency(format!(
                "claim of {} points would overflow total for {}",
                points, participant_id
            ))
        })?;

        // Nothing mutated before this point
        let record = state.ledger.append(participant_id, points, total_after, now_ms());

        match state.table.apply_claim(participant_id, points) {
            Ok(total) if total == total_after => {}
            Ok(total) => {
                return Err(self.halt(format!(
                    "claim {} recorded total {} but table holds {}",
                    record.sequence, total_after, total
                )))
            }
            Err(e) => {
                return Err(self.halt(format!(
                    "claim {} appended but table rejected it: {}",
                    record.sequence, e
                )))
            }
        }

        if self.broadcaster.has_subscribers() {
            let snapshot = state.table.snapshot(record.sequence);
            self.broadcaster.enqueue(LeaderboardUpdate {
                record: record.clone(),
                snapshot,
            });
        }
        drop(state);

        tracing::debug!(
            "Claim {}: participant {} +{} = {}",
            record.sequence,
            participant_id,
            points,
            total_after
        );

        Ok(record)
    }

    /// Current ranking of all participants
    pub fn snapshot(&self) -> Arc<RankingSnapshot> {
        let mut state = self.state.lock();
        let as_of = state.ledger.last_sequence();
        state.table.snapshot(as_of)
    }

    /// Up to `limit` claims, newest first, optionally before a sequence cursor
    pub fn history(&self, limit: usize, before: Option<Sequence>) -> Vec<ClaimRecord> {
        let limit = limit.min(self.config.max_history_page);
        self.state.lock().ledger.history(limit, before)
    }

    /// A participant together with its current rank
    pub fn participant(&self, id: ParticipantId) -> Result<(u32, Participant)> {
        let state = self.state.lock();
        let participant = state.table.get(id).ok_or(LeaderboardError::NotFound(id))?;
        let rank = state
            .table
            .rank_of(id)
            .ok_or(LeaderboardError::NotFound(id))?;
        Ok((rank, participant.clone()))
    }

    /// Subscribe to updates, starting from the current snapshot
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_history(0)
    }

    /// Subscribe and also receive the latest `history_limit` claims.
    ///
    /// Snapshot, history and registration are taken under the engine lock,
    /// so the first update delivered is exactly the next committed claim.
    pub fn subscribe_with_history(&self, history_limit: usize) -> Subscription {
        let limit = history_limit.min(self.config.max_history_page);
        let mut state = self.state.lock();
        let as_of = state.ledger.last_sequence();
        let snapshot = state.table.snapshot(as_of);
        let history = state.ledger.history(limit, None);
        self.broadcaster.register(snapshot, history)
    }

    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> bool {
        self.broadcaster.unsubscribe(subscription_id)
    }

    /// Verify that every participant's total equals its initial points plus
    /// the sum of its claims. A mismatch halts the engine.
    pub fn audit(&self) -> Result<()> {
        let state = self.state.lock();
        let sums = state.ledger.points_by_participant();

        for participant in state.table.participants() {
            let claimed = sums.get(&participant.id).copied().unwrap_or(0);
            if participant.initial_points.checked_add(claimed) != Some(participant.total_points) {
                return Err(self.halt(format!(
                    "participant {} total {} != initial {} + claimed {}",
                    participant.id, participant.total_points, participant.initial_points, claimed
                )));
            }
        }

        if let Some(orphan) = sums.keys().find(|id| !state.table.contains(**id)) {
            return Err(self.halt(format!("ledger references unknown participant {}", orphan)));
        }

        if !state.ledger.is_contiguous() {
            return Err(self.halt("claim ledger has sequence gaps".to_string()));
        }

        Ok(())
    }

    /// Engine statistics
    pub fn stats(&self) -> LeaderboardStats {
        let (participants, claims, last_sequence) = {
            let state = self.state.lock();
            (state.table.len(), state.ledger.len(), state.ledger.last_sequence())
        };
        let (updates_delivered, subscribers_dropped) = self.broadcaster.delivery_stats();

        LeaderboardStats {
            participants,
            claims,
            last_sequence,
            subscribers: self.broadcaster.subscriber_count(),
            updates_delivered,
            subscribers_dropped,
            halted: self.is_halted(),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Copy out participants and the claims after `since`, for persistence.
    /// Storage I/O happens on the copy, after the lock is released.
    pub(crate) fn export(&self, since: Sequence) -> (Vec<Participant>, Vec<ClaimRecord>, Sequence) {
        let state = self.state.lock();
        (
            state.table.participants().to_vec(),
            state.ledger.records_after(since),
            state.ledger.last_sequence(),
        )
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_halted() {
            return Err(LeaderboardError::InternalConsistency(
                "leaderboard halted after an inconsistency; operator intervention required"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn halt(&self, reason: String) -> LeaderboardError {
        self.halted.store(true, Ordering::SeqCst);
        tracing::error!("Leaderboard halted: {}", reason);
        LeaderboardError::InternalConsistency(reason)
    }
}
