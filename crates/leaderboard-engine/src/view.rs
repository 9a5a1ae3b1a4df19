//! Observer-side leaderboard view
//!
//! An observer both receives pushed updates and polls history pages. The
//! view folds the two sources together: updates older than what it already
//! holds are ignored, and history records are merged by sequence number so
//! overlapping pages never duplicate a claim.

use crate::{
    broadcaster::Subscription,
    ledger::ClaimLedger,
    types::{ClaimRecord, LeaderboardUpdate, RankingSnapshot, Sequence},
};
use std::sync::Arc;

/// Locally reconciled copy of the leaderboard
#[derive(Debug, Clone)]
pub struct LeaderboardView {
    snapshot: Arc<RankingSnapshot>,
    ledger: ClaimLedger,
}

impl LeaderboardView {
    /// Start from a snapshot and an optional history page
    pub fn new(snapshot: Arc<RankingSnapshot>, history: impl IntoIterator<Item = ClaimRecord>) -> Self {
        let mut ledger = ClaimLedger::new();
        ledger.merge_remote(history);
        Self { snapshot, ledger }
    }

    /// Seed a view from a fresh subscription
    pub fn from_subscription(subscription: &Subscription) -> Self {
        Self::new(
            subscription.initial_snapshot().clone(),
            subscription.initial_history().iter().cloned(),
        )
    }

    /// Apply a pushed update. Returns `false` for updates the view already
    /// reflects.
    pub fn apply(&mut self, update: &LeaderboardUpdate) -> bool {
        if update.sequence() <= self.applied_sequence() {
            return false;
        }
        self.ledger.merge_remote([update.record.clone()]);
        self.snapshot = update.snapshot.clone();
        true
    }

    /// Merge a polled history page. Returns how many records were new.
    pub fn merge_history(&mut self, records: impl IntoIterator<Item = ClaimRecord>) -> usize {
        self.ledger.merge_remote(records)
    }

    /// Last sequence reflected by the ranking
    pub fn applied_sequence(&self) -> Sequence {
        self.snapshot.as_of_sequence
    }

    pub fn snapshot(&self) -> &Arc<RankingSnapshot> {
        &self.snapshot
    }

    /// Locally known claims, newest first
    pub fn history(&self, limit: usize) -> Vec<ClaimRecord> {
        self.ledger.history(limit, None)
    }

    /// Number of claims held locally
    pub fn known_claims(&self) -> usize {
        self.ledger.len()
    }
}
