//! Leaderboard Engine - ranking and claim processing core
//!
//! This crate provides the authoritative leaderboard state:
//! - Ranking table with deterministic tie-breaking
//! - Append-only claim ledger with cursor paging and deduplicated merge
//! - Atomic claim processing with a pluggable award policy
//! - Ordered real-time fan-out of ranking updates to subscribers
//! - Optional sled persistence

pub mod award;
pub mod broadcaster;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod processor;
pub mod ranking;
pub mod types;
pub mod view;


pub use award::{AwardPolicy, FixedAward, RandomAward, SequenceAward};
pub use broadcaster::{Subscription, SubscriptionId, SubscriptionStatus, UpdateBroadcaster};
pub use error::{AwardError, LeaderboardError};
pub use ledger::ClaimLedger;
pub use persistence::{
    LeaderboardMetadata, LeaderboardPersistence, LeaderboardRepository, PersistedState,
    PersistentStore,
};
pub use processor::{Leaderboard, LeaderboardStats};
pub use ranking::RankingTable;
pub use types::{
    ClaimRecord, LeaderboardUpdate, Participant, ParticipantId, RankedEntry, RankingSnapshot,
    Sequence,
};
pub use view::LeaderboardView;

/// Default lowest award per claim
pub const DEFAULT_AWARD_MIN: u64 = 1;

/// Default highest award per claim
pub const DEFAULT_AWARD_MAX: u64 = 10;

/// Updates a subscriber may have queued before it is dropped
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 64;

/// Longest accepted participant name, in characters
pub const MAX_NAME_LEN: usize = 32;

/// Largest history page served in one call
pub const MAX_HISTORY_PAGE: usize = 500;

/// Engine configuration
#[derive(Clone, Debug)]
pub struct LeaderboardConfig {
    /// Longest accepted participant name
    pub max_name_len: usize,
    /// Per-subscriber update queue capacity
    pub subscriber_queue_capacity: usize,
    /// Upper bound on `history` page size
    pub max_history_page: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            max_name_len: MAX_NAME_LEN,
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE,
            max_history_page: MAX_HISTORY_PAGE,
        }
    }
}
