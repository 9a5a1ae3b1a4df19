//! Leaderboard engine errors

use crate::types::ParticipantId;
use thiserror::Error;

/// Errors surfaced by leaderboard operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaderboardError {
    /// Unknown participant on claim or lookup. Nothing was mutated.
    #[error("Participant not found: {0}")]
    NotFound(ParticipantId),

    /// Rejected input (e.g. an empty display name). Nothing was mutated.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The ranking table and the ledger disagree, or the award policy
    /// failed. A halted engine keeps returning this for every write.
    #[error("Internal consistency error: {0}")]
    InternalConsistency(String),
}

impl LeaderboardError {
    /// Whether the caller can fix the request and retry
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Validation(_))
    }
}

/// Failure reported by an award policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AwardError {
    #[error("Invalid award range: {min}..={max}")]
    InvalidRange { min: u64, max: u64 },

    #[error("Award source exhausted")]
    Exhausted,

    #[error("Award policy failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, LeaderboardError>;
