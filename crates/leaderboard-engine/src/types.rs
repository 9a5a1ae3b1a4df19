//! Core leaderboard types shared by the engine, its observers and storage

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Ledger sequence number. The first committed claim has sequence 1;
/// sequence 0 means "no claims yet".
pub type Sequence = u64;

/// Stable participant identifier, assigned in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered leaderboard participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    /// Display name (trimmed, never empty)
    pub name: String,
    /// Points the participant started with
    pub initial_points: u64,
    /// Current total, always `initial_points` plus the sum of its claims
    pub total_points: u64,
    /// Registration time (unix millis)
    pub registered_at_ms: i64,
}

/// A committed claim. Immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub sequence: Sequence,
    pub participant_id: ParticipantId,
    /// Points awarded by this claim (always positive)
    pub points: u64,
    /// Participant total right after this claim was applied
    pub total_after: u64,
    /// Commit time (unix millis), non-decreasing along the ledger
    pub timestamp_ms: i64,
}

/// One row of a ranking snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// 1-based position in the snapshot
    pub rank: u32,
    pub participant: Participant,
}

/// Point-in-time ordering of every participant.
///
/// Entries are sorted by total points descending, ties broken by
/// registration order, so no two entries ever compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RankingSnapshot {
    /// Last ledger sequence reflected in this snapshot
    pub as_of_sequence: Sequence,
    pub entries: Vec<RankedEntry>,
}

impl RankingSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rank of a participant in this snapshot
    pub fn rank_of(&self, id: ParticipantId) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.participant.id == id)
            .map(|e| e.rank)
    }

    /// Look up a participant's entry
    pub fn entry(&self, id: ParticipantId) -> Option<&RankedEntry> {
        self.entries.iter().find(|e| e.participant.id == id)
    }

    /// The leading `n` entries
    pub fn top(&self, n: usize) -> &[RankedEntry] {
        &self.entries[..n.min(self.entries.len())]
    }

    /// `(id, total)` pairs in rank order
    pub fn standings(&self) -> Vec<(ParticipantId, u64)> {
        self.entries
            .iter()
            .map(|e| (e.participant.id, e.participant.total_points))
            .collect()
    }
}

/// Event pushed to subscribers after each committed claim
#[derive(Debug, Clone)]
pub struct LeaderboardUpdate {
    /// The claim that triggered this update
    pub record: ClaimRecord,
    /// Full ranking right after the claim
    pub snapshot: Arc<RankingSnapshot>,
}

impl LeaderboardUpdate {
    pub fn sequence(&self) -> Sequence {
        self.record.sequence
    }
}

/// Current unix time in milliseconds
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
