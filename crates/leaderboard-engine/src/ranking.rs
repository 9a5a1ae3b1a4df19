//! Ranking table - per-participant scores and their sorted order
//!
//! The table is not synchronized on its own. The engine keeps it behind the
//! same lock as the claim ledger so a reader never sees a score without the
//! record that produced it.

use crate::{
    error::{LeaderboardError, Result},
    types::{Participant, ParticipantId, RankedEntry, RankingSnapshot, Sequence},
};
use std::{cmp::Reverse, collections::HashMap, sync::Arc};

/// In-memory participant scores with a lazily sorted ranking
#[derive(Debug, Default)]
pub struct RankingTable {
    /// Participants in registration order
    participants: Vec<Participant>,
    /// Participant id -> position in `participants`
    index: HashMap<ParticipantId, usize>,
    /// Next id handed out by `register`
    next_id: u64,
    /// Last computed snapshot, dropped on every mutation
    cached: Option<Arc<RankingSnapshot>>,
}

impl RankingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            index: HashMap::new(),
            next_id: 1,
            cached: None,
        }
    }

    /// Register a new participant and return it
    pub fn register(&mut self, name: String, initial_points: u64, now_ms: i64) -> Participant {
        let participant = Participant {
            id: ParticipantId(self.next_id),
            name,
            initial_points,
            total_points: initial_points,
            registered_at_ms: now_ms,
        };
        self.next_id += 1;
        self.push(participant.clone());
        participant
    }

    /// Re-insert a previously registered participant (used on restore).
    ///
    /// Participants must be restored in registration order; the id must be
    /// greater than every id already present.
    pub fn restore(&mut self, participant: Participant) -> Result<()> {
        if participant.id.0 < self.next_id {
            return Err(LeaderboardError::InternalConsistency(format!(
                "participant {} restored out of registration order",
                participant.id
            )));
        }
        if participant.total_points < participant.initial_points {
            return Err(LeaderboardError::InternalConsistency(format!(
                "participant {} total {} below initial {}",
                participant.id, participant.total_points, participant.initial_points
            )));
        }
        self.next_id = participant.id.0 + 1;
        self.push(participant);
        Ok(())
    }

    fn push(&mut self, participant: Participant) {
        self.index.insert(participant.id, self.participants.len());
        self.participants.push(participant);
        self.cached = None;
    }

    /// Get a participant by id
    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.index.get(&id).map(|&i| &self.participants[i])
    }

    /// Check if a participant exists
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.index.contains_key(&id)
    }

    /// Add awarded points to a participant, returning the new total
    pub fn apply_claim(&mut self, id: ParticipantId, points: u64) -> Result<u64> {
        let &i = self.index.get(&id).ok_or(LeaderboardError::NotFound(id))?;
        let participant = &mut self.participants[i];

        let new_total = participant.total_points.checked_add(points).ok_or_else(|| {
            LeaderboardError::InternalConsistency(format!("total points overflow for {}", id))
        })?;
        participant.total_points = new_total;
        self.cached = None;

        Ok(new_total)
    }

    /// Sorted snapshot of all participants.
    ///
    /// The sort only runs when something changed since the last call.
    pub fn snapshot(&mut self, as_of_sequence: Sequence) -> Arc<RankingSnapshot> {
        if let Some(cached) = &self.cached {
            if cached.as_of_sequence == as_of_sequence {
                return cached.clone();
            }
        }

        let mut order: Vec<usize> = (0..self.participants.len()).collect();
        order.sort_unstable_by_key(|&i| (Reverse(self.participants[i].total_points), i));

        let entries = order
            .into_iter()
            .enumerate()
            .map(|(pos, i)| RankedEntry {
                rank: pos as u32 + 1,
                participant: self.participants[i].clone(),
            })
            .collect();

        let snapshot = Arc::new(RankingSnapshot {
            as_of_sequence,
            entries,
        });
        self.cached = Some(snapshot.clone());
        snapshot
    }

    /// Rank of a single participant, without building a full snapshot
    pub fn rank_of(&self, id: ParticipantId) -> Option<u32> {
        let &pos = self.index.get(&id)?;
        let total = self.participants[pos].total_points;

        let ahead = self
            .participants
            .iter()
            .enumerate()
            .filter(|(i, p)| p.total_points > total || (p.total_points == total && *i < pos))
            .count();

        Some(ahead as u32 + 1)
    }

    /// All participants in registration order
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Get participant count
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Check if table is empty
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(names: &[&str]) -> RankingTable {
        let mut table = RankingTable::new();
        for name in names {
            table.register(name.to_string(), 0, 0);
        }
        table
    }

    #[test]
    fn test_register_assigns_increasing_ids() {
        let table = table_with(&["alice", "bob"]);
        let ids: Vec<_> = table.participants().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![ParticipantId(1), ParticipantId(2)]);
    }

    #[test]
    fn test_ties_break_by_registration_order() {
        let mut table = table_with(&["a", "b", "c"]);
        table.apply_claim(ParticipantId(3), 5).unwrap();
        table.apply_claim(ParticipantId(1), 5).unwrap();

        let snapshot = table.snapshot(2);
        assert_eq!(
            snapshot.standings(),
            vec![(ParticipantId(1), 5), (ParticipantId(3), 5), (ParticipantId(2), 0)]
        );
        let ranks: Vec<u32> = snapshot.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_apply_claim_unknown_participant() {
        let mut table = table_with(&["a"]);
        assert_eq!(
            table.apply_claim(ParticipantId(42), 1),
            Err(LeaderboardError::NotFound(ParticipantId(42)))
        );
    }

    #[test]
    fn test_apply_claim_overflow_leaves_total() {
        let mut table = RankingTable::new();
        let p = table.register("max".into(), u64::MAX - 1, 0);
        assert!(matches!(
            table.apply_claim(p.id, 2),
            Err(LeaderboardError::InternalConsistency(_))
        ));
        assert_eq!(table.get(p.id).unwrap().total_points, u64::MAX - 1);
    }

    #[test]
    fn test_snapshot_cache_invalidated_by_claim() {
        let mut table = table_with(&["a", "b"]);
        let first = table.snapshot(0);
        let again = table.snapshot(0);
        assert!(Arc::ptr_eq(&first, &again));

        table.apply_claim(ParticipantId(2), 1).unwrap();
        let after = table.snapshot(1);
        assert!(!Arc::ptr_eq(&first, &after));
        assert_eq!(after.entries[0].participant.id, ParticipantId(2));
    }

    #[test]
    fn test_rank_of_matches_snapshot() {
        let mut table = table_with(&["a", "b", "c", "d"]);
        table.apply_claim(ParticipantId(2), 3).unwrap();
        table.apply_claim(ParticipantId(4), 3).unwrap();
        table.apply_claim(ParticipantId(1), 1).unwrap();

        let snapshot = table.snapshot(3);
        for p in table.participants() {
            assert_eq!(table.rank_of(p.id), snapshot.rank_of(p.id));
        }
    }

    #[test]
    fn test_restore_rejects_out_of_order() {
        let mut table = table_with(&["a", "b"]);
        let stale = table.get(ParticipantId(1)).unwrap().clone();
        assert!(table.restore(stale).is_err());
    }
}
