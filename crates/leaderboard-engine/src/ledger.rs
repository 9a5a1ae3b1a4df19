//! Claim ledger - ordered, append-only record of claims
//!
//! The same structure serves two roles:
//! - the authoritative ledger inside the engine, where `append` hands out
//!   gap-free sequence numbers;
//! - an observer's local cache, where `merge_remote` folds in records that
//!   arrive both from history polls and from pushed updates.

use crate::{
    error::{LeaderboardError, Result},
    types::{ClaimRecord, ParticipantId, Sequence},
};
use std::collections::{BTreeMap, HashMap};

/// Claim records keyed by sequence number
#[derive(Debug, Default, Clone)]
pub struct ClaimLedger {
    records: BTreeMap<Sequence, ClaimRecord>,
}

impl ClaimLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Rebuild an authoritative ledger from persisted records.
    ///
    /// Records must form the gap-free run `1..=n` once sorted.
    pub fn restore(records: impl IntoIterator<Item = ClaimRecord>) -> Result<Self> {
        let mut ledger = Self::new();
        for record in records {
            let sequence = record.sequence;
            if ledger.records.insert(sequence, record).is_some() {
                return Err(LeaderboardError::InternalConsistency(format!(
                    "duplicate claim sequence {}",
                    sequence
                )));
            }
        }

        if !ledger.is_contiguous() {
            return Err(LeaderboardError::InternalConsistency(
                "persisted claim ledger has gaps".to_string(),
            ));
        }

        Ok(ledger)
    }

    /// Append a new claim, assigning the next sequence number and a
    /// timestamp no earlier than the previous record's.
    pub fn append(
        &mut self,
        participant_id: ParticipantId,
        points: u64,
        total_after: u64,
        now_ms: i64,
    ) -> ClaimRecord {
        let (sequence, timestamp_ms) = match self.records.last_key_value() {
            Some((&last_seq, last)) => (last_seq + 1, now_ms.max(last.timestamp_ms)),
            None => (1, now_ms),
        };

        let record = ClaimRecord {
            sequence,
            participant_id,
            points,
            total_after,
            timestamp_ms,
        };
        self.records.insert(sequence, record.clone());
        record
    }

    /// Up to `limit` records, newest first.
    ///
    /// `before` is an exclusive sequence cursor: pass the lowest sequence of
    /// the previous page to continue paging backwards.
    pub fn history(&self, limit: usize, before: Option<Sequence>) -> Vec<ClaimRecord> {
        let upper = before.unwrap_or(Sequence::MAX);
        self.records
            .range(..upper)
            .rev()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Merge records received from elsewhere, skipping sequences already
    /// present. Returns how many records were new.
    pub fn merge_remote(&mut self, records: impl IntoIterator<Item = ClaimRecord>) -> usize {
        let mut inserted = 0;
        for record in records {
            if let std::collections::btree_map::Entry::Vacant(slot) =
                self.records.entry(record.sequence)
            {
                slot.insert(record);
                inserted += 1;
            }
        }
        inserted
    }

    /// Records with sequence greater than `after`, oldest first
    pub fn records_after(&self, after: Sequence) -> Vec<ClaimRecord> {
        self.records
            .range(after.saturating_add(1)..)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Get a record by sequence
    pub fn get(&self, sequence: Sequence) -> Option<&ClaimRecord> {
        self.records.get(&sequence)
    }

    /// Highest sequence in the ledger (0 when empty)
    pub fn last_sequence(&self) -> Sequence {
        self.records.last_key_value().map(|(&s, _)| s).unwrap_or(0)
    }

    /// Sum of awarded points per participant
    pub fn points_by_participant(&self) -> HashMap<ParticipantId, u64> {
        let mut sums: HashMap<ParticipantId, u64> = HashMap::new();
        for record in self.records.values() {
            *sums.entry(record.participant_id).or_default() += record.points;
        }
        sums
    }

    /// True when the sequences are exactly `1..=len`
    pub fn is_contiguous(&self) -> bool {
        self.records
            .keys()
            .enumerate()
            .all(|(i, &seq)| seq == i as Sequence + 1)
    }

    /// Iterate records oldest first
    pub fn iter(&self) -> impl Iterator<Item = &ClaimRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: Sequence, participant: u64, points: u64) -> ClaimRecord {
        ClaimRecord {
            sequence,
            participant_id: ParticipantId(participant),
            points,
            total_after: points,
            timestamp_ms: sequence as i64,
        }
    }

    #[test]
    fn test_append_assigns_gap_free_sequences() {
        let mut ledger = ClaimLedger::new();
        for i in 0..5 {
            let r = ledger.append(ParticipantId(1), 1, i + 1, 1_000);
            assert_eq!(r.sequence, i + 1);
        }
        assert!(ledger.is_contiguous());
        assert_eq!(ledger.last_sequence(), 5);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut ledger = ClaimLedger::new();
        ledger.append(ParticipantId(1), 1, 1, 5_000);
        let r = ledger.append(ParticipantId(1), 1, 2, 4_000);
        assert_eq!(r.timestamp_ms, 5_000);
    }

    #[test]
    fn test_history_pages_newest_first() {
        let mut ledger = ClaimLedger::new();
        for i in 1..=7 {
            ledger.append(ParticipantId(i), i, i, 0);
        }

        let page1 = ledger.history(3, None);
        let seqs: Vec<_> = page1.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![7, 6, 5]);

        let cursor = page1.last().map(|r| r.sequence);
        let page2: Vec<_> = ledger.history(3, cursor).iter().map(|r| r.sequence).collect();
        assert_eq!(page2, vec![4, 3, 2]);

        let page3: Vec<_> = ledger.history(3, Some(2)).iter().map(|r| r.sequence).collect();
        assert_eq!(page3, vec![1]);
    }

    #[test]
    fn test_merge_remote_is_idempotent() {
        let mut once = ClaimLedger::new();
        once.merge_remote(vec![record(1, 1, 3), record(2, 2, 4), record(3, 1, 1)]);

        let mut twice = ClaimLedger::new();
        assert_eq!(twice.merge_remote(vec![record(1, 1, 3), record(2, 2, 4)]), 2);
        assert_eq!(twice.merge_remote(vec![record(2, 2, 4), record(3, 1, 1)]), 1);
        assert_eq!(twice.merge_remote(vec![record(1, 1, 3), record(2, 2, 4), record(3, 1, 1)]), 0);

        let a: Vec<_> = once.iter().cloned().collect();
        let b: Vec<_> = twice.iter().cloned().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_restore_rejects_gaps() {
        let err = ClaimLedger::restore(vec![record(1, 1, 1), record(3, 1, 1)]).unwrap_err();
        assert!(matches!(err, LeaderboardError::InternalConsistency(_)));

        let ledger = ClaimLedger::restore(vec![record(2, 1, 1), record(1, 1, 1)]).unwrap();
        assert_eq!(ledger.last_sequence(), 2);
    }

    #[test]
    fn test_points_by_participant() {
        let mut ledger = ClaimLedger::new();
        ledger.append(ParticipantId(1), 10, 10, 0);
        ledger.append(ParticipantId(2), 20, 20, 0);
        ledger.append(ParticipantId(1), 5, 15, 0);

        let sums = ledger.points_by_participant();
        assert_eq!(sums[&ParticipantId(1)], 15);
        assert_eq!(sums[&ParticipantId(2)], 20);
        assert_eq!(ledger.records_after(1).len(), 2);
    }
}
