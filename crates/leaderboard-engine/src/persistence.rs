//! Persistence Layer for Leaderboard State
//!
//! Uses sled embedded database to persist participants and the claim ledger
//! across restarts. The engine never touches storage while holding its lock:
//! `save_to` copies state out first, then writes.

use crate::{
    award::AwardPolicy,
    error::LeaderboardError,
    ledger::ClaimLedger,
    processor::Leaderboard,
    ranking::RankingTable,
    types::{ClaimRecord, Participant, ParticipantId, Sequence},
    LeaderboardConfig,
};
use serde::{Deserialize, Serialize};
use sled::{
    transaction::{ConflictableTransactionResult, TransactionError, TransactionalTree},
    Db, Transactional,
};
use std::{path::Path, sync::Arc};

/// Metadata about the persisted leaderboard
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaderboardMetadata {
    /// Highest claim sequence written
    pub last_sequence: Sequence,
    /// Participants stored
    pub participant_count: u64,
    /// Last save timestamp (unix seconds)
    pub last_save_ts: i64,
}

/// Everything needed to rebuild a leaderboard
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub participants: Vec<Participant>,
    pub claims: Vec<ClaimRecord>,
    pub metadata: Option<LeaderboardMetadata>,
}

/// Storage boundary for leaderboard state
pub trait LeaderboardRepository: Send + Sync {
    /// Upsert participants, append claim records and replace the metadata as
    /// one atomic commit. Participant totals are only ever stored together
    /// with the claims that produced them.
    fn save_batch(
        &self,
        participants: &[Participant],
        claims: &[ClaimRecord],
        metadata: &LeaderboardMetadata,
    ) -> anyhow::Result<()>;

    /// Load all stored state, participants by id and claims by sequence
    fn load(&self) -> anyhow::Result<PersistedState>;

    /// Flush all pending writes to durable storage
    fn flush(&self) -> anyhow::Result<()>;
}

/// Persistent storage for leaderboard state
pub struct PersistentStore {
    /// Sled database instance
    db: Db,
    /// Participants tree (key: id, big-endian)
    participants: sled::Tree,
    /// Claims tree (key: sequence, big-endian)
    claims: sled::Tree,
    /// Metadata tree
    metadata: sled::Tree,
}

impl PersistentStore {
    /// Open or create a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let participants = db.open_tree("participants")?;
        let claims = db.open_tree("claims")?;
        let metadata = db.open_tree("metadata")?;

        tracing::info!("Opened persistent store at {:?}", path.as_ref());

        Ok(Self {
            db,
            participants,
            claims,
            metadata,
        })
    }

    /// Get a participant
    pub fn get_participant(&self, id: ParticipantId) -> anyhow::Result<Option<Participant>> {
        match self.participants.get(id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get a claim record by sequence
    pub fn get_claim(&self, sequence: Sequence) -> anyhow::Result<Option<ClaimRecord>> {
        match self.claims.get(sequence.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Highest stored claim sequence (0 if none)
    pub fn last_sequence(&self) -> anyhow::Result<Sequence> {
        match self.claims.last()? {
            Some((key, _)) => {
                let arr: [u8; 8] = key
                    .as_ref()
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("Invalid claim key length"))?;
                Ok(Sequence::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// Load leaderboard metadata
    pub fn load_metadata(&self) -> anyhow::Result<Option<LeaderboardMetadata>> {
        match self.metadata.get("leaderboard")? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get the number of stored participants
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Get the number of stored claims
    pub fn claim_count(&self) -> usize {
        self.claims.len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) -> anyhow::Result<()> {
        self.participants.clear()?;
        self.claims.clear()?;
        self.metadata.clear()?;
        Ok(())
    }
}

impl LeaderboardRepository for PersistentStore {
    fn save_batch(
        &self,
        participants: &[Participant],
        claims: &[ClaimRecord],
        metadata: &LeaderboardMetadata,
    ) -> anyhow::Result<()> {
        let mut participant_batch = sled::Batch::default();
        for participant in participants {
            participant_batch.insert(
                participant.id.0.to_be_bytes().to_vec(),
                bincode::serialize(participant)?,
            );
        }

        let mut claim_batch = sled::Batch::default();
        for record in claims {
            claim_batch.insert(record.sequence.to_be_bytes().to_vec(), bincode::serialize(record)?);
        }

        let mut metadata_batch = sled::Batch::default();
        metadata_batch.insert("leaderboard", bincode::serialize(metadata)?);

        let commit = |(participants, claims, metadata): &(
            TransactionalTree,
            TransactionalTree,
            TransactionalTree,
        )|
         -> ConflictableTransactionResult<(), ()> {
            participants.apply_batch(&participant_batch)?;
            claims.apply_batch(&claim_batch)?;
            metadata.apply_batch(&metadata_batch)?;
            Ok(())
        };

        (&self.participants, &self.claims, &self.metadata)
            .transaction(commit)
            .map_err(|e: TransactionError<()>| {
                anyhow::anyhow!("Failed to commit leaderboard save: {:?}", e)
            })?;
        Ok(())
    }

    fn load(&self) -> anyhow::Result<PersistedState> {
        let mut participants = Vec::with_capacity(self.participants.len());
        for result in self.participants.iter() {
            let (_, value) = result?;
            participants.push(bincode::deserialize::<Participant>(&value)?);
        }

        let mut claims = Vec::with_capacity(self.claims.len());
        for result in self.claims.iter() {
            let (_, value) = result?;
            claims.push(bincode::deserialize::<ClaimRecord>(&value)?);
        }

        Ok(PersistedState {
            participants,
            claims,
            metadata: self.load_metadata()?,
        })
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// Extension trait to add persistence to Leaderboard
pub trait LeaderboardPersistence {
    /// Write participants and every claim after `since` to the repository.
    /// Returns the last sequence now persisted.
    fn save_to(&self, repo: &dyn LeaderboardRepository, since: Sequence) -> anyhow::Result<Sequence>;
}

impl LeaderboardPersistence for Leaderboard {
    fn save_to(&self, repo: &dyn LeaderboardRepository, since: Sequence) -> anyhow::Result<Sequence> {
        let (participants, claims, last_sequence) = self.export(since);

        let metadata = LeaderboardMetadata {
            last_sequence,
            participant_count: participants.len() as u64,
            last_save_ts: chrono::Utc::now().timestamp(),
        };
        repo.save_batch(&participants, &claims, &metadata)?;
        repo.flush()?;

        tracing::info!(
            "Saved {} participants and {} new claims (through sequence {})",
            participants.len(),
            claims.len(),
            last_sequence
        );

        Ok(last_sequence)
    }
}

impl Leaderboard {
    /// Rebuild a leaderboard from persisted state and audit it
    pub fn restore(
        config: LeaderboardConfig,
        policy: Arc<dyn AwardPolicy>,
        state: PersistedState,
    ) -> Result<Self, LeaderboardError> {
        let mut participants = state.participants;
        participants.sort_by_key(|p| p.id);

        let mut table = RankingTable::new();
        for participant in participants {
            table.restore(participant)?;
        }

        let ledger = ClaimLedger::restore(state.claims)?;

        if let Some(metadata) = &state.metadata {
            if metadata.last_sequence != ledger.last_sequence() {
                tracing::warn!(
                    "Metadata sequence {} differs from stored ledger sequence {}",
                    metadata.last_sequence,
                    ledger.last_sequence()
                );
            }
        }

        let claims = ledger.len();
        let leaderboard = Self::from_parts(config, policy, table, ledger);
        leaderboard.audit()?;

        tracing::info!(
            "Restored {} participants and {} claims",
            leaderboard.stats().participants,
            claims
        );

        Ok(leaderboard)
    }
}
