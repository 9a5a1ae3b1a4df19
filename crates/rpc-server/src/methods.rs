//! RPC Methods - JSON-RPC method handlers
//!
//! Thin adapters between JSON-RPC requests and the leaderboard engine.

use leaderboard_engine::{
    ClaimRecord, Leaderboard, LeaderboardError, LeaderboardStats, Participant, ParticipantId,
    RankingSnapshot,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// RPC context shared across handlers
pub struct RpcContext {
    pub leaderboard: Arc<Leaderboard>,
}

impl RpcContext {
    pub fn new(leaderboard: Arc<Leaderboard>) -> Self {
        Self { leaderboard }
    }
}

// ============ Request/Response Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterParticipantRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub participant_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListHistoryRequest {
    pub limit: usize,
    #[serde(default)]
    pub before: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub id: u64,
    pub name: String,
    pub points: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub registered_at: i64,
}

impl ParticipantInfo {
    pub fn from_participant(participant: &Participant, rank: Option<u32>) -> Self {
        Self {
            id: participant.id.0,
            name: participant.name.clone(),
            points: participant.total_points,
            rank,
            registered_at: participant.registered_at_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimInfo {
    pub sequence: u64,
    pub participant_id: u64,
    pub points: u64,
    pub total_after: u64,
    pub timestamp: i64,
}

impl From<&ClaimRecord> for ClaimInfo {
    fn from(record: &ClaimRecord) -> Self {
        Self {
            sequence: record.sequence,
            participant_id: record.participant_id.0,
            points: record.points,
            total_after: record.total_after,
            timestamp: record.timestamp_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub as_of_sequence: u64,
    pub participants: Vec<ParticipantInfo>,
}

impl From<&RankingSnapshot> for SnapshotInfo {
    fn from(snapshot: &RankingSnapshot) -> Self {
        Self {
            as_of_sequence: snapshot.as_of_sequence,
            participants: snapshot
                .entries
                .iter()
                .map(|e| ParticipantInfo::from_participant(&e.participant, Some(e.rank)))
                .collect(),
        }
    }
}

// ============ RPC Handlers ============

/// Handle registerParticipant RPC method
pub fn handle_register_participant(
    ctx: &RpcContext,
    params: RegisterParticipantRequest,
) -> Result<ParticipantInfo, RpcError> {
    let participant = ctx.leaderboard.register_participant(&params.name)?;
    let (rank, participant) = ctx.leaderboard.participant(participant.id)?;
    Ok(ParticipantInfo::from_participant(&participant, Some(rank)))
}

/// Handle claim RPC method
pub fn handle_claim(ctx: &RpcContext, params: ClaimRequest) -> Result<ClaimInfo, RpcError> {
    let record = ctx.leaderboard.claim(ParticipantId(params.participant_id))?;
    Ok(ClaimInfo::from(&record))
}

/// Handle listParticipants RPC method
pub fn handle_list_participants(ctx: &RpcContext) -> Result<SnapshotInfo, RpcError> {
    Ok(SnapshotInfo::from(ctx.leaderboard.snapshot().as_ref()))
}

/// Handle listHistory RPC method
pub fn handle_list_history(
    ctx: &RpcContext,
    params: ListHistoryRequest,
) -> Result<Vec<ClaimInfo>, RpcError> {
    Ok(ctx
        .leaderboard
        .history(params.limit, params.before)
        .iter()
        .map(ClaimInfo::from)
        .collect())
}

/// Handle getParticipant RPC method
pub fn handle_get_participant(ctx: &RpcContext, id: u64) -> Result<ParticipantInfo, RpcError> {
    let (rank, participant) = ctx.leaderboard.participant(ParticipantId(id))?;
    Ok(ParticipantInfo::from_participant(&participant, Some(rank)))
}

/// Handle getStats RPC method
pub fn handle_get_stats(ctx: &RpcContext) -> Result<LeaderboardStats, RpcError> {
    Ok(ctx.leaderboard.stats())
}

/// Handle getHealth RPC method
pub fn handle_get_health(ctx: &RpcContext) -> Result<String, RpcError> {
    if ctx.leaderboard.is_halted() {
        return Err(RpcError::InternalError("leaderboard halted".to_string()));
    }
    Ok("ok".to_string())
}

// ============ Error Types ============

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
}

impl RpcError {
    /// JSON-RPC error code
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidParams(_) => -32602,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InternalError(_) => -32603,
            RpcError::NotFound(_) => -32001,
            RpcError::Validation(_) => -32002,
        }
    }
}

impl From<LeaderboardError> for RpcError {
    fn from(e: LeaderboardError) -> Self {
        match e {
            LeaderboardError::NotFound(id) => RpcError::NotFound(format!("participant {}", id)),
            LeaderboardError::Validation(msg) => RpcError::Validation(msg),
            LeaderboardError::InternalConsistency(msg) => RpcError::InternalError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaderboard_engine::{FixedAward, LeaderboardConfig};

    fn context() -> RpcContext {
        RpcContext::new(Arc::new(Leaderboard::new(
            LeaderboardConfig::default(),
            Arc::new(FixedAward(5)),
        )))
    }

    #[test]
    fn test_register_and_claim() {
        let ctx = context();
        let info = handle_register_participant(
            &ctx,
            RegisterParticipantRequest {
                name: "alice".into(),
            },
        )
        .unwrap();
        assert_eq!(info.rank, Some(1));

        let claim = handle_claim(&ctx, ClaimRequest { participant_id: info.id }).unwrap();
        assert_eq!(claim.points, 5);
        assert_eq!(claim.sequence, 1);

        let snapshot = handle_list_participants(&ctx).unwrap();
        assert_eq!(snapshot.as_of_sequence, 1);
        assert_eq!(snapshot.participants[0].points, 5);
    }

    #[test]
    fn test_errors_map_to_codes() {
        let ctx = context();
        let err = handle_claim(&ctx, ClaimRequest { participant_id: 77 }).unwrap_err();
        assert_eq!(err.code(), -32001);

        let err = handle_register_participant(&ctx, RegisterParticipantRequest { name: "".into() })
            .unwrap_err();
        assert_eq!(err.code(), -32002);
    }
}
