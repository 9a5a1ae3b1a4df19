//! HTTP JSON-RPC Server
//!
//! Provides HTTP endpoint for JSON-RPC methods.

use crate::methods::{
    handle_claim, handle_get_health, handle_get_participant, handle_get_stats,
    handle_list_history, handle_list_participants, handle_register_participant, ClaimRequest,
    ListHistoryRequest, RegisterParticipantRequest, RpcContext, RpcError,
};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Default page size for listHistory when no limit is given
const DEFAULT_HISTORY_LIMIT: usize = 20;

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// HTTP RPC Server
pub struct HttpRpcServer {
    context: Arc<RpcContext>,
}

impl HttpRpcServer {
    /// Create a new HTTP RPC server
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser clients
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/", post(handle_rpc))
            .layer(cors)
            .with_state(self.context)
    }

    /// Run the server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP RPC server listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Handle JSON-RPC request
async fn handle_rpc(
    State(context): State<Arc<RpcContext>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let response = match dispatch_method(&context, &request.method, request.params) {
        Ok(value) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(value),
            error: None,
        },
        Err(e) => {
            if matches!(e, RpcError::InternalError(_)) {
                tracing::error!("RPC {} failed: {}", request.method, e);
            }
            JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: None,
                error: Some(JsonRpcError {
                    code: e.code(),
                    message: e.to_string(),
                }),
            }
        }
    };

    (StatusCode::OK, Json(response))
}

/// Dispatch to appropriate method handler
pub fn dispatch_method(ctx: &RpcContext, method: &str, params: Value) -> Result<Value, RpcError> {
    tracing::debug!("RPC method called: {}", method);
    let params: Vec<Value> = serde_json::from_value(params).unwrap_or_default();

    match method {
        "registerParticipant" => {
            let name = params
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| RpcError::InvalidParams("Missing name".to_string()))?;

            let response = handle_register_participant(
                ctx,
                RegisterParticipantRequest {
                    name: name.to_string(),
                },
            )?;
            to_value(response)
        }

        "claim" => {
            let participant_id = params
                .first()
                .and_then(|v| v.as_u64())
                .ok_or_else(|| RpcError::InvalidParams("Missing participant id".to_string()))?;

            let response = handle_claim(ctx, ClaimRequest { participant_id })?;
            to_value(response)
        }

        "listParticipants" => to_value(handle_list_participants(ctx)?),

        "listHistory" => {
            let limit = match params.first() {
                None | Some(Value::Null) => DEFAULT_HISTORY_LIMIT,
                Some(v) => v
                    .as_u64()
                    .ok_or_else(|| RpcError::InvalidParams("Invalid limit".to_string()))?
                    as usize,
            };
            let before = match params.get(1) {
                None | Some(Value::Null) => None,
                Some(v) => Some(
                    v.as_u64()
                        .ok_or_else(|| RpcError::InvalidParams("Invalid cursor".to_string()))?,
                ),
            };

            to_value(handle_list_history(ctx, ListHistoryRequest { limit, before })?)
        }

        "getParticipant" => {
            let id = params
                .first()
                .and_then(|v| v.as_u64())
                .ok_or_else(|| RpcError::InvalidParams("Missing participant id".to_string()))?;
            to_value(handle_get_participant(ctx, id)?)
        }

        "getStats" => to_value(handle_get_stats(ctx)?),

        "getHealth" => Ok(json!(handle_get_health(ctx)?)),

        "getVersion" => Ok(json!({
            "leaderboard-version": env!("CARGO_PKG_VERSION"),
        })),

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaderboard_engine::{Leaderboard, LeaderboardConfig, SequenceAward};

    fn context() -> RpcContext {
        RpcContext::new(Arc::new(Leaderboard::new(
            LeaderboardConfig::default(),
            Arc::new(SequenceAward::new([10, 20])),
        )))
    }

    #[test]
    fn test_dispatch_scenario() {
        let ctx = context();
        for name in ["A", "B", "C"] {
            dispatch_method(&ctx, "registerParticipant", json!([name])).unwrap();
        }

        dispatch_method(&ctx, "claim", json!([1])).unwrap();
        dispatch_method(&ctx, "claim", json!([2])).unwrap();

        let snapshot = dispatch_method(&ctx, "listParticipants", json!([])).unwrap();
        let order: Vec<_> = snapshot["participants"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| (p["name"].as_str().unwrap().to_string(), p["points"].as_u64().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![("B".to_string(), 20), ("A".to_string(), 10), ("C".to_string(), 0)]
        );

        let history = dispatch_method(&ctx, "listHistory", json!([2])).unwrap();
        let seqs: Vec<_> = history
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![2, 1]);
    }

    #[test]
    fn test_invalid_params_and_unknown_method() {
        let ctx = context();
        assert!(matches!(
            dispatch_method(&ctx, "claim", json!(["abc"])),
            Err(RpcError::InvalidParams(_))
        ));
        assert!(matches!(
            dispatch_method(&ctx, "listHistory", json!([-1])),
            Err(RpcError::InvalidParams(_))
        ));
        assert!(matches!(
            dispatch_method(&ctx, "nope", json!([])),
            Err(RpcError::MethodNotFound(_))
        ));
    }
}
