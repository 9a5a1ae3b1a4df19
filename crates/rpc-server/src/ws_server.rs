//! WebSocket Server
//!
//! Provides WebSocket endpoint for leaderboard subscriptions. Each
//! subscription first delivers its initial snapshot, then one notification
//! per committed claim. If the subscriber falls behind, the engine drops it
//! and the client receives `subscriptionFailed`; it must resubscribe to get
//! a fresh snapshot.

use crate::methods::{ClaimInfo, SnapshotInfo};
use futures::{SinkExt, StreamExt};
use leaderboard_engine::{
    Leaderboard, LeaderboardUpdate, Subscription, SubscriptionId, SubscriptionStatus,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Outbound messages buffered per connection
const OUTBOUND_CAPACITY: usize = 256;

/// WebSocket JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct WsJsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// WebSocket Server
pub struct WebSocketServer {
    leaderboard: Arc<Leaderboard>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(leaderboard: Arc<Leaderboard>) -> Self {
        Self { leaderboard }
    }

    /// Run the WebSocket server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("WebSocket server listening on {}", addr);

        while let Ok((stream, peer_addr)) = listener.accept().await {
            let leaderboard = self.leaderboard.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, leaderboard).await {
                    tracing::warn!("WebSocket connection error from {}: {}", peer_addr, e);
                }
            });
        }

        Ok(())
    }
}

/// Subscriptions owned by one connection
struct ConnectionSubscriptions {
    leaderboard: Arc<Leaderboard>,
    forwarders: HashMap<SubscriptionId, JoinHandle<()>>,
}

impl ConnectionSubscriptions {
    /// Stop forwarding `id`. False if it was unknown or already dropped by
    /// the engine.
    fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(handle) = self.forwarders.remove(&id) else {
            return false;
        };
        handle.abort();
        self.leaderboard.unsubscribe(id)
    }

    /// Forget forwarders whose subscription has already ended
    fn prune_finished(&mut self) {
        self.forwarders.retain(|_, handle| !handle.is_finished());
    }
}

impl Drop for ConnectionSubscriptions {
    fn drop(&mut self) {
        // Clean up subscriptions on disconnect
        for (id, handle) in self.forwarders.drain() {
            self.leaderboard.unsubscribe(id);
            handle.abort();
        }
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(stream: TcpStream, leaderboard: Arc<Leaderboard>) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Notifications from subscription forwarders
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let mut subscriptions = ConnectionSubscriptions {
        leaderboard: leaderboard.clone(),
        forwarders: HashMap::new(),
    };

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let Some(msg) = msg else { break };

                match msg? {
                    Message::Text(text) => {
                        let request: WsJsonRpcRequest = match serde_json::from_str(&text) {
                            Ok(req) => req,
                            Err(_) => {
                                let response = error_response(&Value::Null, -32700, "Parse error");
                                ws_sender.send(Message::Text(response.to_string())).await?;
                                continue;
                            }
                        };

                        let (response, snapshot) = handle_ws_method(&leaderboard, &request, &mut subscriptions, &out_tx);
                        ws_sender.send(Message::Text(response.to_string())).await?;
                        // Sent before the loop next drains forwarded updates
                        if let Some(snapshot) = snapshot {
                            ws_sender.send(Message::Text(snapshot.to_string())).await?;
                        }
                    }
                    Message::Ping(data) => ws_sender.send(Message::Pong(data)).await?,
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            Some(notification) = out_rx.recv() => {
                ws_sender.send(Message::Text(notification)).await?;
            }
        }
    }

    tracing::debug!(
        "WebSocket connection closed with {} active subscriptions",
        subscriptions.forwarders.len()
    );
    Ok(())
}

/// Handle WebSocket JSON-RPC method.
///
/// Returns the response and, for a new subscription, its initial snapshot
/// notification. Never waits on the outbound queue, which only the calling
/// connection loop drains.
fn handle_ws_method(
    leaderboard: &Arc<Leaderboard>,
    request: &WsJsonRpcRequest,
    subscriptions: &mut ConnectionSubscriptions,
    out_tx: &mpsc::Sender<String>,
) -> (Value, Option<Value>) {
    let params: Vec<Value> = serde_json::from_value(request.params.clone()).unwrap_or_default();

    match request.method.as_str() {
        "leaderboardSubscribe" => {
            let history_limit = params.first().and_then(|v| v.as_u64()).unwrap_or(0) as usize;

            subscriptions.prune_finished();

            let subscription = leaderboard.subscribe_with_history(history_limit);
            let sub_id = subscription.id();
            let snapshot = format_snapshot_notification(&subscription);

            let handle = tokio::spawn(forward_updates(subscription, out_tx.clone()));
            subscriptions.forwarders.insert(sub_id, handle);

            let response = json!({
                "jsonrpc": "2.0",
                "id": request.id,
                "result": sub_id
            });
            (response, Some(snapshot))
        }

        "leaderboardUnsubscribe" => {
            let response = match params.first().and_then(|v| v.as_u64()) {
                Some(id) => json!({
                    "jsonrpc": "2.0",
                    "id": request.id,
                    "result": subscriptions.remove(id)
                }),
                None => error_response(&request.id, -32602, "Missing subscription ID"),
            };
            (response, None)
        }

        _ => (
            error_response(&request.id, -32601, &format!("Method not found: {}", request.method)),
            None,
        ),
    }
}

/// Forward a subscription's updates to the connection until it ends
async fn forward_updates(mut subscription: Subscription, out_tx: mpsc::Sender<String>) {
    let sub_id = subscription.id();

    while let Some(update) = subscription.recv().await {
        let notification = format_update_notification(sub_id, &update).to_string();
        if out_tx.send(notification).await.is_err() {
            return;
        }
    }

    if subscription.status() == SubscriptionStatus::Failed {
        tracing::warn!("Subscription {} dropped for falling behind", sub_id);
        if out_tx
            .send(format_failed_notification(sub_id).to_string())
            .await
            .is_err()
        {
            tracing::debug!("Connection gone before subscription {} failure was sent", sub_id);
        }
    }
}

/// Create error response
fn error_response(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

/// Initial snapshot notification for a new subscription
pub fn format_snapshot_notification(subscription: &Subscription) -> Value {
    let history: Vec<ClaimInfo> = subscription
        .initial_history()
        .iter()
        .map(ClaimInfo::from)
        .collect();

    json!({
        "jsonrpc": "2.0",
        "method": "leaderboardSnapshot",
        "params": {
            "result": {
                "snapshot": SnapshotInfo::from(subscription.initial_snapshot().as_ref()),
                "history": history
            },
            "subscription": subscription.id()
        }
    })
}

/// Format a committed claim notification for WebSocket
pub fn format_update_notification(sub_id: SubscriptionId, update: &LeaderboardUpdate) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "leaderboardNotification",
        "params": {
            "result": {
                "record": ClaimInfo::from(&update.record),
                "snapshot": SnapshotInfo::from(update.snapshot.as_ref())
            },
            "subscription": sub_id
        }
    })
}

/// Tell the client its subscription was dropped and must be renewed
pub fn format_failed_notification(sub_id: SubscriptionId) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "subscriptionFailed",
        "params": {
            "subscription": sub_id,
            "reason": "subscriber fell behind; resubscribe for a fresh snapshot"
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaderboard_engine::{FixedAward, LeaderboardConfig};
    use std::time::Duration;

    fn subscribe_request(id: u64) -> WsJsonRpcRequest {
        WsJsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: json!(id),
            method: "leaderboardSubscribe".into(),
            params: json!([5]),
        }
    }

    fn unsubscribe_request(sub_id: u64) -> WsJsonRpcRequest {
        WsJsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: json!(2),
            method: "leaderboardUnsubscribe".into(),
            params: json!([sub_id]),
        }
    }

    fn connection(leaderboard: &Arc<Leaderboard>) -> ConnectionSubscriptions {
        ConnectionSubscriptions {
            leaderboard: leaderboard.clone(),
            forwarders: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_forwards_snapshot_then_updates() {
        let leaderboard = Arc::new(Leaderboard::new(
            LeaderboardConfig::default(),
            Arc::new(FixedAward(3)),
        ));
        let p = leaderboard.register_participant("alice").unwrap();

        let (out_tx, mut out_rx) = mpsc::channel(16);
        let mut subscriptions = connection(&leaderboard);

        let (response, snapshot) =
            handle_ws_method(&leaderboard, &subscribe_request(1), &mut subscriptions, &out_tx);
        let sub_id = response["result"].as_u64().unwrap();

        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot["method"], "leaderboardSnapshot");
        assert_eq!(snapshot["params"]["subscription"], sub_id);

        leaderboard.claim(p.id).unwrap();
        leaderboard.broadcaster().drain_pending();

        let update: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(update["method"], "leaderboardNotification");
        assert_eq!(update["params"]["result"]["record"]["points"], 3);
        assert_eq!(
            update["params"]["result"]["snapshot"]["participants"][0]["points"],
            3
        );

        assert!(subscriptions.remove(sub_id));
        assert_eq!(leaderboard.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn test_subscribe_with_full_outbound_queue_does_not_block() {
        let leaderboard = Arc::new(Leaderboard::new(
            LeaderboardConfig::default(),
            Arc::new(FixedAward(1)),
        ));
        leaderboard.register_participant("alice").unwrap();

        // Outbound queue already full and nobody draining it
        let (out_tx, _out_rx) = mpsc::channel(1);
        out_tx.try_send("pending".to_string()).unwrap();
        let mut subscriptions = connection(&leaderboard);

        let (response, snapshot) = tokio::time::timeout(Duration::from_secs(2), async {
            handle_ws_method(&leaderboard, &subscribe_request(1), &mut subscriptions, &out_tx)
        })
        .await
        .expect("subscribe blocked on the outbound queue");

        assert!(response["result"].as_u64().is_some());
        assert_eq!(snapshot.unwrap()["method"], "leaderboardSnapshot");
        assert_eq!(leaderboard.stats().subscribers, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_after_subscription_failed() {
        let config = LeaderboardConfig {
            subscriber_queue_capacity: 1,
            ..Default::default()
        };
        let leaderboard = Arc::new(Leaderboard::new(config, Arc::new(FixedAward(1))));
        let p = leaderboard.register_participant("alice").unwrap();

        let (out_tx, mut out_rx) = mpsc::channel(16);
        let mut subscriptions = connection(&leaderboard);
        let (response, _) =
            handle_ws_method(&leaderboard, &subscribe_request(1), &mut subscriptions, &out_tx);
        let sub_id = response["result"].as_u64().unwrap();

        // Forwarder has not run yet, so the second update overflows its queue
        leaderboard.claim(p.id).unwrap();
        leaderboard.claim(p.id).unwrap();
        leaderboard.broadcaster().drain_pending();
        assert_eq!(leaderboard.stats().subscribers, 0);

        let first: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["method"], "leaderboardNotification");
        let failed: Value = serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(failed["method"], "subscriptionFailed");
        assert_eq!(failed["params"]["subscription"], sub_id);

        let (response, _) = handle_ws_method(
            &leaderboard,
            &unsubscribe_request(sub_id),
            &mut subscriptions,
            &out_tx,
        );
        assert_eq!(response["result"], false);
        assert!(subscriptions.forwarders.is_empty());
    }

    #[test]
    fn test_failed_notification_shape() {
        let value = format_failed_notification(7);
        assert_eq!(value["method"], "subscriptionFailed");
        assert_eq!(value["params"]["subscription"], 7);
    }
}
