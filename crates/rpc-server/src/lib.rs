//! Leaderboard RPC - JSON-RPC and WebSocket front end
//!
//! Exposes the leaderboard engine over the network:
//! - HTTP JSON-RPC: registerParticipant, claim, listParticipants, listHistory, etc.
//! - WebSocket: leaderboardSubscribe, leaderboardUnsubscribe

pub mod http_server;
pub mod methods;
pub mod ws_server;

use std::sync::Arc;

pub use http_server::HttpRpcServer;
pub use methods::{RpcContext, RpcError};
pub use ws_server::WebSocketServer;

use leaderboard_engine::Leaderboard;

/// RPC Server configuration
#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    /// HTTP RPC bind address
    pub http_addr: String,
    /// WebSocket bind address
    pub ws_addr: String,
    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8899".to_string(),
            ws_addr: "127.0.0.1:8900".to_string(),
            verbose: false,
        }
    }
}

/// Combined RPC server (HTTP + WebSocket)
pub struct RpcServer {
    config: RpcServerConfig,
    leaderboard: Arc<Leaderboard>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, leaderboard: Arc<Leaderboard>) -> Self {
        Self {
            config,
            leaderboard,
        }
    }

    /// Get the HTTP address
    pub fn http_addr(&self) -> &str {
        &self.config.http_addr
    }

    /// Get the WebSocket address
    pub fn ws_addr(&self) -> &str {
        &self.config.ws_addr
    }

    /// Serve both endpoints until one of them fails
    pub async fn run(self) -> anyhow::Result<()> {
        if self.config.verbose {
            tracing::info!(
                "Starting RPC endpoints: http={} ws={}",
                self.config.http_addr,
                self.config.ws_addr
            );
        }

        let context = Arc::new(RpcContext::new(self.leaderboard.clone()));
        let http = HttpRpcServer::new(context);
        let ws = WebSocketServer::new(self.leaderboard);

        tokio::try_join!(
            http.run(&self.config.http_addr),
            ws.run(&self.config.ws_addr)
        )?;
        Ok(())
    }
}
