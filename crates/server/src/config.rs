//! Server Configuration

use anyhow::Context;
use leaderboard_engine::{
    LeaderboardConfig, DEFAULT_AWARD_MAX, DEFAULT_AWARD_MIN, DEFAULT_SUBSCRIBER_QUEUE,
    MAX_HISTORY_PAGE, MAX_NAME_LEN,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP RPC bind address
    pub rpc_addr: String,
    /// WebSocket bind address
    pub ws_addr: String,
    /// Data directory for persistent state
    pub data_dir: PathBuf,
    /// Seconds between saves (0 = only on shutdown)
    pub save_interval_secs: u64,
    /// Lowest award per claim
    pub award_min: u64,
    /// Highest award per claim
    pub award_max: u64,
    /// Per-subscriber update queue capacity
    pub subscriber_queue_capacity: usize,
    /// Longest accepted participant name
    pub max_name_len: usize,
    /// Largest history page served in one call
    pub max_history_page: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "127.0.0.1:8899".to_string(),
            ws_addr: "127.0.0.1:8900".to_string(),
            data_dir: PathBuf::from("./data"),
            save_interval_secs: 30,
            award_min: DEFAULT_AWARD_MIN,
            award_max: DEFAULT_AWARD_MAX,
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE,
            max_name_len: MAX_NAME_LEN,
            max_history_page: MAX_HISTORY_PAGE,
            log_level: "info".to_string(),
            verbose: false,
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Engine settings carried by this config
    pub fn engine_config(&self) -> LeaderboardConfig {
        LeaderboardConfig {
            max_name_len: self.max_name_len,
            subscriber_queue_capacity: self.subscriber_queue_capacity,
            max_history_page: self.max_history_page,
        }
    }
}
