//! Leaderboard Server
//!
//! Main entry point for the leaderboard service.
//! State is persisted to disk and survives restarts.

use anyhow::Result;
use clap::Parser;
use leaderboard_engine::{
    Leaderboard, LeaderboardPersistence, LeaderboardRepository, PersistentStore, RandomAward,
};
use leaderboard_rpc::{RpcServer, RpcServerConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::ServerConfig;

/// Leaderboard ranking and claim service
#[derive(Parser, Debug)]
#[command(name = "leaderboard")]
#[command(about = "Real-time leaderboard with claim processing", long_about = None)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP RPC bind address
    #[arg(long)]
    rpc_addr: Option<String>,

    /// WebSocket bind address
    #[arg(long)]
    ws_addr: Option<String>,

    /// Data directory for persistent state
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Save state every N seconds (0 = only on shutdown)
    #[arg(long)]
    save_interval_secs: Option<u64>,

    /// Lowest award per claim
    #[arg(long)]
    award_min: Option<u64>,

    /// Highest award per claim
    #[arg(long)]
    award_max: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Resolve the effective config: file (or defaults) overridden by flags
    fn resolve(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(addr) = self.rpc_addr {
            config.rpc_addr = addr;
        }
        if let Some(addr) = self.ws_addr {
            config.ws_addr = addr;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(secs) = self.save_interval_secs {
            config.save_interval_secs = secs;
        }
        if let Some(min) = self.award_min {
            config.award_min = min;
        }
        if let Some(max) = self.award_max {
            config.award_max = max;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.verbose |= self.verbose;

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().resolve()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    run(config).await
}

/// Load state, serve RPC, and save until Ctrl+C
async fn run(config: ServerConfig) -> Result<()> {
    tracing::info!("Starting leaderboard server");
    tracing::info!("  HTTP RPC: {}", config.rpc_addr);
    tracing::info!("  WebSocket: {}", config.ws_addr);
    tracing::info!("  Award range: {}..={}", config.award_min, config.award_max);
    tracing::info!("  Data directory: {:?}", config.data_dir);
    tracing::info!("  Save interval: {}s", config.save_interval_secs);

    let policy = Arc::new(RandomAward::new(config.award_min, config.award_max)?);

    // Create data directory if it doesn't exist
    std::fs::create_dir_all(&config.data_dir)?;

    // Open persistent store
    let store = Arc::new(PersistentStore::open(&config.data_dir)?);

    // Load existing state from disk
    let state = store.load()?;
    let leaderboard = if state.participants.is_empty() && state.claims.is_empty() {
        tracing::info!("No existing state found, starting fresh");
        Leaderboard::new(config.engine_config(), policy)
    } else {
        Leaderboard::restore(config.engine_config(), policy, state)?
    };
    let leaderboard = Arc::new(leaderboard);

    // Everything loaded from disk is already persisted
    let saved_through = Arc::new(AtomicU64::new(leaderboard.stats().last_sequence));

    // Spawn update dispatcher
    let dispatcher = tokio::spawn(leaderboard.broadcaster().run());

    // Spawn periodic saver
    let saver = if config.save_interval_secs > 0 {
        let board = leaderboard.clone();
        let store = store.clone();
        let saved = saved_through.clone();
        let period = Duration::from_secs(config.save_interval_secs);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let since = saved.load(Ordering::Acquire);
                match board.save_to(store.as_ref(), since) {
                    Ok(last) => saved.store(last, Ordering::Release),
                    Err(e) => tracing::error!("Failed to save state: {}", e),
                }
            }
        }))
    } else {
        None
    };

    // Start HTTP and WebSocket servers
    let rpc_config = RpcServerConfig {
        http_addr: config.rpc_addr.clone(),
        ws_addr: config.ws_addr.clone(),
        verbose: config.verbose,
    };
    let rpc = RpcServer::new(rpc_config, leaderboard.clone());
    let rpc_server = tokio::spawn(async move {
        if let Err(e) = rpc.run().await {
            tracing::error!("RPC server error: {}", e);
        }
    });

    tracing::info!("Leaderboard running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");

    if let Some(saver) = saver {
        saver.abort();
    }
    rpc_server.abort();

    // Save state before shutdown
    let since = saved_through.load(Ordering::Acquire);
    match leaderboard.save_to(store.as_ref(), since) {
        Ok(last) => {
            let stats = leaderboard.stats();
            tracing::info!(
                "Final state saved: {} participants through sequence {}",
                stats.participants,
                last
            );
        }
        Err(e) => tracing::error!("Failed to save final state: {}", e),
    }

    dispatcher.abort();

    tracing::info!("Leaderboard stopped");

    Ok(())
}
