//! Signaling server binary entry point
//!
//! Starts the Tandem matchmaking and signaling relay server.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: WebSocket on 0.0.0.0:3001, /health on 0.0.0.0:3002
//! cargo run -p tandem-signaling-server
//!
//! # Load a TOML file, then override single values
//! cargo run -p tandem-signaling-server -- \
//!   --config ./tandem.toml \
//!   --bind 127.0.0.1:4001 \
//!   --heartbeat-timeout-secs 120
//!
//! # JSON logs
//! RUST_LOG=debug cargo run -p tandem-signaling-server -- --log-format json
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::InitiatorRole;
use tandem_signaling::{SignalingServer, SignalingServerConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tandem signaling server
///
/// Pairs anonymous endpoints and relays their WebRTC handshake.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (CLI flags override its values)
    #[arg(short, long, env = "TANDEM_CONFIG")]
    config: Option<PathBuf>,

    /// WebSocket listen address
    #[arg(long, env = "TANDEM_BIND_ADDRESS")]
    bind: Option<String>,

    /// Health endpoint listen address
    #[arg(long, env = "TANDEM_HEALTH_ADDRESS")]
    health: Option<String>,

    /// Disable the HTTP health endpoint
    #[arg(long, default_value_t = false, env = "TANDEM_NO_HEALTH")]
    no_health: bool,

    /// Evict endpoints silent for this many seconds
    #[arg(long, env = "TANDEM_HEARTBEAT_TIMEOUT_SECS")]
    heartbeat_timeout_secs: Option<u64>,

    /// Reject inbound messages larger than this
    #[arg(long, env = "TANDEM_MAX_MESSAGE_BYTES")]
    max_message_bytes: Option<usize>,

    /// Which side of a new match sends the first offer
    #[arg(long, value_enum, env = "TANDEM_INITIATOR")]
    initiator: Option<RoleArg>,

    /// Match across lobbies
    #[arg(long, default_value_t = false, env = "TANDEM_IGNORE_LOBBY")]
    ignore_lobby: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "TANDEM_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum RoleArg {
    /// The endpoint whose find-partner completed the match
    Caller,
    /// The endpoint that was waiting in the pool
    Waiter,
}

impl From<RoleArg> for InitiatorRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Caller => InitiatorRole::Caller,
            RoleArg::Waiter => InitiatorRole::Waiter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = build_config(&args)?;

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);
    let grace = config.shutdown_grace();

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");

        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(grace);
            eprintln!("Graceful shutdown timeout ({:?}), forcing exit", grace);
            std::process::exit(0);
        });
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("tandem-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args.log_format, config, shutdown_flag))
}

/// TOML file first, then CLI/env overrides, then validation
fn build_config(args: &Args) -> Result<SignalingServerConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => SignalingServerConfig::load(path)?,
        None => SignalingServerConfig::default(),
    };

    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(health) = &args.health {
        config.health_address = Some(health.clone());
    }
    if args.no_health {
        config.health_address = None;
    }
    if let Some(bytes) = args.max_message_bytes {
        config.max_message_bytes = bytes;
    }

    let mut matchmaking = config.matchmaking.clone();
    if let Some(secs) = args.heartbeat_timeout_secs {
        matchmaking = matchmaking.with_heartbeat_timeout(Duration::from_secs(secs));
    }
    if let Some(role) = args.initiator {
        matchmaking = matchmaking.with_initiator_role(role.into());
    }
    if args.ignore_lobby {
        matchmaking = matchmaking.with_lobby_enforcement(false);
    }
    config = config.with_matchmaking(matchmaking);

    config.validate()?;
    Ok(config)
}

async fn async_main(
    log_format: LogFormat,
    config: SignalingServerConfig,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_address,
        health = ?config.health_address,
        heartbeat_timeout_ms = config.matchmaking.heartbeat_timeout_ms,
        initiator = ?config.matchmaking.initiator_role,
        "Tandem signaling server starting"
    );

    let handle = SignalingServer::new(config)?.start().await?;
    info!("Server running on {}. Press Ctrl+C to shutdown.", handle.local_addr());

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, cleaning up...");
    let stats = handle.registry().stats();
    info!(
        active_endpoints = stats.active_endpoints,
        waiting = stats.waiting_count,
        "Closing remaining connections"
    );
    handle.shutdown().await;

    info!("Signaling server shut down gracefully");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    // RUST_LOG wins; default to info
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::parse_from([
            "tandem-signaling-server",
            "--bind",
            "127.0.0.1:4001",
            "--heartbeat-timeout-secs",
            "120",
            "--initiator",
            "waiter",
            "--no-health",
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:4001");
        assert_eq!(config.health_address, None);
        assert_eq!(config.matchmaking.heartbeat_timeout_ms, 120_000);
        assert_eq!(config.matchmaking.initiator_role, InitiatorRole::Waiter);
        assert!(config.matchmaking.enforce_lobby);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from([
            "tandem-signaling-server",
            "--max-message-bytes",
            "0",
        ]);
        assert!(build_config(&args).is_err());
    }
}
