//! # Caissa Gateway
//!
//! Real-time WebSocket gateway in front of the monitoring engine.
//!
//! Responsibilities:
//! - client lifecycle with admission control and heartbeat liveness
//! - typed command dispatch (subscribe/unsubscribe, rooms, tracking,
//!   alert and metrics queries, on-demand forecasts)
//! - bridging engine events to matching subscriptions in real time
//!
//! The binary wires a simulated data source and the in-process analytics
//! into the engine; both sit behind traits, so production deployments swap
//! in real collaborators without touching the gateway.

pub mod bridge;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod heartbeat;
pub mod server;

use std::sync::Arc;

use caissa_engine::{MonitorEngine, SimulatedSource, StatAnalytics};
use caissa_models::MonitorOptions;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use client::{Disconnect, GatewayError, GatewayState, Subscription};
pub use config::{EngineSettings, GatewayConfig};
pub use server::{router, serve};

#[derive(Parser, Debug)]
#[command(name = "caissa-gateway")]
#[command(about = "Caissa - player performance monitoring gateway")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Listen address override, e.g. 127.0.0.1:8765
    #[arg(long)]
    pub listen: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log: String,
}

/// Initialize tracing: stdout only, `RUST_LOG` wins over the CLI default.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// CLI entry point: parse, configure, and serve until Ctrl-C.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let mut cfg = match &cli.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }

    tokio::runtime::Runtime::new()?.block_on(serve_until_shutdown(cfg))
}

async fn serve_until_shutdown(cfg: GatewayConfig) -> anyhow::Result<()> {
    let engine = Arc::new(MonitorEngine::new(
        cfg.engine.engine_config(),
        Arc::new(SimulatedSource::new(cfg.engine.sim_seed)),
        Arc::new(StatAnalytics),
    ));
    for player in &cfg.tracked {
        engine.add_monitor(player, &MonitorOptions::default()).await;
    }
    engine.start();

    let state = Arc::new(GatewayState::new(cfg.clone(), Arc::clone(&engine)));
    GatewayState::start(&state);

    let listener = tokio::net::TcpListener::bind(&cfg.listen).await?;
    serve(Arc::clone(&state), listener, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    // Drain: close every client with a normal-closure frame, stop the
    // cycles, and give the writers a bounded grace period to flush.
    state.shutdown().await;
    engine.stop();
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    Ok(())
}
