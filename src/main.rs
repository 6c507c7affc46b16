// =============================================================================
// Underlying-Trigger Desk — Main Entry Point
// =============================================================================
//
// Options are entered and exited on the *underlying index* crossing a level.
// The process hosts one watcher supervisor and a small REST surface; every
// order protocol runs as a background chain over supervisor tickets.
//
// Set `TRIGGER_ACCOUNT_MODE=demo` to simulate orders locally.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broker;
mod execution;
mod runtime_config;
mod strategy;
mod supervisor;
mod types;
mod watcher;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::{EnvToken, UpstoxClient};
use crate::execution::ExecutionEngine;
use crate::runtime_config::RuntimeConfig;
use crate::supervisor::Supervisor;

const CONFIG_PATH: &str = "trigger_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Underlying-Trigger Desk — Starting Up             ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path = std::env::var("TRIGGER_CONFIG").unwrap_or_else(|_| CONFIG_PATH.into());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(path = %config_path, error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();
    config.validate().context("invalid runtime configuration")?;

    info!(
        account_mode = %config.account_mode,
        poll_secs = config.poll_interval_secs,
        entry_hold_secs = config.entry_hold_secs,
        exit_hold_secs = config.exit_hold_secs,
        underlyings = config.underlyings.len(),
        "Configuration loaded"
    );

    // ── 2. Broker ────────────────────────────────────────────────────────
    let tokens = Arc::new(EnvToken::new(config.token_env.clone()));
    let broker = Arc::new(
        UpstoxClient::new(config.broker_base_url.clone(), tokens)
            .context("failed to build broker client")?,
    );

    // ── 3. Execution & supervisor ────────────────────────────────────────
    let execution = Arc::new(ExecutionEngine::new(
        broker.clone(),
        broker.clone(),
        config.account_mode,
    ));
    let (supervisor, supervisor_task) =
        Supervisor::spawn(config.supervisor_config(), broker.clone(), execution);

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, supervisor.clone(), broker));

    // ── 4. API server ────────────────────────────────────────────────────
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("API server failed")?;

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    supervisor.shutdown();
    if let Err(e) = supervisor_task.await {
        error!(error = %e, "Supervisor task ended abnormally");
    }

    info!("Underlying-Trigger Desk stopped");
    Ok(())
}
