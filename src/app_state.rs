// =============================================================================
// Central Application State — Underlying-Trigger Desk
// =============================================================================
//
// Ties together what the HTTP handlers and protocol chains need: the loaded
// configuration, the supervisor handle and the price feed. Shared as
// `Arc<AppState>`; every field is immutable or internally synchronised, so
// no lock is taken here.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::broker::PriceFeed;
use crate::runtime_config::RuntimeConfig;
use crate::supervisor::SupervisorHandle;
use crate::types::AccountMode;

pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub supervisor: SupervisorHandle,
    pub feed: Arc<dyn PriceFeed>,
    pub started_at: DateTime<Utc>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub account_mode: AccountMode,
    pub uptime_secs: i64,
    pub live_entries: usize,
    pub live_exits: usize,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        supervisor: SupervisorHandle,
        feed: Arc<dyn PriceFeed>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            supervisor,
            feed,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Liveness plus watcher counts. A stopped supervisor reports "degraded".
    pub async fn health(&self) -> HealthSnapshot {
        let (status, live_entries, live_exits) = match self.supervisor.list_all().await {
            Ok(active) => ("ok", active.entries.len(), active.exits.len()),
            Err(_) => ("degraded", 0, 0),
        };

        HealthSnapshot {
            status,
            account_mode: self.config.account_mode,
            uptime_secs: self.uptime_secs(),
            live_entries,
            live_exits,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("account_mode", &self.config.account_mode)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
