// =============================================================================
// Trigger Protocols — compositions of entry and exit watchers
// =============================================================================
//
//   simple    entry(q) → exit(q)
//   trailing  replace a live exit with further/tighter thresholds
//   partial   entry(q) → race{near-stop(2q), reaffirmation(2q)} → exit(s)
//
// Each protocol validates synchronously, registers its first watcher and
// returns a `Placement`; the rest of the chain runs in a spawned task that
// owns every ticket it registers.
// =============================================================================

pub mod paper;
pub mod partial;
pub mod simple;
pub mod trailing;
pub mod validation;

use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::app_state::AppState;
use crate::broker::BrokerError;
use crate::supervisor::{SupervisorError, WatcherTicket};
use crate::watcher::{Hold, Outcome, WatcherId, WatcherSpec};

use self::paper::PaperPosition;
pub use validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("instrument {instrument_key} ({trading_symbol}) is not a supported index derivative")]
    UnsupportedInstrument {
        instrument_key: String,
        trading_symbol: String,
    },

    #[error("broker unavailable: {0}")]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("no matching exit watcher: {0}")]
    NoSuchExit(WatcherId),

    #[error("exit {0} already resolved")]
    AlreadyResolved(WatcherId),
}

/// How a protocol chain ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainReport {
    /// No position was opened.
    NoEntry(Outcome),
    /// Terminal outcomes of every exit the chain registered.
    Exited(Vec<Outcome>),
    /// A scale-in race ran: how each leg ended, then how the position closed.
    Raced {
        near_stop: Outcome,
        reaffirmation: Outcome,
        closed: Box<ChainReport>,
    },
    /// The chain could not register a watcher it needed.
    Failed(String),
}

/// First watcher of a protocol plus the task driving the rest.
#[derive(Debug)]
pub struct Placement {
    pub id: WatcherId,
    pub task: JoinHandle<ChainReport>,
}

/// An option contract resolved onto its underlying index.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub instrument_key: String,
    pub trading_symbol: String,
    pub underlying_key: String,
    /// Units per order: lot size × lots per order.
    pub quantity: u32,
}

/// Look up the contract's trading symbol and match it against the
/// configured underlying rules.
pub async fn resolve_instrument(
    state: &AppState,
    instrument_key: &str,
) -> Result<Instrument, StrategyError> {
    let trading_symbol = state.feed.trading_symbol(instrument_key).await?;

    let Some(rule) = state.config.underlying_for(&trading_symbol) else {
        warn!(instrument_key, trading_symbol = %trading_symbol, "not an index derivative");
        return Err(StrategyError::UnsupportedInstrument {
            instrument_key: instrument_key.to_string(),
            trading_symbol,
        });
    };

    Ok(Instrument {
        instrument_key: instrument_key.to_string(),
        underlying_key: rule.underlying_key.clone(),
        quantity: rule.lot_size * state.config.lots_per_order,
        trading_symbol,
    })
}

/// Exit hold for a caller-supplied duration in minutes. Checked up front so
/// a bad value is refused before anything is bought.
pub fn exit_hold(duration_mins: Option<u64>) -> Result<Hold, ValidationError> {
    match duration_mins {
        None | Some(0) => Ok(Hold::Default),
        Some(minutes) => minutes
            .checked_mul(60)
            .map(|secs| Hold::For(Duration::from_secs(secs)))
            .ok_or(ValidationError::HoldOutOfRange { minutes }),
    }
}

/// Register an exit. A failure here leaves an open position unprotected.
pub(crate) fn register_exit(
    state: &AppState,
    spec: WatcherSpec,
) -> Result<WatcherTicket, SupervisorError> {
    let quantity = spec.quantity;
    let instrument_key = spec.instrument_key.clone();
    state.supervisor.register(spec).map_err(|e| {
        error!(
            instrument_key = %instrument_key,
            quantity,
            error = %e,
            "failed to register exit, position left open"
        );
        e
    })
}

/// Underlying level an exit protects: the entry's trigger price, falling back
/// to the requested level for a fill without one.
pub(crate) fn fill_level(outcome: &Outcome, requested: f64) -> f64 {
    match outcome {
        Outcome::Triggered(t) => t.price.unwrap_or(requested),
        Outcome::Cancelled(_) => requested,
    }
}

/// Await an exit's terminal outcome and log how the position was closed.
/// `paper` is the demo position the exit closes, if any.
pub async fn follow_exit(ticket: WatcherTicket, paper: Option<PaperPosition>) -> Outcome {
    let id = ticket.id().to_string();
    let outcome = ticket.outcome().await;

    match &outcome {
        Outcome::Triggered(t) if t.execution.is_filled() => {
            info!(id = %id, cause = ?t.cause, price = ?t.price, "position closed");
            if let Some(trade) = paper.as_ref().and_then(|p| p.settle(&outcome)) {
                info!(
                    id = %id,
                    quantity = trade.quantity,
                    opened_at = %trade.opened_at,
                    closed_at = %trade.closed_at,
                    entry_underlying = ?trade.entry_underlying,
                    exit_underlying = ?trade.exit_underlying,
                    underlying_change = ?trade.underlying_change,
                    entry_premium = trade.entry_premium,
                    exit_premium = trade.exit_premium,
                    premium_change = trade.premium_change,
                    capital = trade.capital,
                    profit_pct = %format!("{:.2}", trade.profit_pct),
                    "paper trade closed"
                );
            }
        }
        Outcome::Triggered(t) => {
            error!(id = %id, execution = %t.execution, "exit order failed, position may still be open");
        }
        Outcome::Cancelled(reason) => {
            info!(id = %id, ?reason, "exit watcher cancelled, position left as is");
        }
    }
    outcome
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::app_state::AppState;
    use crate::broker::mock::{RecordingGateway, ScriptedFeed};
    use crate::execution::ExecutionEngine;
    use crate::runtime_config::RuntimeConfig;
    use crate::supervisor::Supervisor;
    use crate::types::AccountMode;

    pub const OPTION: &str = "NSE_FO|43885";
    pub const INDEX: &str = "NSE_INDEX|Nifty Bank";

    pub struct Harness {
        pub state: Arc<AppState>,
        pub feed: Arc<ScriptedFeed>,
        pub gateway: Arc<RecordingGateway>,
    }

    /// Live-mode desk with 1s polling, 60s entry hold and 120s exit hold.
    pub fn harness() -> Harness {
        harness_with(RecordingGateway::new())
    }

    pub fn harness_with(gateway: RecordingGateway) -> Harness {
        build(AccountMode::Live, gateway)
    }

    /// Same desk trading on paper.
    pub fn demo_harness() -> Harness {
        build(AccountMode::Demo, RecordingGateway::new())
    }

    fn build(account_mode: AccountMode, gateway: RecordingGateway) -> Harness {
        let config = RuntimeConfig {
            account_mode,
            poll_interval_secs: 1,
            entry_hold_secs: 60,
            exit_hold_secs: 120,
            ..RuntimeConfig::default()
        };

        let feed = Arc::new(ScriptedFeed::new());
        feed.symbol(OPTION, "NSE_FO:BANKNIFTY24OCT52000CE");
        let gateway = Arc::new(gateway);

        let execution = Arc::new(ExecutionEngine::new(
            gateway.clone(),
            feed.clone(),
            config.account_mode,
        ));
        let (supervisor, _join) =
            Supervisor::spawn(config.supervisor_config(), feed.clone(), execution);
        let state = Arc::new(AppState::new(config, supervisor, feed.clone()));

        Harness {
            state,
            feed,
            gateway,
        }
    }
}
