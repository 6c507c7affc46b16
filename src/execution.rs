// =============================================================================
// Execution Engine — routes a fired trigger's market order to the broker, or
// fills it on paper in demo mode
// =============================================================================
//
// A paper fill is priced off the contract's own last traded price so demo
// chains can report premium P&L the way a live book would.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::{OrderAck, OrderGateway, PriceFeed};
use crate::types::{AccountMode, Side};

/// Upper bound on the premium quote taken at a paper fill.
const PAPER_QUOTE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Outcome of an execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// Order accepted by the broker (live mode).
    Placed(OrderAck),
    /// Order filled on paper (demo mode).
    Simulated(PaperFill),
    /// The broker refused the order or could not be reached.
    Error(String),
}

impl ExecutionResult {
    /// True when the position actually changed (live or on paper).
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Placed(_) | Self::Simulated(_))
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placed(ack) => write!(f, "Placed({})", ack.order_id),
            Self::Simulated(fill) => match fill.premium {
                Some(premium) => write!(f, "Simulated({} @ {premium:.2})", fill.sim_order_id),
                None => write!(f, "Simulated({})", fill.sim_order_id),
            },
            Self::Error(err) => write!(f, "Error({err})"),
        }
    }
}

/// A demo-mode fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperFill {
    pub sim_order_id: String,
    /// Option premium at the fill; `None` when no quote could be taken.
    pub premium: Option<f64>,
    pub filled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ExecutionEngine {
    gateway: Arc<dyn OrderGateway>,
    /// Quotes the contract itself for paper fills.
    feed: Arc<dyn PriceFeed>,
    mode: AccountMode,
}

impl ExecutionEngine {
    pub fn new(gateway: Arc<dyn OrderGateway>, feed: Arc<dyn PriceFeed>, mode: AccountMode) -> Self {
        Self {
            gateway,
            feed,
            mode,
        }
    }

    /// Send a MARKET order for `quantity` units of `instrument_key`.
    ///
    /// In **demo mode** nothing reaches the broker; the fill gets a synthetic
    /// id and the contract's current premium. In **live mode** the order goes
    /// to the gateway and a rejection is reported as
    /// [`ExecutionResult::Error`] rather than propagated, so the caller can
    /// surface it as a failed trigger.
    pub async fn execute(&self, instrument_key: &str, side: Side, quantity: u32) -> ExecutionResult {
        match self.mode {
            AccountMode::Demo => {
                let sim_order_id = Uuid::new_v4().to_string();
                let premium = self.paper_premium(instrument_key).await;
                info!(
                    instrument_key,
                    %side,
                    quantity,
                    sim_order_id = %sim_order_id,
                    ?premium,
                    "paper fill"
                );
                ExecutionResult::Simulated(PaperFill {
                    sim_order_id,
                    premium,
                    filled_at: Utc::now(),
                })
            }
            AccountMode::Live => match self.gateway.submit(instrument_key, side, quantity).await {
                Ok(ack) => {
                    info!(
                        instrument_key,
                        %side,
                        quantity,
                        order_id = %ack.order_id,
                        "live order placed"
                    );
                    ExecutionResult::Placed(ack)
                }
                Err(e) => {
                    warn!(instrument_key, %side, quantity, error = %e, "live order placement failed");
                    ExecutionResult::Error(format!("Order placement failed: {e}"))
                }
            },
        }
    }

    /// A missing quote leaves the paper fill unpriced rather than failing it.
    async fn paper_premium(&self, instrument_key: &str) -> Option<f64> {
        match timeout(PAPER_QUOTE_TIMEOUT, self.feed.last_price(instrument_key)).await {
            Ok(Ok(premium)) => Some(premium),
            Ok(Err(e)) => {
                warn!(instrument_key, error = %e, "no premium quote for paper fill");
                None
            }
            Err(_) => {
                warn!(instrument_key, "premium quote for paper fill timed out");
                None
            }
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("gateway", &"<OrderGateway>")
            .field("mode", &self.mode)
            .finish()
    }
}
