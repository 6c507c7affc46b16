// =============================================================================
// Broker collaborators — price feed, order gateway, bearer token
// =============================================================================
//
// The desk talks to the brokerage through three narrow seams so that the
// watcher machinery can be driven by scripted doubles in tests and by the
// Upstox REST client in production.
// =============================================================================

pub mod token;
pub mod upstox;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Side;

pub use token::{EnvToken, TokenProvider};
pub use upstox::UpstoxClient;

/// Typed failure returned by every broker call.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("no access token available: {0}")]
    MissingToken(String),

    #[error("{endpoint} request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to decode {endpoint} response: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },

    #[error("no last traded price for {0}")]
    NoPrice(String),

    #[error("order rejected: {0}")]
    Rejected(String),
}

/// Acknowledgement of an accepted market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}

/// Last-traded-price source.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest traded price of `instrument_key`.
    async fn last_price(&self, instrument_key: &str) -> Result<f64, BrokerError>;

    /// Exchange trading symbol of `instrument_key` (e.g. `NSE_FO:BANKNIFTY24OCT52000CE`).
    async fn trading_symbol(&self, instrument_key: &str) -> Result<String, BrokerError>;
}

/// Market order submission.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit(
        &self,
        instrument_key: &str,
        side: Side,
        quantity: u32,
    ) -> Result<OrderAck, BrokerError>;
}
