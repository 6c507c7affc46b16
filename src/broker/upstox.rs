// =============================================================================
// Upstox v2 REST client — market quotes and market orders
// =============================================================================
//
// Every request carries `Authorization: Bearer <token>` from the configured
// `TokenProvider`. The token is fetched per request so rotation is picked up
// immediately; it is never logged.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{BrokerError, OrderAck, OrderGateway, PriceFeed, TokenProvider};
use crate::types::Side;

const LTP_ENDPOINT: &str = "GET /v2/market-quote/ltp";
const ORDER_ENDPOINT: &str = "POST /v2/order/place";

// -----------------------------------------------------------------------------
// Wire models
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LtpResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: HashMap<String, InstrumentQuote>,
}

#[derive(Debug, Deserialize)]
struct InstrumentQuote {
    #[serde(default)]
    last_price: f64,
    #[serde(default)]
    #[allow(dead_code)]
    instrument_token: String,
}

/// Body of `POST /v2/order/place`.
#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    quantity: u32,
    product: &'a str,
    validity: &'a str,
    price: f64,
    tag: &'a str,
    instrument_token: &'a str,
    order_type: &'a str,
    transaction_type: &'a str,
    disclosed_quantity: u32,
    trigger_price: f64,
    is_amo: bool,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Option<OrderData>,
}

#[derive(Debug, Deserialize)]
struct OrderData {
    order_id: String,
}

// -----------------------------------------------------------------------------
// Client
// -----------------------------------------------------------------------------

/// Upstox REST client implementing both [`PriceFeed`] and [`OrderGateway`].
#[derive(Clone)]
pub struct UpstoxClient {
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    client: reqwest::Client,
}

impl UpstoxClient {
    /// Create a client against `base_url` (e.g. `https://api.upstox.com`).
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, BrokerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| BrokerError::Transport {
                endpoint: "client builder",
                source,
            })?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "UpstoxClient initialised");

        Ok(Self {
            base_url,
            tokens,
            client,
        })
    }

    /// Fetch the quote for one instrument and return `(trading_symbol, ltp)`.
    #[instrument(skip(self), name = "upstox::ltp")]
    pub async fn quote(&self, instrument_key: &str) -> Result<(String, f64), BrokerError> {
        let token = self.tokens.bearer()?;
        let url = format!("{}/v2/market-quote/ltp", self.base_url);

        let resp = self
            .client
            .get(&url)
            .query(&[("instrument_key", instrument_key)])
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| BrokerError::Transport {
                endpoint: LTP_ENDPOINT,
                source,
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|source| BrokerError::Transport {
            endpoint: LTP_ENDPOINT,
            source,
        })?;

        if !status.is_success() {
            return Err(BrokerError::Status {
                endpoint: LTP_ENDPOINT,
                status: status.as_u16(),
                body,
            });
        }

        parse_ltp(instrument_key, &body)
    }

    /// Place a MARKET intraday order.
    #[instrument(skip(self), name = "upstox::place_order")]
    pub async fn place_market_order(
        &self,
        instrument_key: &str,
        side: Side,
        quantity: u32,
    ) -> Result<OrderAck, BrokerError> {
        let token = self.tokens.bearer()?;
        let url = format!("{}/v2/order/place", self.base_url);
        let tag = uuid::Uuid::new_v4().simple().to_string();

        let order = OrderRequest {
            quantity,
            product: "I",
            validity: "DAY",
            price: 0.0,
            tag: &tag[..20],
            instrument_token: instrument_key,
            order_type: "MARKET",
            transaction_type: side.as_str(),
            disclosed_quantity: quantity,
            trigger_price: 0.0,
            is_amo: false,
        };

        debug!(instrument_key, %side, quantity, "placing market order");

        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, "application/json")
            .json(&order)
            .send()
            .await
            .map_err(|source| BrokerError::Transport {
                endpoint: ORDER_ENDPOINT,
                source,
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|source| BrokerError::Transport {
            endpoint: ORDER_ENDPOINT,
            source,
        })?;

        if !status.is_success() {
            return Err(BrokerError::Status {
                endpoint: ORDER_ENDPOINT,
                status: status.as_u16(),
                body,
            });
        }

        parse_order_ack(&body)
    }
}

impl std::fmt::Debug for UpstoxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstoxClient")
            .field("base_url", &self.base_url)
            .field("tokens", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl PriceFeed for UpstoxClient {
    async fn last_price(&self, instrument_key: &str) -> Result<f64, BrokerError> {
        self.quote(instrument_key).await.map(|(_, ltp)| ltp)
    }

    async fn trading_symbol(&self, instrument_key: &str) -> Result<String, BrokerError> {
        self.quote(instrument_key).await.map(|(symbol, _)| symbol)
    }
}

#[async_trait]
impl OrderGateway for UpstoxClient {
    async fn submit(
        &self,
        instrument_key: &str,
        side: Side,
        quantity: u32,
    ) -> Result<OrderAck, BrokerError> {
        self.place_market_order(instrument_key, side, quantity).await
    }
}

// -----------------------------------------------------------------------------
// Response parsing
// -----------------------------------------------------------------------------

/// Pull `(trading_symbol, last_price)` out of an LTP response body. A zero
/// price means the broker had nothing for the key and is reported as
/// [`BrokerError::NoPrice`].
fn parse_ltp(instrument_key: &str, body: &str) -> Result<(String, f64), BrokerError> {
    let parsed: LtpResponse = serde_json::from_str(body).map_err(|e| BrokerError::Decode {
        endpoint: LTP_ENDPOINT,
        reason: e.to_string(),
    })?;

    if !parsed.status.is_empty() && parsed.status != "success" {
        warn!(instrument_key, status = %parsed.status, "ltp response not successful");
    }

    parsed
        .data
        .into_iter()
        .find(|(_, quote)| quote.last_price > 0.0)
        .map(|(symbol, quote)| (symbol, quote.last_price))
        .ok_or_else(|| BrokerError::NoPrice(instrument_key.to_string()))
}

fn parse_order_ack(body: &str) -> Result<OrderAck, BrokerError> {
    let parsed: OrderResponse = serde_json::from_str(body).map_err(|e| BrokerError::Decode {
        endpoint: ORDER_ENDPOINT,
        reason: e.to_string(),
    })?;

    match (parsed.status.as_str(), parsed.data) {
        ("success", Some(data)) => Ok(OrderAck {
            order_id: data.order_id,
        }),
        _ => Err(BrokerError::Rejected(body.to_string())),
    }
}
