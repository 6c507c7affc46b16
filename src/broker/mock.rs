//! Scripted broker doubles for tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BrokerError, OrderAck, OrderGateway, PriceFeed};
use crate::types::Side;

/// Price feed that replays a per-instrument script. `None` entries simulate a
/// failed fetch. The final entry is sticky and repeats forever.
#[derive(Default)]
pub struct ScriptedFeed {
    scripts: Mutex<HashMap<String, VecDeque<Option<f64>>>>,
    symbols: Mutex<HashMap<String, String>>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, instrument_key: &str, steps: &[Option<f64>]) {
        self.scripts
            .lock()
            .insert(instrument_key.to_string(), steps.iter().copied().collect());
    }

    pub fn prices(&self, instrument_key: &str, prices: &[f64]) {
        let steps: Vec<Option<f64>> = prices.iter().map(|p| Some(*p)).collect();
        self.script(instrument_key, &steps);
    }

    /// Replace the script with a single sticky price.
    pub fn set_price(&self, instrument_key: &str, price: f64) {
        self.prices(instrument_key, &[price]);
    }

    pub fn symbol(&self, instrument_key: &str, trading_symbol: &str) {
        self.symbols
            .lock()
            .insert(instrument_key.to_string(), trading_symbol.to_string());
    }
}

#[async_trait]
impl PriceFeed for ScriptedFeed {
    async fn last_price(&self, instrument_key: &str) -> Result<f64, BrokerError> {
        let mut scripts = self.scripts.lock();
        let script = scripts
            .get_mut(instrument_key)
            .ok_or_else(|| BrokerError::NoPrice(instrument_key.to_string()))?;

        let step = if script.len() > 1 {
            script.pop_front().flatten()
        } else {
            script.front().copied().flatten()
        };

        step.ok_or_else(|| BrokerError::NoPrice(instrument_key.to_string()))
    }

    async fn trading_symbol(&self, instrument_key: &str) -> Result<String, BrokerError> {
        self.symbols
            .lock()
            .get(instrument_key)
            .cloned()
            .ok_or_else(|| BrokerError::NoPrice(instrument_key.to_string()))
    }
}

/// Gateway that records every submitted order.
#[derive(Default)]
pub struct RecordingGateway {
    orders: Mutex<Vec<(String, Side, u32)>>,
    reject: bool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway that rejects every order (after recording the attempt).
    pub fn rejecting() -> Self {
        Self {
            orders: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn orders(&self) -> Vec<(String, Side, u32)> {
        self.orders.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.orders.lock().len()
    }
}

#[async_trait]
impl OrderGateway for RecordingGateway {
    async fn submit(
        &self,
        instrument_key: &str,
        side: Side,
        quantity: u32,
    ) -> Result<OrderAck, BrokerError> {
        let mut orders = self.orders.lock();
        orders.push((instrument_key.to_string(), side, quantity));
        if self.reject {
            return Err(BrokerError::Rejected("scripted rejection".into()));
        }
        Ok(OrderAck {
            order_id: format!("order-{}", orders.len()),
        })
    }
}
