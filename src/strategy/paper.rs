//! Paper-trade bookkeeping for demo mode: premium and underlying at entry and
//! exit, capital committed and profit on premium.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::execution::ExecutionResult;
use crate::watcher::Outcome;

/// An open paper position, built from one or more paper entry fills.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperPosition {
    pub quantity: u32,
    /// Quantity-weighted average entry premium.
    pub premium: f64,
    /// Underlying level at entry, when every fill had one.
    pub underlying: Option<f64>,
    pub opened_at: DateTime<Utc>,
}

/// A closed paper position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperTrade {
    pub quantity: u32,
    pub entry_premium: f64,
    pub exit_premium: f64,
    pub entry_underlying: Option<f64>,
    pub exit_underlying: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// Entry premium × quantity.
    pub capital: f64,
    pub premium_change: f64,
    pub underlying_change: Option<f64>,
    pub profit_pct: f64,
}

impl PaperPosition {
    /// `None` unless `outcome` is a priced paper fill.
    pub fn opened(outcome: &Outcome, quantity: u32) -> Option<Self> {
        let Outcome::Triggered(trigger) = outcome else {
            return None;
        };
        let ExecutionResult::Simulated(fill) = &trigger.execution else {
            return None;
        };
        let premium = fill.premium.filter(|p| *p > 0.0)?;

        Some(Self {
            quantity,
            premium,
            underlying: trigger.price,
            opened_at: fill.filled_at,
        })
    }

    /// Fold a scale-in fill into this position.
    pub fn add(self, other: PaperPosition) -> Self {
        let quantity = self.quantity + other.quantity;
        let weighted = |a: f64, b: f64| {
            (a * self.quantity as f64 + b * other.quantity as f64) / quantity as f64
        };

        Self {
            quantity,
            premium: weighted(self.premium, other.premium),
            underlying: self.underlying.zip(other.underlying).map(|(a, b)| weighted(a, b)),
            opened_at: self.opened_at.min(other.opened_at),
        }
    }

    /// Close against an exit outcome. `None` unless the exit is a priced
    /// paper fill.
    pub fn settle(&self, exit: &Outcome) -> Option<PaperTrade> {
        let closed = PaperPosition::opened(exit, self.quantity)?;
        let premium_change = closed.premium - self.premium;

        Some(PaperTrade {
            quantity: self.quantity,
            entry_premium: self.premium,
            exit_premium: closed.premium,
            entry_underlying: self.underlying,
            exit_underlying: closed.underlying,
            opened_at: self.opened_at,
            closed_at: closed.opened_at,
            capital: self.premium * self.quantity as f64,
            premium_change,
            underlying_change: closed.underlying.zip(self.underlying).map(|(x, e)| x - e),
            profit_pct: premium_change / self.premium * 100.0,
        })
    }
}
