// =============================================================================
// Price-Condition Watchers
// =============================================================================
//
// A watcher polls the underlying's last traded price on a fixed interval and
// fires a market order when its condition is met:
//
//   Entry  — waits for the underlying to cross `entry` in the direction fixed
//            when it was armed, then BUYs. Deadline ⇒ Cancelled.
//   Exit   — waits for target or stoploss, then SELLs. Deadline ⇒ forced SELL.
//
// Watchers are only ever run by the supervisor, which owns their lifecycle.
// =============================================================================

pub mod condition;
pub(crate) mod task;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::execution::ExecutionResult;
use crate::types::WatcherKind;

pub type WatcherId = String;

// =============================================================================
// Registration
// =============================================================================

/// Kind-specific thresholds. Immutable for the life of a registered watcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Thresholds {
    Entry {
        entry: f64,
    },
    Exit {
        target: f64,
        stoploss: f64,
        /// Fill level this exit protects.
        reference: f64,
    },
}

impl Thresholds {
    pub fn kind(&self) -> WatcherKind {
        match self {
            Self::Entry { .. } => WatcherKind::Entry,
            Self::Exit { .. } => WatcherKind::Exit,
        }
    }
}

/// How long a watcher may stay armed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Hold {
    /// The configured maximum for the watcher's kind.
    Default,
    /// A caller-chosen duration, capped at the configured maximum.
    For(Duration),
    /// An absolute deadline inherited from a superseded watcher.
    Until(Instant),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WatcherSpecError {
    #[error("{0} must not be empty")]
    EmptyKey(&'static str),
    #[error("quantity must be positive")]
    ZeroQuantity,
    #[error("{field} must be a positive finite price, got {value}")]
    InvalidPrice { field: &'static str, value: f64 },
    #[error("target and stoploss must differ (both {0})")]
    TargetEqualsStoploss(f64),
}

/// Everything needed to register a watcher.
#[derive(Debug, Clone)]
pub struct WatcherSpec {
    pub instrument_key: String,
    pub underlying_key: String,
    pub quantity: u32,
    pub thresholds: Thresholds,
    pub hold: Hold,
    /// At most one watcher of a race group may fire.
    pub race_group: Option<String>,
    /// Free-form label shown in diagnostics and logs.
    pub tag: String,
}

impl WatcherSpec {
    pub fn entry(
        instrument_key: impl Into<String>,
        underlying_key: impl Into<String>,
        quantity: u32,
        entry: f64,
    ) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            underlying_key: underlying_key.into(),
            quantity,
            thresholds: Thresholds::Entry { entry },
            hold: Hold::Default,
            race_group: None,
            tag: "entry".into(),
        }
    }

    pub fn exit(
        instrument_key: impl Into<String>,
        underlying_key: impl Into<String>,
        quantity: u32,
        target: f64,
        stoploss: f64,
        reference: f64,
    ) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            underlying_key: underlying_key.into(),
            quantity,
            thresholds: Thresholds::Exit {
                target,
                stoploss,
                reference,
            },
            hold: Hold::Default,
            race_group: None,
            tag: "exit".into(),
        }
    }

    pub fn with_hold(mut self, hold: Hold) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn in_race(mut self, group: impl Into<String>) -> Self {
        self.race_group = Some(group.into());
        self
    }

    pub fn kind(&self) -> WatcherKind {
        self.thresholds.kind()
    }

    /// Structural checks every registered watcher must satisfy.
    pub fn validate(&self) -> Result<(), WatcherSpecError> {
        if self.instrument_key.trim().is_empty() {
            return Err(WatcherSpecError::EmptyKey("instrument_key"));
        }
        if self.underlying_key.trim().is_empty() {
            return Err(WatcherSpecError::EmptyKey("underlying_key"));
        }
        if self.quantity == 0 {
            return Err(WatcherSpecError::ZeroQuantity);
        }

        match self.thresholds {
            Thresholds::Entry { entry } => check_price("entry", entry),
            Thresholds::Exit {
                target,
                stoploss,
                reference,
            } => {
                check_price("target", target)?;
                check_price("stoploss", stoploss)?;
                check_price("reference", reference)?;
                if target == stoploss {
                    return Err(WatcherSpecError::TargetEqualsStoploss(target));
                }
                Ok(())
            }
        }
    }
}

fn check_price(field: &'static str, value: f64) -> Result<(), WatcherSpecError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(WatcherSpecError::InvalidPrice { field, value })
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Why a watcher fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TriggerCause {
    Condition,
    Deadline,
}

/// Why a watcher resolved without acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancelReason {
    /// Explicit `Cancel(id)`.
    Requested,
    /// Entry watcher reached its deadline.
    Deadline,
    /// Another member of its race group fired first.
    Superseded,
    /// Supervisor stopped.
    Shutdown,
    /// Registration refused (duplicate id).
    Rejected,
    /// The watcher task died unexpectedly.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trigger {
    pub cause: TriggerCause,
    /// Underlying price that satisfied the condition (last seen price for a
    /// deadline exit, if any).
    pub price: Option<f64>,
    pub execution: ExecutionResult,
}

/// The single terminal event of a watcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Outcome {
    Triggered(Trigger),
    Cancelled(CancelReason),
}

impl Outcome {
    /// Fired and the order went through.
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Triggered(t) if t.execution.is_filled())
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Triggered(t) => match t.price {
                Some(p) => write!(f, "Triggered({:?} @ {p:.2}, {})", t.cause, t.execution),
                None => write!(f, "Triggered({:?}, {})", t.cause, t.execution),
            },
            Self::Cancelled(reason) => write!(f, "Cancelled({reason:?})"),
        }
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Immutable point-in-time view of a live watcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherSnapshot {
    pub id: WatcherId,
    pub kind: WatcherKind,
    pub tag: String,
    pub instrument_key: String,
    pub underlying_key: String,
    pub quantity: u32,
    #[serde(flatten)]
    pub thresholds: Thresholds,
    pub race_group: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub expires_in_secs: u64,
    #[serde(skip)]
    pub deadline: Instant,
}

/// All live watchers, partitioned by kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActiveWatchers {
    #[serde(rename = "entry_workers")]
    pub entries: Vec<WatcherSnapshot>,
    #[serde(rename = "exit_workers")]
    pub exits: Vec<WatcherSnapshot>,
}
