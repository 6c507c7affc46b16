// =============================================================================
// Runtime Configuration — desk settings loaded from JSON and the environment
// =============================================================================
//
// Every tunable lives here: account mode, polling cadence, hold limits, lot
// sizing, the underlying lookup table and the protocol thresholds.
//
// All fields carry `#[serde(default)]` so a partial (or empty) file loads.
// A handful of environment variables override the file after loading:
//
//   TICKER_DURATION       poll interval, seconds
//   HOLD_DURATION         exit hold, minutes
//   TRIGGER_BIND_ADDR     HTTP listen address
//   TRIGGER_ACCOUNT_MODE  demo | paper | live
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::supervisor::SupervisorConfig;
use crate::types::AccountMode;

/// Upper bound for the poll interval and both holds: one day.
pub const MAX_HOLD_SECS: u64 = 24 * 60 * 60;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_entry_hold_secs() -> u64 {
    15 * 60
}

fn default_exit_hold_secs() -> u64 {
    30 * 60
}

fn default_lots_per_order() -> u32 {
    1
}

fn default_underlyings() -> Vec<UnderlyingRule> {
    // BANKNIFTY must be matched before NIFTY.
    vec![
        UnderlyingRule {
            symbol_contains: "BANKNIFTY".to_string(),
            underlying_key: "NSE_INDEX|Nifty Bank".to_string(),
            lot_size: 15,
        },
        UnderlyingRule {
            symbol_contains: "NIFTY".to_string(),
            underlying_key: "NSE_INDEX|Nifty 50".to_string(),
            lot_size: 50,
        },
    ]
}

fn default_near_stop_fraction() -> f64 {
    0.9
}

fn default_min_capture_fraction() -> f64 {
    0.5
}

fn default_min_reward_risk() -> f64 {
    1.0
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_broker_base_url() -> String {
    "https://api.upstox.com".to_string()
}

fn default_token_env() -> String {
    "ACCESS_TOKEN".to_string()
}

// =============================================================================
// UnderlyingRule
// =============================================================================

/// Maps an option contract onto the index it tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderlyingRule {
    /// Matched as a substring of the contract's trading symbol.
    pub symbol_contains: String,
    pub underlying_key: String,
    pub lot_size: u32,
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Operational mode ----------------------------------------------------

    /// Demo fills orders on paper; Live sends them to the broker.
    #[serde(default)]
    pub account_mode: AccountMode,

    // --- Watcher timing ------------------------------------------------------

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum lifetime of an entry watcher.
    #[serde(default = "default_entry_hold_secs")]
    pub entry_hold_secs: u64,

    /// Maximum lifetime of an exit watcher; it is force-sold when this elapses.
    #[serde(default = "default_exit_hold_secs")]
    pub exit_hold_secs: u64,

    // --- Sizing ----------------------------------------------------------------

    /// Order quantity is `lot_size × lots_per_order`.
    #[serde(default = "default_lots_per_order")]
    pub lots_per_order: u32,

    /// Checked in order; first match wins.
    #[serde(default = "default_underlyings")]
    pub underlyings: Vec<UnderlyingRule>,

    // --- Protocol thresholds ---------------------------------------------------

    /// Where the near-stop leg sits between entry (0.0) and stoploss (1.0).
    #[serde(default = "default_near_stop_fraction")]
    pub near_stop_fraction: f64,

    /// Share of the reference→target move that must be captured before a
    /// stoploss may be tightened.
    #[serde(default = "default_min_capture_fraction")]
    pub min_capture_fraction: f64,

    #[serde(default = "default_min_reward_risk")]
    pub min_reward_risk: f64,

    // --- Service -----------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_broker_base_url")]
    pub broker_base_url: String,

    /// Environment variable holding the broker access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            account_mode: AccountMode::Demo,
            poll_interval_secs: default_poll_interval_secs(),
            entry_hold_secs: default_entry_hold_secs(),
            exit_hold_secs: default_exit_hold_secs(),
            lots_per_order: default_lots_per_order(),
            underlyings: default_underlyings(),
            near_stop_fraction: default_near_stop_fraction(),
            min_capture_fraction: default_min_capture_fraction(),
            min_reward_risk: default_min_reward_risk(),
            bind_addr: default_bind_addr(),
            broker_base_url: default_broker_base_url(),
            token_env: default_token_env(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            account_mode = %config.account_mode,
            underlyings = config.underlyings.len(),
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Unparseable values are ignored with a
    /// warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("TICKER_DURATION") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.poll_interval_secs = secs,
                _ => warn!(value = %raw, "ignoring invalid TICKER_DURATION"),
            }
        }

        if let Some(raw) = lookup("HOLD_DURATION") {
            match raw.trim().parse::<u64>() {
                Ok(mins) if mins > 0 => match mins.checked_mul(60) {
                    Some(secs) => self.exit_hold_secs = secs,
                    None => warn!(value = %raw, "ignoring out-of-range HOLD_DURATION"),
                },
                _ => warn!(value = %raw, "ignoring invalid HOLD_DURATION"),
            }
        }

        if let Some(raw) = lookup("TRIGGER_BIND_ADDR") {
            if raw.trim().is_empty() {
                warn!("ignoring empty TRIGGER_BIND_ADDR");
            } else {
                self.bind_addr = raw.trim().to_string();
            }
        }

        if let Some(raw) = lookup("TRIGGER_ACCOUNT_MODE") {
            match raw.parse::<AccountMode>() {
                Ok(mode) => self.account_mode = mode,
                Err(e) => warn!(error = %e, "ignoring invalid TRIGGER_ACCOUNT_MODE"),
            }
        }
    }

    /// Reject settings the desk cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be positive");
        ensure!(self.entry_hold_secs > 0, "entry_hold_secs must be positive");
        ensure!(self.exit_hold_secs > 0, "exit_hold_secs must be positive");
        for (name, secs) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("entry_hold_secs", self.entry_hold_secs),
            ("exit_hold_secs", self.exit_hold_secs),
        ] {
            ensure!(secs <= MAX_HOLD_SECS, "{name} must not exceed {MAX_HOLD_SECS}s");
        }
        ensure!(self.lots_per_order > 0, "lots_per_order must be positive");
        ensure!(!self.underlyings.is_empty(), "at least one underlying rule is required");
        for rule in &self.underlyings {
            ensure!(
                !rule.symbol_contains.is_empty() && rule.lot_size > 0,
                "invalid underlying rule {rule:?}"
            );
        }
        ensure!(
            self.near_stop_fraction > 0.0 && self.near_stop_fraction < 1.0,
            "near_stop_fraction must be in (0, 1)"
        );
        ensure!(
            (0.0..=1.0).contains(&self.min_capture_fraction),
            "min_capture_fraction must be in [0, 1]"
        );
        ensure!(self.min_reward_risk > 0.0, "min_reward_risk must be positive");
        Ok(())
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            entry_hold: Duration::from_secs(self.entry_hold_secs),
            exit_hold: Duration::from_secs(self.exit_hold_secs),
        }
    }

    /// First rule whose pattern occurs in `trading_symbol` (case-insensitive).
    pub fn underlying_for(&self, trading_symbol: &str) -> Option<&UnderlyingRule> {
        let symbol = trading_symbol.to_uppercase();
        self.underlyings
            .iter()
            .find(|rule| symbol.contains(&rule.symbol_contains.to_uppercase()))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.poll_interval_secs, 2);
        assert_eq!(cfg.entry_hold_secs, 900);
        assert_eq!(cfg.exit_hold_secs, 1800);
        assert_eq!(cfg.underlyings.len(), 2);
        assert!((cfg.near_stop_fraction - 0.9).abs() < f64::EPSILON);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.account_mode, AccountMode::Demo);
        assert_eq!(cfg.lots_per_order, 1);
        assert_eq!(cfg.token_env, "ACCESS_TOKEN");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "account_mode": "Live", "lots_per_order": 2 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.account_mode, AccountMode::Live);
        assert_eq!(cfg.lots_per_order, 2);
        assert_eq!(cfg.exit_hold_secs, 1800);
    }

    #[test]
    fn banknifty_is_not_mistaken_for_nifty() {
        let cfg = RuntimeConfig::default();

        let bank = cfg.underlying_for("NSE_FO:BANKNIFTY24OCT52000CE").unwrap();
        assert_eq!(bank.underlying_key, "NSE_INDEX|Nifty Bank");
        assert_eq!(bank.lot_size, 15);

        let nifty = cfg.underlying_for("NSE_FO:nifty24oct25000pe").unwrap();
        assert_eq!(nifty.underlying_key, "NSE_INDEX|Nifty 50");
        assert_eq!(nifty.lot_size, 50);

        assert!(cfg.underlying_for("NSE_FO:FINNIFTX").is_none());
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("TICKER_DURATION", "5"),
            ("HOLD_DURATION", "10"),
            ("TRIGGER_BIND_ADDR", "127.0.0.1:9000"),
            ("TRIGGER_ACCOUNT_MODE", "live"),
        ]
        .into_iter()
        .collect();

        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.poll_interval_secs, 5);
        assert_eq!(cfg.exit_hold_secs, 600);
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.account_mode, AccountMode::Live);
        assert_eq!(cfg.supervisor_config().poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn invalid_env_overrides_are_ignored() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|k| match k {
            "TICKER_DURATION" => Some("0".into()),
            "HOLD_DURATION" => Some("soon".into()),
            "TRIGGER_ACCOUNT_MODE" => Some("yolo".into()),
            _ => None,
        });

        assert_eq!(cfg.poll_interval_secs, 2);
        assert_eq!(cfg.exit_hold_secs, 1800);
        assert_eq!(cfg.account_mode, AccountMode::Demo);
    }

    #[test]
    fn overflowing_hold_duration_is_ignored() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|k| (k == "HOLD_DURATION").then(|| u64::MAX.to_string()));

        assert_eq!(cfg.exit_hold_secs, 1800);
    }

    #[test]
    fn validate_rejects_holds_beyond_a_day() {
        let cfg = RuntimeConfig {
            exit_hold_secs: MAX_HOLD_SECS + 1,
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = RuntimeConfig {
            entry_hold_secs: u64::MAX,
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_fractions() {
        let cfg = RuntimeConfig {
            near_stop_fraction: 1.5,
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
