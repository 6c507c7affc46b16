//! Trigger predicates. Pure functions so the direction laws can be tested
//! without a runtime.

use serde::Serialize;

/// Which way the underlying must cross an entry level. Fixed once, at arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryDirection {
    /// Armed above the level: fires when `price <= entry`.
    FallThrough,
    /// Armed at or below the level: fires when `price > entry`.
    RiseThrough,
}

impl EntryDirection {
    /// Pick the direction from the first observed price `p0`.
    pub fn arm(entry: f64, p0: f64) -> Self {
        if entry < p0 {
            Self::FallThrough
        } else {
            Self::RiseThrough
        }
    }

    pub fn is_met(self, entry: f64, price: f64) -> bool {
        match self {
            Self::FallThrough => price <= entry,
            Self::RiseThrough => price > entry,
        }
    }
}

/// A long exit has its target above the stoploss.
pub fn is_long(target: f64, stoploss: f64) -> bool {
    target > stoploss
}

/// Exit fires on reaching either side of the bracket.
pub fn exit_is_met(target: f64, stoploss: f64, price: f64) -> bool {
    if is_long(target, stoploss) {
        price >= target || price <= stoploss
    } else {
        price <= target || price >= stoploss
    }
}

/// Level `fraction` of the way from `entry` towards `stoploss`.
pub fn near_stop_price(entry: f64, stoploss: f64, fraction: f64) -> f64 {
    entry + fraction * (stoploss - entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armed_above_waits_for_fall() {
        let dir = EntryDirection::arm(100.0, 105.0);
        assert_eq!(dir, EntryDirection::FallThrough);
        assert!(!dir.is_met(100.0, 100.01));
        assert!(dir.is_met(100.0, 100.0));
        assert!(dir.is_met(100.0, 90.0));
    }

    #[test]
    fn armed_below_waits_for_strict_rise() {
        let dir = EntryDirection::arm(105.0, 100.0);
        assert_eq!(dir, EntryDirection::RiseThrough);
        assert!(!dir.is_met(105.0, 105.0));
        assert!(dir.is_met(105.0, 105.5));
    }

    #[test]
    fn armed_exactly_at_level_is_rise_through() {
        // Sitting on the level does not count as crossing it.
        let dir = EntryDirection::arm(100.0, 100.0);
        assert_eq!(dir, EntryDirection::RiseThrough);
        assert!(!dir.is_met(100.0, 100.0));
    }

    #[test]
    fn long_exit_bracket() {
        assert!(!exit_is_met(110.0, 95.0, 100.0));
        assert!(exit_is_met(110.0, 95.0, 110.0));
        assert!(exit_is_met(110.0, 95.0, 111.0));
        assert!(exit_is_met(110.0, 95.0, 95.0));
        assert!(exit_is_met(110.0, 95.0, 80.0));
    }

    #[test]
    fn short_exit_bracket() {
        assert!(!exit_is_met(90.0, 105.0, 100.0));
        assert!(exit_is_met(90.0, 105.0, 89.0));
        assert!(exit_is_met(90.0, 105.0, 105.0));
    }

    #[test]
    fn near_stop_is_ninety_percent_of_the_way() {
        let p = near_stop_price(100.0, 95.0, 0.9);
        assert!((p - 95.5).abs() < 1e-9);
    }
}
