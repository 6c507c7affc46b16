// =============================================================================
// Request Validation — bracket, partial and modification rules
// =============================================================================
//
// Everything here is pure and runs before any watcher is registered, so a
// rejected request has no side effects.
//
// Orientation follows the bracket: target above entry is long, below is
// short. "Further" and "tighter" are always measured in that orientation.
// =============================================================================

use crate::watcher::condition::is_long;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be a positive finite price, got {value}")]
    InvalidPrice { field: &'static str, value: f64 },

    #[error("target {target} and stoploss {stoploss} must lie on opposite sides of entry {entry}")]
    NotStraddled {
        entry: f64,
        target: f64,
        stoploss: f64,
    },

    #[error("reward:risk {ratio:.2} is below the minimum {min:.2}")]
    RewardRisk { ratio: f64, min: f64 },

    #[error("reaffirmation {reaffirmation} must lie strictly between entry {entry} and target {target}")]
    ReaffirmationOutOfRange {
        entry: f64,
        target: f64,
        reaffirmation: f64,
    },

    #[error("new target {new_target} is closer than target {target}")]
    NewTargetCloser { target: f64, new_target: f64 },

    #[error("new stoploss {new_stoploss} is looser than stoploss {stoploss}")]
    NewStoplossLooser { stoploss: f64, new_stoploss: f64 },

    #[error("target and stoploss must differ")]
    TargetEqualsStoploss,

    #[error("modification would flip the exit between long and short")]
    OrientationChanged,

    #[error("target may only move further in the profit direction ({old} -> {new})")]
    TargetRetreated { old: f64, new: f64 },

    #[error("stoploss may only tighten ({old} -> {new})")]
    StoplossLoosened { old: f64, new: f64 },

    #[error("neither target nor stoploss changed")]
    NoChange,

    #[error("only {captured:.0}% of the move to target captured, {required:.0}% required to tighten stoploss")]
    InsufficientCapture { captured: f64, required: f64 },

    #[error("current price {price} already breaches the new thresholds")]
    AlreadyBreached { price: f64 },

    #[error("duration of {minutes} minutes is out of range")]
    HoldOutOfRange { minutes: u64 },
}

fn price(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ValidationError::InvalidPrice { field, value })
    }
}

/// Target and stoploss straddle entry with at least `min_reward_risk`.
pub fn validate_bracket(
    entry: f64,
    target: f64,
    stoploss: f64,
    min_reward_risk: f64,
) -> Result<(), ValidationError> {
    price("entry", entry)?;
    price("target", target)?;
    price("stoploss", stoploss)?;

    let straddled = (target > entry && stoploss < entry) || (target < entry && stoploss > entry);
    if !straddled {
        return Err(ValidationError::NotStraddled {
            entry,
            target,
            stoploss,
        });
    }

    let ratio = (target - entry).abs() / (entry - stoploss).abs();
    if ratio < min_reward_risk {
        return Err(ValidationError::RewardRisk {
            ratio,
            min: min_reward_risk,
        });
    }
    Ok(())
}

/// Thresholds of a partial order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialThresholds {
    pub entry: f64,
    pub target: f64,
    pub stoploss: f64,
    pub reaffirmation: f64,
    pub new_target: f64,
    pub new_stoploss: f64,
}

pub fn validate_partial(t: &PartialThresholds, min_reward_risk: f64) -> Result<(), ValidationError> {
    validate_bracket(t.entry, t.target, t.stoploss, min_reward_risk)?;
    price("reaffirmation", t.reaffirmation)?;

    let long = is_long(t.target, t.stoploss);
    let between = if long {
        t.entry < t.reaffirmation && t.reaffirmation < t.target
    } else {
        t.target < t.reaffirmation && t.reaffirmation < t.entry
    };
    if !between {
        return Err(ValidationError::ReaffirmationOutOfRange {
            entry: t.entry,
            target: t.target,
            reaffirmation: t.reaffirmation,
        });
    }

    validate_bracket(t.reaffirmation, t.new_target, t.new_stoploss, min_reward_risk)?;

    let target_ok = if long {
        t.new_target >= t.target
    } else {
        t.new_target <= t.target
    };
    if !target_ok {
        return Err(ValidationError::NewTargetCloser {
            target: t.target,
            new_target: t.new_target,
        });
    }

    let stoploss_ok = if long {
        t.new_stoploss >= t.stoploss
    } else {
        t.new_stoploss <= t.stoploss
    };
    if !stoploss_ok {
        return Err(ValidationError::NewStoplossLooser {
            stoploss: t.stoploss,
            new_stoploss: t.new_stoploss,
        });
    }
    Ok(())
}

/// Current thresholds of a live exit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitLevels {
    pub target: f64,
    pub stoploss: f64,
    pub reference: f64,
}

/// A trailing modification may only lock in more: the target moves further
/// out, the stoploss moves closer, and the stoploss may only move once the
/// current price `ltp` has covered `min_capture_fraction` of the distance
/// from `reference` to the old target.
pub fn validate_modification(
    current: &ExitLevels,
    new_target: f64,
    new_stoploss: f64,
    ltp: f64,
    min_capture_fraction: f64,
) -> Result<(), ValidationError> {
    price("target", new_target)?;
    price("stoploss", new_stoploss)?;
    if new_target == new_stoploss {
        return Err(ValidationError::TargetEqualsStoploss);
    }

    let long = is_long(current.target, current.stoploss);
    if long != is_long(new_target, new_stoploss) {
        return Err(ValidationError::OrientationChanged);
    }

    // Signed so that positive always means "in the profit direction".
    let sign = if long { 1.0 } else { -1.0 };
    let target_move = sign * (new_target - current.target);
    let stoploss_move = sign * (new_stoploss - current.stoploss);

    if target_move < 0.0 {
        return Err(ValidationError::TargetRetreated {
            old: current.target,
            new: new_target,
        });
    }
    if stoploss_move < 0.0 {
        return Err(ValidationError::StoplossLoosened {
            old: current.stoploss,
            new: new_stoploss,
        });
    }
    if target_move == 0.0 && stoploss_move == 0.0 {
        return Err(ValidationError::NoChange);
    }

    if stoploss_move > 0.0 {
        let distance = sign * (current.target - current.reference);
        let captured = if distance > 0.0 {
            sign * (ltp - current.reference) / distance
        } else {
            0.0
        };
        if captured < min_capture_fraction {
            return Err(ValidationError::InsufficientCapture {
                captured: captured * 100.0,
                required: min_capture_fraction * 100.0,
            });
        }
    }

    let inside = if long {
        new_stoploss < ltp && ltp < new_target
    } else {
        new_target < ltp && ltp < new_stoploss
    };
    if !inside {
        return Err(ValidationError::AlreadyBreached { price: ltp });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial() -> PartialThresholds {
        PartialThresholds {
            entry: 100.0,
            target: 110.0,
            stoploss: 95.0,
            reaffirmation: 104.0,
            new_target: 115.0,
            new_stoploss: 100.0,
        }
    }

    fn long_exit() -> ExitLevels {
        ExitLevels {
            target: 110.0,
            stoploss: 95.0,
            reference: 100.0,
        }
    }

    #[test]
    fn bracket_accepts_long_and_short() {
        assert!(validate_bracket(100.0, 110.0, 95.0, 1.0).is_ok());
        assert!(validate_bracket(100.0, 90.0, 105.0, 1.0).is_ok());
    }

    #[test]
    fn bracket_rejects_same_side() {
        assert!(matches!(
            validate_bracket(100.0, 110.0, 105.0, 1.0),
            Err(ValidationError::NotStraddled { .. })
        ));
    }

    #[test]
    fn bracket_rejects_sub_one_to_one() {
        let err = validate_bracket(100.0, 104.0, 95.0, 1.0).unwrap_err();
        assert!(matches!(err, ValidationError::RewardRisk { ratio, .. } if (ratio - 0.8).abs() < 1e-9));
    }

    #[test]
    fn bracket_rejects_garbage() {
        assert!(matches!(
            validate_bracket(0.0, 110.0, 95.0, 1.0),
            Err(ValidationError::InvalidPrice { field: "entry", .. })
        ));
    }

    #[test]
    fn partial_accepts_reference_scenario() {
        assert!(validate_partial(&partial(), 1.0).is_ok());
    }

    #[test]
    fn partial_reaffirmation_must_be_between_entry_and_target() {
        let t = PartialThresholds {
            reaffirmation: 110.0,
            ..partial()
        };
        assert!(matches!(
            validate_partial(&t, 1.0),
            Err(ValidationError::ReaffirmationOutOfRange { .. })
        ));
    }

    #[test]
    fn partial_new_target_must_not_be_closer() {
        let t = PartialThresholds {
            new_target: 109.0,
            ..partial()
        };
        assert!(matches!(
            validate_partial(&t, 1.0),
            Err(ValidationError::NewTargetCloser { .. })
        ));
    }

    #[test]
    fn partial_new_stoploss_must_not_be_looser() {
        let t = PartialThresholds {
            new_stoploss: 94.0,
            new_target: 125.0,
            ..partial()
        };
        assert!(matches!(
            validate_partial(&t, 1.0),
            Err(ValidationError::NewStoplossLooser { .. })
        ));
    }

    #[test]
    fn partial_reaffirmation_leg_needs_reward_risk() {
        // 104 -> 110 reward 6, 104 -> 96 risk 8.
        let t = PartialThresholds {
            new_target: 110.0,
            new_stoploss: 96.0,
            ..partial()
        };
        assert!(matches!(
            validate_partial(&t, 1.0),
            Err(ValidationError::RewardRisk { .. })
        ));
    }

    #[test]
    fn modify_extends_target_without_capture() {
        assert!(validate_modification(&long_exit(), 115.0, 95.0, 101.0, 0.5).is_ok());
    }

    #[test]
    fn modify_tightens_stoploss_after_capture() {
        // 106 is 60% of the way from 100 to 110.
        assert!(validate_modification(&long_exit(), 110.0, 100.0, 106.0, 0.5).is_ok());
    }

    #[test]
    fn modify_refuses_premature_tightening() {
        let err = validate_modification(&long_exit(), 112.0, 100.0, 102.0, 0.5).unwrap_err();
        assert!(matches!(err, ValidationError::InsufficientCapture { .. }));
    }

    #[test]
    fn modify_refuses_retreat_and_loosening() {
        assert!(matches!(
            validate_modification(&long_exit(), 108.0, 95.0, 106.0, 0.5),
            Err(ValidationError::TargetRetreated { .. })
        ));
        assert!(matches!(
            validate_modification(&long_exit(), 112.0, 90.0, 106.0, 0.5),
            Err(ValidationError::StoplossLoosened { .. })
        ));
    }

    #[test]
    fn modify_refuses_no_change_and_flip() {
        assert_eq!(
            validate_modification(&long_exit(), 110.0, 95.0, 106.0, 0.5),
            Err(ValidationError::NoChange)
        );
        assert_eq!(
            validate_modification(&long_exit(), 95.0, 110.0, 106.0, 0.5),
            Err(ValidationError::OrientationChanged)
        );
    }

    #[test]
    fn modify_short_exit_mirrors_long() {
        let short = ExitLevels {
            target: 90.0,
            stoploss: 105.0,
            reference: 100.0,
        };
        assert!(validate_modification(&short, 88.0, 100.0, 94.0, 0.5).is_ok());
        assert!(matches!(
            validate_modification(&short, 88.0, 100.0, 98.0, 0.5),
            Err(ValidationError::InsufficientCapture { .. })
        ));
    }

    #[test]
    fn modify_refuses_thresholds_the_price_already_crossed() {
        assert_eq!(
            validate_modification(&long_exit(), 110.0, 107.0, 106.0, 0.5),
            Err(ValidationError::AlreadyBreached { price: 106.0 })
        );
    }
}
