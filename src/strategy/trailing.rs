// =============================================================================
// Trailing Exit — modify a live exit's target/stoploss
// =============================================================================
//
// Watchers are immutable, so a modification is cancel-old + register-new:
//
//   1. Lookup: the id must name a live Exit.
//   2. Validate the new thresholds against the old ones and the current LTP.
//   3. CancelAndWait on the old exit; this request must be the one that
//      cancelled it. If it fired first, nothing is registered.
//   4. Register the replacement with the same instrument, quantity and
//      reference, and the *old* deadline.
//
// Step 4 never runs before step 3 has observed the old exit's outcome, so two
// exits can never be live for one position.
// =============================================================================

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};

use super::validation::{validate_modification, ExitLevels};
use super::{follow_exit, register_exit, ChainReport, Placement, StrategyError};
use crate::app_state::AppState;
use crate::supervisor::CancelAck;
use crate::watcher::{CancelReason, Hold, Outcome, Thresholds, WatcherSpec};

/// Parameters of `POST /order/modify`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModifyRequest {
    pub id: String,
    pub target: f64,
    pub stoploss: f64,
}

pub async fn modify_exit(
    state: Arc<AppState>,
    request: ModifyRequest,
) -> Result<Placement, StrategyError> {
    let ModifyRequest {
        id,
        target,
        stoploss,
    } = request;

    let snapshot = state
        .supervisor
        .lookup(&id)
        .await?
        .ok_or_else(|| StrategyError::NoSuchExit(id.clone()))?;

    let Thresholds::Exit {
        target: old_target,
        stoploss: old_stoploss,
        reference,
    } = snapshot.thresholds
    else {
        return Err(StrategyError::NoSuchExit(id));
    };

    let ltp = state.feed.last_price(&snapshot.underlying_key).await?;
    let current = ExitLevels {
        target: old_target,
        stoploss: old_stoploss,
        reference,
    };
    validate_modification(&current, target, stoploss, ltp, state.config.min_capture_fraction)?;

    let ack = state.supervisor.cancel_and_wait(&id).await?;
    confirm_cancelled(&id, ack)?;

    let replacement = WatcherSpec::exit(
        snapshot.instrument_key,
        snapshot.underlying_key,
        snapshot.quantity,
        target,
        stoploss,
        reference,
    )
    .with_hold(Hold::Until(snapshot.deadline))
    .with_tag("trailing");
    let ticket = register_exit(&state, replacement)?;
    let new_id = ticket.id().to_string();

    info!(
        replaced = %id,
        id = %new_id,
        old_target,
        old_stoploss,
        target,
        stoploss,
        ltp,
        "exit modified"
    );

    let span = info_span!("trailing", exit_id = %new_id);
    let task = tokio::spawn(
        async move { ChainReport::Exited(vec![follow_exit(ticket, None).await]) }.instrument(span),
    );
    Ok(Placement { id: new_id, task })
}

/// Only a cancel this request itself delivered makes the position ours to
/// re-protect.
fn confirm_cancelled(id: &str, ack: CancelAck) -> Result<(), StrategyError> {
    match ack {
        CancelAck::Resolved {
            outcome: Outcome::Cancelled(CancelReason::Requested),
            initiated: true,
        } => Ok(()),
        CancelAck::NotFound => Err(StrategyError::AlreadyResolved(id.to_string())),
        CancelAck::Resolved { outcome, initiated } => {
            warn!(id, %outcome, initiated, "exit resolved before it could be replaced");
            Err(StrategyError::AlreadyResolved(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OrderAck;
    use crate::execution::ExecutionResult;
    use crate::strategy::testing::*;
    use crate::strategy::ValidationError;
    use crate::types::WatcherKind;
    use crate::watcher::{Trigger, TriggerCause};

    fn long_exit() -> WatcherSpec {
        WatcherSpec::exit(OPTION, INDEX, 15, 110.0, 95.0, 100.0)
    }

    fn modify(id: &str, target: f64, stoploss: f64) -> ModifyRequest {
        ModifyRequest {
            id: id.to_string(),
            target,
            stoploss,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replaces_exit_after_old_one_is_cancelled() {
        let h = harness();
        h.feed.set_price(INDEX, 106.0);
        let old = h.state.supervisor.register(long_exit()).unwrap();
        let old_id = old.id().to_string();
        let old_expiry = h
            .state
            .supervisor
            .lookup(&old_id)
            .await
            .unwrap()
            .unwrap()
            .deadline;

        let placement = modify_exit(h.state.clone(), modify(&old_id, 112.0, 100.0))
            .await
            .unwrap();

        assert_eq!(old.outcome().await, Outcome::Cancelled(CancelReason::Requested));
        assert_eq!(h.state.supervisor.lookup(&old_id).await.unwrap(), None);

        let new = h
            .state
            .supervisor
            .lookup(&placement.id)
            .await
            .unwrap()
            .expect("replacement is live");
        assert_ne!(new.id, old_id);
        assert_eq!(new.kind, WatcherKind::Exit);
        assert_eq!(new.quantity, 15);
        assert_eq!(new.tag, "trailing");
        assert_eq!(
            new.thresholds,
            Thresholds::Exit {
                target: 112.0,
                stoploss: 100.0,
                reference: 100.0
            }
        );
        assert_eq!(new.deadline, old_expiry);
        assert_eq!(h.gateway.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn premature_tightening_leaves_old_exit_live() {
        let h = harness();
        h.feed.set_price(INDEX, 102.0);
        let old = h.state.supervisor.register(long_exit()).unwrap();

        let err = modify_exit(h.state.clone(), modify(old.id(), 112.0, 100.0))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StrategyError::Validation(ValidationError::InsufficientCapture { .. })
        ));
        assert!(h.state.supervisor.lookup(old.id()).await.unwrap().is_some());
        assert_eq!(h.state.supervisor.list_all().await.unwrap().exits.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_id_is_no_such_exit() {
        let h = harness();
        let err = modify_exit(h.state.clone(), modify("nope", 112.0, 100.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::NoSuchExit(id) if id == "nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_watcher_is_not_an_exit() {
        let h = harness();
        h.feed.set_price(INDEX, 105.0);
        let entry = h
            .state
            .supervisor
            .register(WatcherSpec::entry(OPTION, INDEX, 15, 100.0))
            .unwrap();

        let err = modify_exit(h.state.clone(), modify(entry.id(), 112.0, 100.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::NoSuchExit(_)));
        assert!(h.state.supervisor.lookup(entry.id()).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn second_modify_of_same_exit_is_not_found() {
        let h = harness();
        h.feed.set_price(INDEX, 106.0);
        let old = h.state.supervisor.register(long_exit()).unwrap();
        let old_id = old.id().to_string();

        modify_exit(h.state.clone(), modify(&old_id, 112.0, 100.0))
            .await
            .unwrap();
        let err = modify_exit(h.state.clone(), modify(&old_id, 115.0, 101.0))
            .await
            .unwrap_err();

        assert!(matches!(err, StrategyError::NoSuchExit(_)));
        assert_eq!(h.state.supervisor.list_all().await.unwrap().exits.len(), 1);
    }

    #[test]
    fn fired_exit_cannot_be_replaced() {
        let fired = Outcome::Triggered(Trigger {
            cause: TriggerCause::Condition,
            price: Some(111.0),
            execution: ExecutionResult::Placed(OrderAck {
                order_id: "x".into(),
            }),
        });

        assert!(confirm_cancelled(
            "w",
            CancelAck::Resolved {
                outcome: Outcome::Cancelled(CancelReason::Requested),
                initiated: true
            }
        )
        .is_ok());
        assert!(matches!(
            confirm_cancelled(
                "w",
                CancelAck::Resolved {
                    outcome: fired,
                    initiated: true
                }
            ),
            Err(StrategyError::AlreadyResolved(_))
        ));
        assert!(matches!(
            confirm_cancelled(
                "w",
                CancelAck::Resolved {
                    outcome: Outcome::Cancelled(CancelReason::Requested),
                    initiated: false
                }
            ),
            Err(StrategyError::AlreadyResolved(_))
        ));
        assert!(matches!(
            confirm_cancelled("w", CancelAck::NotFound),
            Err(StrategyError::AlreadyResolved(_))
        ));
    }
}
