// =============================================================================
// Partial Order — scale in on reaffirmation or near the stop
// =============================================================================
//
//   1. Entry for q at `entry`.
//   2. On fill, race two 2q entries in one race group:
//        near-stop      at entry + near_stop_fraction × (stoploss − entry)
//        reaffirmation  at the caller's reaffirmation level
//   3. First leg to resolve decides:
//        reaffirmation fills → exit q at target/stoploss
//                              + exit 2q at new target/new stoploss
//        near-stop fills     → exit 3q at target/stoploss
//        neither fills       → exit q at target/stoploss
//
// The race group guarantees at most one leg ever places an order; the loser
// is cancelled once and its outcome awaited before any exit is registered.
// =============================================================================

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info, info_span, Instrument as _};
use uuid::Uuid;

use super::paper::PaperPosition;
use super::validation::{validate_partial, PartialThresholds};
use super::{
    exit_hold, fill_level, follow_exit, register_exit, resolve_instrument, ChainReport,
    Instrument, Placement, StrategyError,
};
use crate::app_state::AppState;
use crate::supervisor::WatcherTicket;
use crate::watcher::condition::near_stop_price;
use crate::watcher::{Hold, Outcome, WatcherSpec};

/// Parameters of `POST /order/place/partial`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PartialOrder {
    pub instrument_key: String,
    pub entry: f64,
    pub target: f64,
    pub stoploss: f64,
    pub reaffirmation: f64,
    #[serde(rename = "newTarget")]
    pub new_target: f64,
    #[serde(rename = "newStoploss")]
    pub new_stoploss: f64,
    /// Exit hold in minutes.
    #[serde(default)]
    pub duration: Option<u64>,
}

impl PartialOrder {
    fn thresholds(&self) -> PartialThresholds {
        PartialThresholds {
            entry: self.entry,
            target: self.target,
            stoploss: self.stoploss,
            reaffirmation: self.reaffirmation,
            new_target: self.new_target,
            new_stoploss: self.new_stoploss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    NearStop,
    Reaffirmation,
}

impl Leg {
    fn other(self) -> Self {
        match self {
            Self::NearStop => Self::Reaffirmation,
            Self::Reaffirmation => Self::NearStop,
        }
    }
}

/// What every exit of one partial chain shares.
struct Chain {
    state: Arc<AppState>,
    instrument: Instrument,
    order: PartialOrder,
    hold: Hold,
    /// Underlying level the original q was bought at.
    reference: f64,
    /// Demo-mode position of the original q.
    paper: Option<PaperPosition>,
}

pub async fn place_partial(
    state: Arc<AppState>,
    order: PartialOrder,
) -> Result<Placement, StrategyError> {
    validate_partial(&order.thresholds(), state.config.min_reward_risk)?;
    let hold = exit_hold(order.duration)?;
    let instrument = resolve_instrument(&state, &order.instrument_key).await?;

    let entry = state.supervisor.register(
        WatcherSpec::entry(
            &instrument.instrument_key,
            &instrument.underlying_key,
            instrument.quantity,
            order.entry,
        )
        .with_tag("partial-entry"),
    )?;
    let id = entry.id().to_string();

    info!(
        id = %id,
        trading_symbol = %instrument.trading_symbol,
        quantity = instrument.quantity,
        entry = order.entry,
        reaffirmation = order.reaffirmation,
        "partial order accepted"
    );

    let span = info_span!("partial", entry_id = %id);
    let task = tokio::spawn(run_partial(state, instrument, order, hold, entry).instrument(span));
    Ok(Placement { id, task })
}

async fn run_partial(
    state: Arc<AppState>,
    instrument: Instrument,
    order: PartialOrder,
    hold: Hold,
    entry: WatcherTicket,
) -> ChainReport {
    let q = instrument.quantity;

    let entry_outcome = entry.outcome().await;
    if !entry_outcome.is_filled() {
        info!(outcome = %entry_outcome, "entry not filled, nothing to scale");
        return ChainReport::NoEntry(entry_outcome);
    }
    let chain = Chain {
        reference: fill_level(&entry_outcome, order.entry),
        paper: PaperPosition::opened(&entry_outcome, q),
        state,
        instrument,
        order,
        hold,
    };

    // --- Race the two scale-in legs ------------------------------------------

    let race = Uuid::new_v4().to_string();
    let near_level = near_stop_price(
        chain.order.entry,
        chain.order.stoploss,
        chain.state.config.near_stop_fraction,
    );
    let leg = |level: f64, tag: &str| {
        WatcherSpec::entry(
            &chain.instrument.instrument_key,
            &chain.instrument.underlying_key,
            2 * q,
            level,
        )
        .in_race(&race)
        .with_tag(tag)
    };

    let near = match chain.state.supervisor.register(leg(near_level, "near-stop")) {
        Ok(ticket) => ticket,
        Err(e) => return protect_original(&chain, e.to_string()).await,
    };
    let reaff = match chain
        .state
        .supervisor
        .register(leg(chain.order.reaffirmation, "reaffirmation"))
    {
        Ok(ticket) => ticket,
        Err(e) => {
            cancel_sibling(&chain.state, near.id());
            let near_outcome = near.outcome().await;
            if near_outcome.is_filled() {
                return exit_all(&chain, Leg::NearStop, &near_outcome).await;
            }
            return protect_original(&chain, e.to_string()).await;
        }
    };
    info!(near_level, reaffirmation = chain.order.reaffirmation, race = %race, "scale-in legs armed");

    let near_id = near.id().to_string();
    let reaff_id = reaff.id().to_string();
    let mut near_out = Box::pin(near.outcome());
    let mut reaff_out = Box::pin(reaff.outcome());

    let (first_leg, first, sibling_id, sibling_out) = tokio::select! {
        outcome = &mut near_out => (Leg::NearStop, outcome, reaff_id, reaff_out),
        outcome = &mut reaff_out => (Leg::Reaffirmation, outcome, near_id, near_out),
    };
    info!(leg = ?first_leg, outcome = %first, "first leg resolved");

    // --- Settle the sibling ----------------------------------------------------

    let sibling = if first.is_triggered() {
        // Cancel the loser exactly once and wait for it to be gone.
        cancel_sibling(&chain.state, &sibling_id);
        let sibling = sibling_out.await;
        if sibling.is_triggered() {
            error!(outcome = %sibling, "race sibling fired after a winner");
        }
        sibling
    } else {
        let sibling = sibling_out.await;
        info!(leg = ?first_leg.other(), outcome = %sibling, "second leg resolved");
        sibling
    };

    let winner = if first.is_triggered() {
        first.is_filled().then_some((first_leg, &first))
    } else {
        sibling.is_filled().then_some((first_leg.other(), &sibling))
    };

    let closed = match winner {
        Some((leg, fill)) => exit_all(&chain, leg, fill).await,
        None => {
            info!("no scale-in, exiting original quantity");
            exit_original(&chain).await
        }
    };

    let (near_stop, reaffirmation) = match first_leg {
        Leg::NearStop => (first, sibling),
        Leg::Reaffirmation => (sibling, first),
    };
    ChainReport::Raced {
        near_stop,
        reaffirmation,
        closed: Box::new(closed),
    }
}

/// A closed supervisor resolves the sibling as `Shutdown`, so the outcome
/// await that follows still completes.
fn cancel_sibling(state: &AppState, id: &str) {
    if let Err(e) = state.supervisor.cancel(id) {
        debug!(id, error = %e, "sibling cancel not delivered");
    }
}

/// Exits for the cumulative position after `leg` filled with `fill`.
async fn exit_all(chain: &Chain, leg: Leg, fill: &Outcome) -> ChainReport {
    let order = &chain.order;
    let q = chain.instrument.quantity;
    let scaled = PaperPosition::opened(fill, 2 * q);

    let exits = match leg {
        Leg::NearStop => {
            let paper = chain.paper.clone().zip(scaled).map(|(a, b)| a.add(b));
            vec![(
                exit_spec(chain, 3 * q, order.target, order.stoploss, chain.reference, "near-stop-exit"),
                paper,
            )]
        }
        Leg::Reaffirmation => vec![
            (
                exit_spec(chain, q, order.target, order.stoploss, chain.reference, "partial-exit"),
                chain.paper.clone(),
            ),
            (
                exit_spec(
                    chain,
                    2 * q,
                    order.new_target,
                    order.new_stoploss,
                    order.reaffirmation,
                    "reaffirmation-exit",
                ),
                scaled,
            ),
        ],
    };
    info!(leg = ?leg, exits = exits.len(), "scale-in filled, registering exits");

    let mut tickets = Vec::with_capacity(exits.len());
    let mut failure = None;
    for (spec, paper) in exits {
        match register_exit(&chain.state, spec) {
            Ok(ticket) => tickets.push((ticket, paper)),
            Err(e) => failure = Some(e.to_string()),
        }
    }

    let outcomes = follow_all(tickets).await;
    match failure {
        Some(reason) => ChainReport::Failed(reason),
        None => ChainReport::Exited(outcomes),
    }
}

async fn exit_original(chain: &Chain) -> ChainReport {
    let order = &chain.order;
    let spec = exit_spec(
        chain,
        chain.instrument.quantity,
        order.target,
        order.stoploss,
        chain.reference,
        "partial-exit",
    );
    match register_exit(&chain.state, spec) {
        Ok(ticket) => ChainReport::Exited(vec![follow_exit(ticket, chain.paper.clone()).await]),
        Err(e) => ChainReport::Failed(e.to_string()),
    }
}

/// A leg could not be registered: keep the original position protected.
async fn protect_original(chain: &Chain, reason: String) -> ChainReport {
    error!(reason = %reason, "could not arm scale-in legs");
    match exit_original(chain).await {
        ChainReport::Exited(_) => ChainReport::Failed(reason),
        other => other,
    }
}

fn exit_spec(
    chain: &Chain,
    quantity: u32,
    target: f64,
    stoploss: f64,
    reference: f64,
    tag: &str,
) -> WatcherSpec {
    WatcherSpec::exit(
        &chain.instrument.instrument_key,
        &chain.instrument.underlying_key,
        quantity,
        target,
        stoploss,
        reference,
    )
    .with_hold(chain.hold)
    .with_tag(tag)
}

/// Follow every exit concurrently, keeping registration order.
async fn follow_all(exits: Vec<(WatcherTicket, Option<PaperPosition>)>) -> Vec<Outcome> {
    let handles: Vec<_> = exits
        .into_iter()
        .map(|(ticket, paper)| tokio::spawn(follow_exit(ticket, paper).in_current_span()))
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!(error = %e, "exit follower failed"),
        }
    }
    outcomes
}
