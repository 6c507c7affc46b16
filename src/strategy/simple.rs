//! Simple underlying-trigger order: one entry, then one exit for the same
//! quantity.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, info_span, Instrument as _};

use super::paper::PaperPosition;
use super::validation::validate_bracket;
use super::{
    exit_hold, fill_level, follow_exit, register_exit, resolve_instrument, ChainReport,
    Instrument, Placement, StrategyError,
};
use crate::app_state::AppState;
use crate::supervisor::WatcherTicket;
use crate::watcher::{Hold, WatcherSpec};

/// Parameters of `POST /order/place/ut`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UtOrder {
    pub instrument_key: String,
    pub entry: f64,
    pub target: f64,
    pub stoploss: f64,
    /// Exit hold in minutes.
    #[serde(default)]
    pub duration: Option<u64>,
}

/// Validate, resolve the instrument and register the entry watcher. The exit
/// is registered by the returned task once the entry fills.
pub async fn place_ut(state: Arc<AppState>, order: UtOrder) -> Result<Placement, StrategyError> {
    validate_bracket(
        order.entry,
        order.target,
        order.stoploss,
        state.config.min_reward_risk,
    )?;
    let hold = exit_hold(order.duration)?;
    let instrument = resolve_instrument(&state, &order.instrument_key).await?;

    let entry = state.supervisor.register(
        WatcherSpec::entry(
            &instrument.instrument_key,
            &instrument.underlying_key,
            instrument.quantity,
            order.entry,
        )
        .with_tag("ut-entry"),
    )?;
    let id = entry.id().to_string();

    info!(
        id = %id,
        trading_symbol = %instrument.trading_symbol,
        quantity = instrument.quantity,
        entry = order.entry,
        target = order.target,
        stoploss = order.stoploss,
        "ut order accepted"
    );

    let span = info_span!("ut", entry_id = %id);
    let task = tokio::spawn(run_ut_chain(state, instrument, order, hold, entry).instrument(span));
    Ok(Placement { id, task })
}

async fn run_ut_chain(
    state: Arc<AppState>,
    instrument: Instrument,
    order: UtOrder,
    hold: Hold,
    entry: WatcherTicket,
) -> ChainReport {
    let outcome = entry.outcome().await;
    if !outcome.is_filled() {
        info!(%outcome, "entry not filled, nothing to exit");
        return ChainReport::NoEntry(outcome);
    }

    let spec = WatcherSpec::exit(
        &instrument.instrument_key,
        &instrument.underlying_key,
        instrument.quantity,
        order.target,
        order.stoploss,
        fill_level(&outcome, order.entry),
    )
    .with_hold(hold)
    .with_tag("ut-exit");
    let paper = PaperPosition::opened(&outcome, instrument.quantity);

    match register_exit(&state, spec) {
        Ok(ticket) => ChainReport::Exited(vec![follow_exit(ticket, paper).await]),
        Err(e) => ChainReport::Failed(e.to_string()),
    }
}
