// =============================================================================
// Watcher Task — the per-watcher polling loop
// =============================================================================
//
// Spawned by the supervisor, one per registered watcher:
//
//   1. Entry watchers take an arming sample to fix their crossing direction.
//   2. Every poll interval, fetch the underlying's LTP (bounded by the poll
//      interval itself) and evaluate the predicate. Failed fetches skip.
//   3. Before acting, ask the supervisor for fire permission. A pending
//      cancel or a race-group sibling that already fired denies it.
//   4. Report exactly one `Resolved` event, even on panic.
//
// Cancellation and the deadline are checked ahead of the tick on every wake.
// =============================================================================

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::condition::{exit_is_met, EntryDirection};
use super::{CancelReason, Outcome, Thresholds, Trigger, TriggerCause, WatcherId, WatcherSpec};
use crate::broker::PriceFeed;
use crate::execution::ExecutionEngine;

/// Events a watcher task sends back to its supervisor.
#[derive(Debug)]
pub(crate) enum TaskEvent {
    /// Ask whether this watcher may place its order now.
    FireRequest {
        id: WatcherId,
        reply: oneshot::Sender<Result<(), CancelReason>>,
    },
    /// Terminal event. Sent exactly once per task.
    Resolved { id: WatcherId, outcome: Outcome },
}

pub(crate) struct WatcherTask {
    pub id: WatcherId,
    pub spec: WatcherSpec,
    pub deadline: Instant,
    pub poll_interval: Duration,
    pub feed: Arc<dyn PriceFeed>,
    pub execution: Arc<ExecutionEngine>,
    pub events: mpsc::UnboundedSender<TaskEvent>,
}

impl WatcherTask {
    pub async fn run(self, cancel: oneshot::Receiver<CancelReason>) {
        let mut guard = ResolveGuard {
            id: self.id.clone(),
            events: self.events.clone(),
            delivered: false,
        };
        let outcome = self.watch(cancel).await;
        guard.deliver(outcome);
    }

    async fn watch(&self, mut cancel: oneshot::Receiver<CancelReason>) -> Outcome {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = sleep_until(self.deadline);
        tokio::pin!(deadline);

        let mut direction = match self.spec.thresholds {
            Thresholds::Entry { entry } => match self.sample().await {
                Some(p0) => Some(self.arm(entry, p0)),
                None => None,
            },
            Thresholds::Exit { .. } => None,
        };
        let mut last_price = None;

        loop {
            tokio::select! {
                biased;

                reason = &mut cancel => {
                    // Sender dropped means the supervisor is gone.
                    let reason = reason.unwrap_or(CancelReason::Shutdown);
                    info!(?reason, "watcher cancelled");
                    return Outcome::Cancelled(reason);
                }

                _ = &mut deadline => return self.on_deadline(last_price).await,

                _ = ticker.tick() => {
                    let Some(price) = self.sample().await else { continue };
                    last_price = Some(price);

                    let met = match self.spec.thresholds {
                        Thresholds::Entry { entry } => match direction {
                            Some(dir) => dir.is_met(entry, price),
                            None => {
                                direction = Some(self.arm(entry, price));
                                false
                            }
                        },
                        Thresholds::Exit { target, stoploss, .. } => {
                            exit_is_met(target, stoploss, price)
                        }
                    };

                    if met {
                        return self.fire(TriggerCause::Condition, Some(price)).await;
                    }
                }
            }
        }
    }

    fn arm(&self, entry: f64, p0: f64) -> EntryDirection {
        let direction = EntryDirection::arm(entry, p0);
        info!(entry, p0, ?direction, "entry watcher armed");
        direction
    }

    /// One bounded LTP fetch. `None` means skip this tick.
    async fn sample(&self) -> Option<f64> {
        let key = self.spec.underlying_key.as_str();
        match timeout(self.poll_interval, self.feed.last_price(key)).await {
            Ok(Ok(price)) => {
                debug!(underlying = key, price, "ltp");
                Some(price)
            }
            Ok(Err(e)) => {
                warn!(underlying = key, error = %e, "price fetch failed, skipping tick");
                None
            }
            Err(_) => {
                warn!(underlying = key, "price fetch timed out, skipping tick");
                None
            }
        }
    }

    async fn on_deadline(&self, last_price: Option<f64>) -> Outcome {
        match self.spec.thresholds {
            Thresholds::Entry { .. } => {
                info!("entry watcher expired without triggering");
                Outcome::Cancelled(CancelReason::Deadline)
            }
            Thresholds::Exit { .. } => {
                info!(?last_price, "exit hold elapsed, forcing exit");
                self.fire(TriggerCause::Deadline, last_price).await
            }
        }
    }

    async fn fire(&self, cause: TriggerCause, price: Option<f64>) -> Outcome {
        if let Err(reason) = self.request_fire().await {
            info!(?cause, ?price, ?reason, "fire permission denied");
            return Outcome::Cancelled(reason);
        }

        let side = self.spec.kind().side();
        info!(?cause, ?price, %side, quantity = self.spec.quantity, "condition met, placing order");

        let execution = self
            .execution
            .execute(&self.spec.instrument_key, side, self.spec.quantity)
            .await;

        Outcome::Triggered(Trigger {
            cause,
            price,
            execution,
        })
    }

    async fn request_fire(&self) -> Result<(), CancelReason> {
        let (reply, verdict) = oneshot::channel();
        self.events
            .send(TaskEvent::FireRequest {
                id: self.id.clone(),
                reply,
            })
            .map_err(|_| CancelReason::Shutdown)?;
        verdict.await.unwrap_or(Err(CancelReason::Shutdown))
    }
}

/// Reports `Cancelled(Aborted)` if the task unwinds before delivering.
struct ResolveGuard {
    id: WatcherId,
    events: mpsc::UnboundedSender<TaskEvent>,
    delivered: bool,
}

impl ResolveGuard {
    fn deliver(&mut self, outcome: Outcome) {
        self.delivered = true;
        let _ = self.events.send(TaskEvent::Resolved {
            id: self.id.clone(),
            outcome,
        });
    }
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        if !self.delivered {
            warn!(id = %self.id, "watcher task ended without an outcome");
            let _ = self.events.send(TaskEvent::Resolved {
                id: self.id.clone(),
                outcome: Outcome::Cancelled(CancelReason::Aborted),
            });
        }
    }
}
