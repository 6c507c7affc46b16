// =============================================================================
// Watcher Supervisor — single owner of every live watcher
// =============================================================================
//
// All registry reads and writes happen inside one task that drains two
// streams:
//
//   commands  — Register / Cancel / Lookup / ListAll / Shutdown from handles
//   events    — FireRequest / Resolved from watcher tasks
//
// A watcher is removed from the registry *before* its outcome is delivered,
// so anyone who has observed an outcome can never see the watcher again.
//
// Fire permission is decided here as well. A watcher with a pending cancel is
// refused, and only the first member of a race group to ask is allowed
// through.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::broker::PriceFeed;
use crate::execution::ExecutionEngine;
use crate::types::WatcherKind;
use crate::watcher::task::{TaskEvent, WatcherTask};
use crate::watcher::{
    ActiveWatchers, CancelReason, Hold, Outcome, WatcherId, WatcherSnapshot, WatcherSpec,
    WatcherSpecError,
};

// -----------------------------------------------------------------------------
// Public types
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    /// Maximum lifetime of an entry watcher.
    pub entry_hold: Duration,
    /// Maximum lifetime of an exit watcher.
    pub exit_hold: Duration,
}

impl SupervisorConfig {
    pub fn max_hold(&self, kind: WatcherKind) -> Duration {
        match kind {
            WatcherKind::Entry => self.entry_hold,
            WatcherKind::Exit => self.exit_hold,
        }
    }

    fn deadline_for(&self, spec: &WatcherSpec, now: Instant) -> Instant {
        let max = self.max_hold(spec.kind());
        match spec.hold {
            Hold::Default => now + max,
            Hold::For(hold) => now + hold.min(max),
            Hold::Until(deadline) => deadline,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("watcher supervisor is not running")]
    Closed,
    #[error("invalid watcher: {0}")]
    InvalidSpec(#[from] WatcherSpecError),
}

/// Reply to [`SupervisorHandle::cancel_and_wait`].
#[derive(Debug, Clone, PartialEq)]
pub enum CancelAck {
    /// No live watcher had that id.
    NotFound,
    /// The watcher's terminal outcome. Not necessarily `Cancelled`: it may
    /// already have fired. `initiated` is true only for the request that
    /// actually delivered the cancel signal.
    Resolved { outcome: Outcome, initiated: bool },
}

/// Returned by `register`. Owns the watcher's one-shot outcome.
#[derive(Debug)]
pub struct WatcherTicket {
    id: WatcherId,
    outcome: oneshot::Receiver<Outcome>,
}

impl WatcherTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the terminal event. A vanished supervisor reads as shutdown.
    pub async fn outcome(self) -> Outcome {
        self.outcome
            .await
            .unwrap_or(Outcome::Cancelled(CancelReason::Shutdown))
    }
}

// -----------------------------------------------------------------------------
// Handle
// -----------------------------------------------------------------------------

enum Command {
    Register {
        id: WatcherId,
        spec: WatcherSpec,
        outcome: oneshot::Sender<Outcome>,
    },
    Cancel {
        id: WatcherId,
        ack: Option<oneshot::Sender<CancelAck>>,
    },
    Lookup {
        id: WatcherId,
        reply: oneshot::Sender<Option<WatcherSnapshot>>,
    },
    ListAll {
        reply: oneshot::Sender<ActiveWatchers>,
    },
    Shutdown,
}

/// Cheap, cloneable front door to the supervisor task.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SupervisorHandle {
    /// Validate and enqueue a watcher. Returns immediately with its ticket.
    pub fn register(&self, spec: WatcherSpec) -> Result<WatcherTicket, SupervisorError> {
        spec.validate()?;

        let id = Uuid::new_v4().to_string();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        self.send(Command::Register {
            id: id.clone(),
            spec,
            outcome: outcome_tx,
        })?;

        Ok(WatcherTicket {
            id,
            outcome: outcome_rx,
        })
    }

    /// Request cancellation. Unknown ids and repeats are no-ops.
    pub fn cancel(&self, id: &str) -> Result<(), SupervisorError> {
        self.send(Command::Cancel {
            id: id.to_string(),
            ack: None,
        })
    }

    /// Request cancellation and wait until the watcher has resolved.
    pub async fn cancel_and_wait(&self, id: &str) -> Result<CancelAck, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Cancel {
            id: id.to_string(),
            ack: Some(tx),
        })?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    pub async fn lookup(&self, id: &str) -> Result<Option<WatcherSnapshot>, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Lookup {
            id: id.to_string(),
            reply: tx,
        })?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    pub async fn list_all(&self) -> Result<ActiveWatchers, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ListAll { reply: tx })?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }

    /// Ask the supervisor to cancel everything and stop. Await the
    /// `JoinHandle` from [`Supervisor::spawn`] to know when it has.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> Result<(), SupervisorError> {
        self.commands
            .send(command)
            .map_err(|_| SupervisorError::Closed)
    }
}

// -----------------------------------------------------------------------------
// Supervisor task
// -----------------------------------------------------------------------------

struct LiveWatcher {
    spec: WatcherSpec,
    registered_at: DateTime<Utc>,
    deadline: Instant,
    /// Taken on first cancel; `None` afterwards.
    cancel: Option<oneshot::Sender<CancelReason>>,
    pending_cancel: Option<CancelReason>,
    outcome: oneshot::Sender<Outcome>,
    /// Pending `cancel_and_wait` replies, with whether each one initiated.
    acks: Vec<(oneshot::Sender<CancelAck>, bool)>,
}

impl LiveWatcher {
    fn request_cancel(&mut self, reason: CancelReason) {
        if let Some(tx) = self.cancel.take() {
            self.pending_cancel = Some(reason);
            let _ = tx.send(reason);
        }
    }

    fn snapshot(&self, id: &str, now: Instant) -> WatcherSnapshot {
        WatcherSnapshot {
            id: id.to_string(),
            kind: self.spec.kind(),
            tag: self.spec.tag.clone(),
            instrument_key: self.spec.instrument_key.clone(),
            underlying_key: self.spec.underlying_key.clone(),
            quantity: self.spec.quantity,
            thresholds: self.spec.thresholds,
            race_group: self.spec.race_group.clone(),
            registered_at: self.registered_at,
            expires_in_secs: self.deadline.saturating_duration_since(now).as_secs(),
            deadline: self.deadline,
        }
    }
}

#[derive(Debug, Default)]
struct RaceGroup {
    winner: Option<WatcherId>,
    live_members: usize,
}

pub struct Supervisor {
    config: SupervisorConfig,
    feed: Arc<dyn PriceFeed>,
    execution: Arc<ExecutionEngine>,
    registry: HashMap<WatcherId, LiveWatcher>,
    races: HashMap<String, RaceGroup>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<TaskEvent>,
    events_rx: mpsc::UnboundedReceiver<TaskEvent>,
    tasks: JoinSet<()>,
    draining: bool,
}

impl Supervisor {
    /// Start the supervisor task.
    pub fn spawn(
        config: SupervisorConfig,
        feed: Arc<dyn PriceFeed>,
        execution: Arc<ExecutionEngine>,
    ) -> (SupervisorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            config,
            feed,
            execution,
            registry: HashMap::new(),
            races: HashMap::new(),
            commands: commands_rx,
            events_tx,
            events_rx,
            tasks: JoinSet::new(),
            draining: false,
        };
        let join = tokio::spawn(supervisor.run());

        (
            SupervisorHandle {
                commands: commands_tx,
            },
            join,
        )
    }

    async fn run(mut self) {
        info!(
            poll_secs = self.config.poll_interval.as_secs_f64(),
            entry_hold_secs = self.config.entry_hold.as_secs(),
            exit_hold_secs = self.config.exit_hold.as_secs(),
            "Watcher supervisor started"
        );

        loop {
            tokio::select! {
                // Task events first so resolutions land before new commands.
                biased;

                Some(event) = self.events_rx.recv() => self.on_task_event(event),

                command = self.commands.recv(), if !self.draining => match command {
                    Some(command) => self.on_command(command),
                    None => self.begin_drain(),
                },

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "watcher task failed");
                    }
                }
            }

            if self.draining && self.registry.is_empty() {
                break;
            }
        }

        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "watcher task failed during shutdown");
            }
        }
        info!("Watcher supervisor stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Register { id, spec, outcome } => self.register(id, spec, outcome),
            Command::Cancel { id, ack } => self.cancel(&id, ack),
            Command::Lookup { id, reply } => {
                let now = Instant::now();
                let snapshot = self.registry.get(&id).map(|w| w.snapshot(&id, now));
                let _ = reply.send(snapshot);
            }
            Command::ListAll { reply } => {
                let now = Instant::now();
                let mut active = ActiveWatchers::default();
                for (id, watcher) in &self.registry {
                    let snapshot = watcher.snapshot(id, now);
                    match snapshot.kind {
                        WatcherKind::Entry => active.entries.push(snapshot),
                        WatcherKind::Exit => active.exits.push(snapshot),
                    }
                }
                active.entries.sort_by_key(|s| s.registered_at);
                active.exits.sort_by_key(|s| s.registered_at);
                let _ = reply.send(active);
            }
            Command::Shutdown => self.begin_drain(),
        }
    }

    fn register(&mut self, id: WatcherId, spec: WatcherSpec, outcome: oneshot::Sender<Outcome>) {
        if self.registry.contains_key(&id) {
            warn!(id = %id, "duplicate watcher id rejected");
            let _ = outcome.send(Outcome::Cancelled(CancelReason::Rejected));
            return;
        }

        let now = Instant::now();
        let deadline = self.config.deadline_for(&spec, now);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        if let Some(group) = &spec.race_group {
            self.races.entry(group.clone()).or_default().live_members += 1;
        }

        let task = WatcherTask {
            id: id.clone(),
            spec: spec.clone(),
            deadline,
            poll_interval: self.config.poll_interval,
            feed: Arc::clone(&self.feed),
            execution: Arc::clone(&self.execution),
            events: self.events_tx.clone(),
        };
        let span = info_span!("watcher", id = %id, kind = %spec.kind(), tag = %spec.tag);
        self.tasks.spawn(task.run(cancel_rx).instrument(span));

        info!(
            id = %id,
            kind = %spec.kind(),
            tag = %spec.tag,
            instrument_key = %spec.instrument_key,
            underlying_key = %spec.underlying_key,
            quantity = spec.quantity,
            thresholds = ?spec.thresholds,
            race_group = ?spec.race_group,
            hold_secs = deadline.saturating_duration_since(now).as_secs(),
            "watcher registered"
        );

        self.registry.insert(
            id,
            LiveWatcher {
                spec,
                registered_at: Utc::now(),
                deadline,
                cancel: Some(cancel_tx),
                pending_cancel: None,
                outcome,
                acks: Vec::new(),
            },
        );
    }

    fn cancel(&mut self, id: &str, ack: Option<oneshot::Sender<CancelAck>>) {
        match self.registry.get_mut(id) {
            Some(watcher) => {
                let initiated = watcher.cancel.is_some();
                watcher.request_cancel(CancelReason::Requested);
                if let Some(ack) = ack {
                    watcher.acks.push((ack, initiated));
                }
                debug!(id, "cancel requested");
            }
            None => {
                debug!(id, "cancel for unknown watcher ignored");
                if let Some(ack) = ack {
                    let _ = ack.send(CancelAck::NotFound);
                }
            }
        }
    }

    fn begin_drain(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        info!(live = self.registry.len(), "Watcher supervisor shutting down");
        for watcher in self.registry.values_mut() {
            watcher.request_cancel(CancelReason::Shutdown);
        }
    }

    fn on_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::FireRequest { id, reply } => {
                let verdict = self.fire_permission(&id);
                let _ = reply.send(verdict);
            }
            TaskEvent::Resolved { id, outcome } => self.resolve(id, outcome),
        }
    }

    fn fire_permission(&mut self, id: &str) -> Result<(), CancelReason> {
        let Some(watcher) = self.registry.get(id) else {
            warn!(id, "fire request from unregistered watcher");
            return Err(CancelReason::Aborted);
        };

        if let Some(reason) = watcher.pending_cancel {
            return Err(reason);
        }

        let Some(group) = &watcher.spec.race_group else {
            return Ok(());
        };

        let race = self.races.entry(group.clone()).or_default();
        match &race.winner {
            None => {
                race.winner = Some(id.to_string());
                info!(id, race_group = %group, "race group won");
                Ok(())
            }
            Some(winner) if winner == id => Ok(()),
            Some(winner) => {
                info!(id, race_group = %group, winner = %winner, "race already won, superseded");
                Err(CancelReason::Superseded)
            }
        }
    }

    fn resolve(&mut self, id: WatcherId, outcome: Outcome) {
        // Deregister first: nobody may observe the watcher after its outcome.
        let Some(watcher) = self.registry.remove(&id) else {
            warn!(id = %id, "resolution for unknown watcher dropped");
            return;
        };

        if let Some(group) = &watcher.spec.race_group {
            if let Some(race) = self.races.get_mut(group) {
                race.live_members = race.live_members.saturating_sub(1);
                if race.live_members == 0 {
                    self.races.remove(group);
                }
            }
        }

        info!(id = %id, tag = %watcher.spec.tag, outcome = %outcome, "watcher resolved");

        for (ack, initiated) in watcher.acks {
            let _ = ack.send(CancelAck::Resolved {
                outcome: outcome.clone(),
                initiated,
            });
        }
        if watcher.outcome.send(outcome).is_err() {
            debug!(id = %id, "outcome receiver already dropped");
        }
    }
}
