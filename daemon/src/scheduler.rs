use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::config::{Config, StreamRecord};
use crate::event::{DaemonEvent, StreamEvent};
use crate::liveness::{CheckArgs, LivenessChecker};
use crate::resolver::StreamResolver;

/// Loop cadence. Independent of `check_interval`; it only bounds how quickly
/// pause/resume/stop and newly due streams are noticed.
pub const TICK_INTERVAL_MS: u64 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Paused,
    /// Terminal: the loop has been asked to exit.
    Stopped,
}

/// What the scheduler knows about one URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorState {
    /// `None` means never checked, which sorts before every timestamp.
    pub last_checked: Option<Instant>,
    pub is_online: bool,
}

/// Per-URL monitor state plus the selection and edge-detection rules.
#[derive(Debug, Default)]
pub struct MonitorTable {
    states: HashMap<String, MonitorState>,
}

impl MonitorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> MonitorState {
        self.states.get(url).copied().unwrap_or_default()
    }

    pub fn is_online(&self, url: &str) -> bool {
        self.get(url).is_online
    }

    /// Never-checked streams are always eligible; others once `interval`
    /// has elapsed since their last check. Always-on streams never are.
    pub fn is_eligible(&self, record: &StreamRecord, now: Instant, interval: Duration) -> bool {
        if record.is_always_on() || record.url.trim().is_empty() {
            return false;
        }
        match self.get(&record.url).last_checked {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= interval,
        }
    }

    /// The eligible stream checked longest ago, if any. Ties go to the first
    /// stream in iteration order.
    pub fn select_due<'a, I>(&self, streams: I, now: Instant, interval: Duration) -> Option<&'a StreamRecord>
    where
        I: IntoIterator<Item = &'a StreamRecord>,
    {
        streams
            .into_iter()
            .filter(|r| self.is_eligible(r, now, interval))
            .min_by_key(|r| self.get(&r.url).last_checked)
    }

    /// Records a check result and returns the transition it caused, if any.
    /// A first observation counts as coming from offline.
    pub fn observe(&mut self, record: &StreamRecord, is_online: bool, now: Instant) -> Option<StreamEvent> {
        let state = self.states.entry(record.url.clone()).or_default();
        let was_online = state.is_online;
        state.last_checked = Some(now);
        state.is_online = is_online;

        match (was_online, is_online) {
            (false, true) => Some(StreamEvent::Online(record.clone())),
            (true, false) => Some(StreamEvent::Offline(record.clone())),
            _ => None,
        }
    }

    /// Drops state for URLs that are no longer configured, so a URL that is
    /// removed and added back starts over as never checked.
    pub fn retain_configured(&mut self, config: &Config) {
        self.states.retain(|url, _| config.streams.contains_key(url));
    }

    /// Online streams sorted by type, then display name.
    pub fn online<'a>(&self, config: &'a Config) -> Vec<&'a StreamRecord> {
        let mut online: Vec<&StreamRecord> = config
            .streams
            .values()
            .filter(|r| !r.is_always_on() && self.is_online(&r.url))
            .collect();
        online.sort_by(|a, b| {
            (a.kind(), a.display_name()).cmp(&(b.kind(), b.display_name()))
        });
        online
    }
}

/// Read-only view published after every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub run_state: RunState,
    /// Sorted by type, then name.
    pub online: Vec<StreamRecord>,
    pub always_on: Vec<StreamRecord>,
    /// Online streams whose effective `notify` flag is set.
    pub notify_count: usize,
}

impl MonitorSnapshot {
    fn empty(run_state: RunState) -> Self {
        Self {
            run_state,
            online: Vec::new(),
            always_on: Vec::new(),
            notify_count: 0,
        }
    }

    pub fn live_count(&self) -> usize {
        self.online.len()
    }

    pub fn is_paused(&self) -> bool {
        self.run_state == RunState::Paused
    }
}

/// Picks at most one due stream per tick and checks it.
pub struct Scheduler<R: ?Sized> {
    config: Arc<RwLock<Config>>,
    checker: Arc<LivenessChecker<R>>,
    table: MonitorTable,
}

impl<R: StreamResolver + ?Sized> Scheduler<R> {
    pub fn new(config: Arc<RwLock<Config>>, checker: Arc<LivenessChecker<R>>) -> Self {
        Self {
            config,
            checker,
            table: MonitorTable::new(),
        }
    }

    pub fn table(&self) -> &MonitorTable {
        &self.table
    }

    /// Runs one scheduling step: selects the most overdue stream, checks it,
    /// and returns the transition event if its state changed. Check errors
    /// count as offline and are never propagated.
    pub async fn tick(&mut self) -> Option<StreamEvent> {
        let now = Instant::now();
        let (record, global_args, auth_fragments, timeout) = {
            let config = self.config.read().await;
            self.table.retain_configured(&config);
            let record = self
                .table
                .select_due(config.streams.values(), now, config.check_interval())?
                .clone();
            (
                record,
                config.default_streamlink_args.clone(),
                config.plugin_auth_args.clone(),
                config.check_timeout(),
            )
        };
        // The read lock is released before the (possibly slow) check.

        tracing::debug!("Checking {}", record.url);
        let args = CheckArgs {
            global_args: global_args.as_deref(),
            stream_args: record.sl_args.as_deref(),
            auth_fragments: &auth_fragments,
        };
        let is_online = match self.checker.check_within(&record.url, args, timeout).await {
            Ok(liveness) => liveness.is_live,
            Err(e) if e.is_configuration_problem() => {
                tracing::warn!("Cannot check {}: {e}", record.display_name());
                false
            }
            Err(e) => {
                tracing::debug!("Stream offline or error checking {}: {e}", record.url);
                false
            }
        };

        let event = self.table.observe(&record, is_online, Instant::now());
        match &event {
            Some(StreamEvent::Online(r)) => tracing::info!("Stream online: {}", r.display_name()),
            Some(StreamEvent::Offline(r)) => tracing::info!("Stream offline: {}", r.display_name()),
            None => {}
        }
        event
    }

    pub async fn snapshot(&self, run_state: RunState) -> MonitorSnapshot {
        let config = self.config.read().await;
        let online: Vec<StreamRecord> = self.table.online(&config).into_iter().cloned().collect();
        let notify_count = online.iter().filter(|r| r.effective_notify(&config)).count();
        MonitorSnapshot {
            run_state,
            always_on: config
                .streams
                .values()
                .filter(|r| r.is_always_on())
                .cloned()
                .collect(),
            online,
            notify_count,
        }
    }
}

/// Control and query side of a running scheduler. Cloneable; all clones
/// drive the same loop.
#[derive(Clone)]
pub struct MonitorHandle {
    control: Arc<watch::Sender<RunState>>,
    snapshot: watch::Receiver<MonitorSnapshot>,
}

impl MonitorHandle {
    pub fn pause(&self) {
        self.transition(RunState::Paused);
    }

    pub fn resume(&self) {
        self.transition(RunState::Running);
    }

    /// Pauses if running, resumes if paused.
    pub fn toggle(&self) {
        match self.run_state() {
            RunState::Running => self.pause(),
            RunState::Paused => self.resume(),
            RunState::Stopped => {}
        }
    }

    /// Asks the loop to exit after the current tick. Idempotent.
    pub fn stop(&self) {
        self.control.send_replace(RunState::Stopped);
    }

    pub fn run_state(&self) -> RunState {
        *self.control.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.run_state() == RunState::Paused
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshot.clone()
    }

    fn transition(&self, to: RunState) {
        self.control.send_if_modified(|state| {
            if *state == RunState::Stopped || *state == to {
                return false;
            }
            *state = to;
            true
        });
    }
}

/// Starts the scheduling loop on its own task. Transition events are sent
/// to `events`; the loop ends on [`MonitorHandle::stop`] or when `events`
/// is closed.
pub fn spawn<R>(
    scheduler: Scheduler<R>,
    initial: RunState,
    events: mpsc::Sender<DaemonEvent>,
) -> (MonitorHandle, JoinHandle<()>)
where
    R: StreamResolver + ?Sized + 'static,
{
    let (control_tx, control_rx) = watch::channel(initial);
    let (snapshot_tx, snapshot_rx) = watch::channel(MonitorSnapshot::empty(initial));
    let handle = MonitorHandle {
        control: Arc::new(control_tx),
        snapshot: snapshot_rx,
    };
    let task = tokio::spawn(run(scheduler, control_rx, snapshot_tx, events));
    (handle, task)
}

async fn run<R>(
    mut scheduler: Scheduler<R>,
    control: watch::Receiver<RunState>,
    snapshot_tx: watch::Sender<MonitorSnapshot>,
    events: mpsc::Sender<DaemonEvent>,
) where
    R: StreamResolver + ?Sized,
{
    let mut ticker = interval(Duration::from_millis(TICK_INTERVAL_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let state = *control.borrow();
        match state {
            RunState::Stopped => break,
            RunState::Paused => {}
            RunState::Running => {
                if let Some(event) = scheduler.tick().await {
                    if events.send(DaemonEvent::Stream(event)).await.is_err() {
                        break;
                    }
                }
            }
        }

        // Re-read so a stop requested during the check is reflected.
        let state = *control.borrow();
        let snapshot = scheduler.snapshot(state).await;
        snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    let snapshot = scheduler.snapshot(RunState::Stopped).await;
    snapshot_tx.send_replace(snapshot);
    tracing::debug!("Scheduler stopped");
}
