//! Sync scheduler.
//!
//! Drives the engine from a repeating timer and from reconnect events, and
//! exposes the manual start/cancel operations used by the UI layer.

use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};
use crate::engine::{CancelToken, Outcome, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::state::{SyncKind, SyncState};
use crate::store::LocalStore;
use lexisync_protocol::{CollectionId, Timestamp};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Leading-edge debouncer for offline-to-online transitions.
///
/// The first reconnect fires; later reconnects within `window` of the last
/// firing are dropped.
#[derive(Debug, Clone)]
pub struct ReconnectDebouncer {
    window: Duration,
    last_online: Option<bool>,
    last_fired: Option<Instant>,
}

impl ReconnectDebouncer {
    /// Creates a debouncer.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_online: None,
            last_fired: None,
        }
    }

    /// Seeds the last known connectivity without firing.
    pub fn seed(&mut self, online: bool) {
        self.last_online = Some(online);
    }

    /// Records an observation. Returns true if a reconnect sync should run.
    pub fn observe(&mut self, online: bool, now: Instant) -> bool {
        let previous = self.last_online.replace(online);
        if !online || previous != Some(false) {
            return false;
        }
        if let Some(last) = self.last_fired {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_fired = Some(now);
        true
    }
}

/// Handle to a run started by the scheduler.
#[derive(Debug)]
pub struct SyncHandle {
    job_id: u64,
    kind: SyncKind,
    token: CancelToken,
    task: JoinHandle<Outcome>,
}

impl SyncHandle {
    /// Job id.
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Run kind.
    pub fn kind(&self) -> SyncKind {
        self.kind
    }

    /// Signals the run's cancel token.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once the run has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run's outcome.
    pub async fn wait(self) -> SyncResult<Outcome> {
        self.task
            .await
            .map_err(|e| SyncError::TaskFailed(e.to_string()))
    }
}

/// Background tasks started by [`Scheduler::spawn`]. Dropping stops them.
#[derive(Debug)]
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stops the timer and reconnect loops. A run in flight continues.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Schedules sync runs.
pub struct Scheduler<G: RemoteGateway, S: LocalStore> {
    engine: Arc<SyncEngine<G, S>>,
    monitor: ConnectivityMonitor,
    debouncer: Mutex<ReconnectDebouncer>,
    reconnect_triggers: AtomicU64,
}

impl<G: RemoteGateway, S: LocalStore> Scheduler<G, S> {
    /// Creates a scheduler over an engine and a connectivity monitor.
    pub fn new(engine: Arc<SyncEngine<G, S>>, monitor: ConnectivityMonitor) -> Self {
        let online = monitor.is_online();
        engine.set_offline(!online);
        let mut debouncer = ReconnectDebouncer::new(engine.config().reconnect_debounce);
        debouncer.seed(online);
        Self {
            engine,
            monitor,
            debouncer: Mutex::new(debouncer),
            reconnect_triggers: AtomicU64::new(0),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Arc<SyncEngine<G, S>> {
        &self.engine
    }

    /// Returns the connectivity monitor.
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Returns the current state snapshot.
    pub fn state(&self) -> SyncState {
        self.engine.state()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.engine.subscribe()
    }

    /// Number of reconnect events that requested a delta sync.
    pub fn reconnect_triggers(&self) -> u64 {
        self.reconnect_triggers.load(Ordering::SeqCst)
    }

    /// Starts a full sync of every collection.
    ///
    /// Fails with [`SyncError::NoRuntime`] outside a Tokio runtime. Never
    /// queues: fails with [`SyncError::AlreadyRunning`] while a run is in
    /// flight.
    pub fn start_sync(&self) -> SyncResult<SyncHandle> {
        self.start(SyncKind::Full)
    }

    /// Starts a delta sync of every collection.
    pub fn start_delta_sync(&self) -> SyncResult<SyncHandle> {
        self.start(SyncKind::Delta)
    }

    /// Cancels the run in flight. Returns false when idle.
    pub fn cancel_sync(&self) -> bool {
        self.engine.cancel()
    }

    fn start(&self, kind: SyncKind) -> SyncResult<SyncHandle> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let token = CancelToken::new();
        let job = self.engine.begin(kind, CollectionId::ALL, token.clone())?;
        let job_id = job.id();
        let engine = Arc::clone(&self.engine);
        let task = runtime.spawn(async move { engine.execute(job).await });
        Ok(SyncHandle {
            job_id,
            kind,
            token,
            task,
        })
    }

    /// Reacts to a connectivity observation. Returns true if a delta sync
    /// was requested.
    ///
    /// Connectivity loss never cancels a run in flight.
    pub fn handle_connectivity(&self, status: ConnectivityStatus) -> bool {
        self.engine.set_offline(!status.is_connected);
        let fire = self
            .debouncer
            .lock()
            .observe(status.is_connected, Instant::now());
        if !fire {
            return false;
        }

        self.reconnect_triggers.fetch_add(1, Ordering::SeqCst);
        match self.start_delta_sync() {
            Ok(handle) => {
                info!(job = handle.job_id(), "reconnected, delta sync started");
            }
            Err(SyncError::AlreadyRunning) => {
                debug!("reconnected while a run is active");
            }
            Err(e) => warn!(error = %e, "reconnect sync failed to start"),
        }
        true
    }

    /// Starts the timer and reconnect loops.
    pub fn spawn(self: &Arc<Self>) -> SchedulerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.monitor.subscribe(move |status| {
            let _ = tx.send(status);
        });

        let reconnect = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                let _subscription = subscription;
                scheduler.reconnect_loop(rx).await;
            })
        };
        let timer = {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move { scheduler.timer_loop().await })
        };

        SchedulerHandle {
            tasks: vec![timer, reconnect],
        }
    }

    async fn reconnect_loop(&self, mut rx: mpsc::UnboundedReceiver<ConnectivityStatus>) {
        while let Some(status) = rx.recv().await {
            self.handle_connectivity(status);
        }
    }

    async fn timer_loop(&self) {
        let interval = self.engine.config().sync_interval;
        let mut rx = self.engine.subscribe();
        let mut was_active = rx.borrow_and_update().is_active;
        let mut deadline = Instant::now() + interval;
        self.engine.schedule_next(Timestamp::now().saturating_add(interval));

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    deadline = Instant::now() + interval;
                    let state = self.engine.state();
                    if state.is_active {
                        debug!("timer tick skipped, run active");
                        continue;
                    }
                    if state.is_offline {
                        debug!("timer tick skipped, offline");
                        self.engine.schedule_next(Timestamp::now().saturating_add(interval));
                        continue;
                    }
                    match self.start_delta_sync() {
                        Ok(handle) => debug!(job = handle.job_id(), "timer started delta sync"),
                        Err(e) => debug!(error = %e, "timer tick did not start a sync"),
                    }
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let active = rx.borrow_and_update().is_active;
                    if was_active && !active {
                        deadline = Instant::now() + interval;
                    }
                    was_active = active;
                }
            }
        }
    }
}

impl<G: RemoteGateway, S: LocalStore> std::fmt::Debug for Scheduler<G, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("engine", &self.engine)
            .field("monitor", &self.monitor)
            .field("reconnect_triggers", &self.reconnect_triggers())
            .finish()
    }
}
