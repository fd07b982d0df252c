//! Background scheduler: owns the cycle loop and publishes status.

use crate::config::RemoteAvailability;
use crate::conflict::Conflict;
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::outbox::SyncJob;
use crate::pull::{PullEngine, PullReport};
use crate::push::{PushEngine, PushReport};
use crate::status::{CycleAction, SyncStatus};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tabsync_core::{ListenerId, MutationListener};
use tabsync_gateway::{RemoteRow, TableTransport};
use tracing::{debug, error, info, warn};

/// How many recent conflicts the conflict sink receives.
const RECENT_CONFLICTS: usize = 10;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next wake signal.
    Idle,
    /// A cycle is executing.
    Running,
    /// The last cycle failed; the next tick attempts recovery.
    Offline,
}

/// Callback receiving the status published after every cycle.
pub type StatusSink = Box<dyn Fn(&SyncStatus) + Send + Sync>;
/// Callback receiving the most recent conflicts after a cycle that found
/// new ones.
pub type ConflictSink = Box<dyn Fn(&[Conflict]) + Send + Sync>;
/// Dependency check executed before any remote call.
pub type AvailabilityProbe = Box<dyn Fn() -> RemoteAvailability + Send + Sync>;

/// Builder for [`SyncScheduler`].
pub struct SchedulerBuilder<T: TableTransport + 'static> {
    ctx: SyncContext<T>,
    probe: AvailabilityProbe,
    status_sink: Option<StatusSink>,
    conflict_sink: Option<ConflictSink>,
}

impl<T: TableTransport + 'static> SchedulerBuilder<T> {
    /// Installs the availability probe.
    pub fn with_probe(mut self, probe: AvailabilityProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Installs the status sink.
    pub fn with_status_sink(mut self, sink: StatusSink) -> Self {
        self.status_sink = Some(sink);
        self
    }

    /// Installs the conflict sink.
    pub fn with_conflict_sink(mut self, sink: ConflictSink) -> Self {
        self.conflict_sink = Some(sink);
        self
    }

    /// Builds the scheduler.
    pub fn build(self) -> SyncScheduler<T> {
        let push = PushEngine::from_context(&self.ctx);
        let pull = PullEngine::from_context(&self.ctx);
        SyncScheduler {
            inner: Arc::new(Inner {
                ctx: self.ctx,
                push,
                pull,
                probe: self.probe,
                status_sink: self.status_sink,
                conflict_sink: self.conflict_sink,
                state: RwLock::new(SchedulerState::Idle),
                wake: Mutex::new(false),
                wake_cv: Condvar::new(),
                stopping: AtomicBool::new(false),
                cycle_guard: AtomicBool::new(false),
                last_sync: Mutex::new(None),
                last_status: Mutex::new(None),
                debounce: Mutex::new(HashMap::new()),
            }),
            worker: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }
}

/// Drives periodic and on-demand sync cycles on one background thread.
///
/// Wake sources are the periodic timer, the (debounced) local-mutation
/// listener, and [`SyncScheduler::sync_now`]. Only one cycle executes at a
/// time; a wake signal arriving mid-cycle is coalesced, not queued — the
/// in-flight cycle's next tick re-checks pending work.
pub struct SyncScheduler<T: TableTransport + 'static> {
    inner: Arc<Inner<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<ListenerId>>,
}

struct Inner<T: TableTransport> {
    ctx: SyncContext<T>,
    push: PushEngine<T>,
    pull: PullEngine<T>,
    probe: AvailabilityProbe,
    status_sink: Option<StatusSink>,
    conflict_sink: Option<ConflictSink>,
    state: RwLock<SchedulerState>,
    wake: Mutex<bool>,
    wake_cv: Condvar,
    stopping: AtomicBool,
    cycle_guard: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    last_status: Mutex<Option<SyncStatus>>,
    debounce: Mutex<HashMap<String, Instant>>,
}

impl<T: TableTransport + 'static> SyncScheduler<T> {
    /// Starts building a scheduler over the given context.
    pub fn builder(ctx: SyncContext<T>) -> SchedulerBuilder<T> {
        SchedulerBuilder {
            ctx,
            probe: Box::new(|| RemoteAvailability::Available),
            status_sink: None,
            conflict_sink: None,
        }
    }

    /// Creates a scheduler with no probe and no sinks installed.
    pub fn new(ctx: SyncContext<T>) -> Self {
        Self::builder(ctx).build()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        *self.inner.state.read()
    }

    /// The status published by the most recent cycle.
    pub fn last_status(&self) -> Option<SyncStatus> {
        self.inner.last_status.lock().clone()
    }

    /// Registers the mutation listener and starts the background loop.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        self.inner.stopping.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let listener: MutationListener = Arc::new(move |row_id| inner.on_local_mutation(row_id));
        *self.listener.lock() = Some(self.inner.ctx.catalog.register_listener(listener));

        let inner = Arc::clone(&self.inner);
        match std::thread::Builder::new()
            .name("tabsync-scheduler".into())
            .spawn(move || inner.run_loop())
        {
            Ok(handle) => *worker = Some(handle),
            Err(spawn_error) => {
                error!(%spawn_error, "could not spawn scheduler thread");
            }
        }
    }

    /// Requests an immediate cycle from the background loop.
    pub fn sync_now(&self) {
        self.inner.wake();
    }

    /// Runs one cycle on the calling thread.
    ///
    /// Returns `None` when a cycle is already in flight (the signal is
    /// coalesced). Intended for tests and for callers without the
    /// background loop.
    pub fn run_once(&self) -> Option<SyncStatus> {
        self.inner.try_run_cycle()
    }

    /// Cooperative stop: signals the loop, unregisters the listener, and
    /// waits for the in-flight cycle up to the configured timeout.
    ///
    /// `mark_pushed` happens strictly after a successful remote write, so
    /// even a timed-out stop leaves the outbox and version markers
    /// consistent.
    pub fn stop(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.inner.ctx.catalog.unregister_listener(id);
        }
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.wake_cv.notify_all();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let deadline = Instant::now() + self.inner.ctx.config.stop_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("scheduler thread busy past stop timeout, detaching");
            }
        }
    }
}

impl<T: TableTransport + 'static> Drop for SyncScheduler<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the cycle guard on every exit path.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T: TableTransport> Inner<T> {
    fn wake(&self) {
        let mut wake = self.wake.lock();
        *wake = true;
        self.wake_cv.notify_one();
    }

    /// Mutation listener body: cheap enqueue plus a wake signal, never any
    /// network I/O on the caller's thread.
    fn on_local_mutation(&self, row_id: &str) {
        if self.debounced(row_id) {
            debug!(row_id, "mutation debounced");
            return;
        }
        if let Err(enqueue_error) = self.enqueue(row_id) {
            warn!(row_id, %enqueue_error, "could not enqueue outbox job");
        }
        self.wake();
    }

    fn debounced(&self, row_id: &str) -> bool {
        let window = self.ctx.config.debounce_window;
        let mut seen = self.debounce.lock();
        let now = Instant::now();
        match seen.get(row_id) {
            Some(last) if now.duration_since(*last) < window => true,
            _ => {
                seen.insert(row_id.to_string(), now);
                false
            }
        }
    }

    fn enqueue(&self, row_id: &str) -> SyncResult<()> {
        let schema = self.ctx.gateway.schema();
        let job = match self.ctx.catalog.fetch_row(row_id)? {
            Some(row) => SyncJob::upsert(row_id, RemoteRow::from_local(&row, schema).cells),
            // The row is gone locally: propagate the removal.
            None => SyncJob::delete(row_id),
        };
        self.ctx.outbox.append(job)?;
        Ok(())
    }

    fn run_loop(&self) {
        info!("sync scheduler started");
        loop {
            {
                let mut wake = self.wake.lock();
                if !*wake && !self.stopping.load(Ordering::SeqCst) {
                    let _ = self
                        .wake_cv
                        .wait_for(&mut wake, self.ctx.config.sync_interval);
                }
                *wake = false;
            }
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            self.try_run_cycle();
        }
        info!("sync scheduler stopped");
    }

    fn try_run_cycle(&self) -> Option<SyncStatus> {
        if self.cycle_guard.swap(true, Ordering::SeqCst) {
            debug!("wake signal coalesced into in-flight cycle");
            return None;
        }
        let _guard = CycleGuard(&self.cycle_guard);

        *self.state.write() = SchedulerState::Running;
        let status = self.cycle();
        self.publish(&status);
        *self.last_status.lock() = Some(status.clone());
        Some(status)
    }

    fn cycle(&self) -> SyncStatus {
        let availability = (self.probe)();
        if let Some(reason) = availability.reason() {
            debug!(reason, "sync disabled, skipping cycle");
            *self.state.write() = SchedulerState::Idle;
            return SyncStatus::disabled(reason, self.pending());
        }

        let conflicts_before = self.ctx.conflicts.total();
        let started = Instant::now();
        match self.execute() {
            Ok((push, pull)) => {
                let new_conflicts = (self.ctx.conflicts.total() - conflicts_before) as usize;
                let completed = Utc::now();
                *self.last_sync.lock() = Some(completed);
                *self.state.write() = SchedulerState::Idle;

                let moved =
                    push.pushed + push.deleted + push.conflicts + pull.applied + pull.conflicts;
                let action = if moved == 0 {
                    CycleAction::Noop
                } else {
                    CycleAction::Synced
                };
                let message = (moved > 0).then(|| {
                    format!(
                        "pushed {} deleted {} applied {} conflicts {} in {}ms ({} retries)",
                        push.pushed,
                        push.deleted,
                        pull.applied,
                        pull.conflicts,
                        started.elapsed().as_millis(),
                        push.retries,
                    )
                });
                if let Some(summary) = &message {
                    info!(%summary, "sync cycle complete");
                }

                SyncStatus {
                    online: true,
                    pending: self.pending(),
                    last_sync: Some(completed),
                    new_conflicts,
                    action,
                    message,
                    error: None,
                }
            }
            Err(cycle_error) => {
                warn!(%cycle_error, "sync cycle failed, engine offline until next tick");
                *self.state.write() = SchedulerState::Offline;
                SyncStatus {
                    online: false,
                    pending: self.pending(),
                    last_sync: *self.last_sync.lock(),
                    new_conflicts: 0,
                    action: CycleAction::Offline,
                    message: None,
                    error: Some(cycle_error.to_string()),
                }
            }
        }
    }

    /// Push fully completes (or exhausts its retries) before pull begins,
    /// so a row just uploaded is never re-read as "remote newer". Rows the
    /// push pass held back are excluded from pull so one cycle records each
    /// conflict once.
    fn execute(&self) -> SyncResult<(PushReport, PullReport)> {
        let push = self.push.run()?;
        let pull = self.pull.run_excluding(&push.held_back)?;
        Ok((push, pull))
    }

    fn pending(&self) -> usize {
        self.ctx
            .catalog
            .dirty_rows()
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    /// Sinks are external code; a panicking sink is logged and must never
    /// take the loop down.
    fn publish(&self, status: &SyncStatus) {
        if let Some(sink) = &self.status_sink {
            if catch_unwind(AssertUnwindSafe(|| sink(status))).is_err() {
                warn!("status sink panicked");
            }
        }
        if status.new_conflicts > 0 {
            if let Some(sink) = &self.conflict_sink {
                let recent = self.ctx.conflicts.recent(RECENT_CONFLICTS);
                if catch_unwind(AssertUnwindSafe(|| sink(&recent))).is_err() {
                    warn!("conflict sink panicked");
                }
            }
        }
    }
}
