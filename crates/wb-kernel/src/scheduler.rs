//! Single-slot mutation scheduler
//!
//! One worker task pops commands in submission order and runs at most one
//! [`MutationUnit`] at a time, so the data store has exactly one writer.
//! Unit logic runs on a blocking thread; the worker waits for it, handles
//! cancellation (cooperative, then forced after a grace period), consults
//! the [`DecisionGateway`] on failure, and records successful units into
//! the [`Timeline`].
//!
//! Undo, redo and exclusive jobs (session save/restore) travel through the
//! same queue, so they never overlap a running unit.

use crate::context::{Attempt, CancelToken, MutationContext, Reporter};
use crate::error::{MutationError, SchedulerError};
use crate::event::{Event, EventSink, EventStream, Progress};
use crate::gateway::{Decision, DecisionGateway, DecisionRequest};
use crate::lifecycle::{Phase, UnitOutcome, UnitStatus};
use crate::unit::{MutationUnit, UnitId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, OwnedRwLockWriteGuard, RwLock};
use tokio::task::{JoinError, JoinHandle};
use wb_history::{revert_all, CompoundId, HistoryError, StepOutcome, Timeline};
use wb_store::{EditRecord, ErrorClass, ObjectName, ObjectStore, StoreError};

/// Scheduler tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long the gateway may take before the default decision applies
    pub decision_timeout: Duration,
    /// Retries allowed per unit
    pub max_auto_retries: u32,
    /// How long a cancelled unit may keep running before it is abandoned
    pub cancel_grace: Duration,
    /// Buffer of the broadcast observer channel
    pub observer_capacity: usize,
}

impl SchedulerConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_auto_retries(mut self, retries: u32) -> Self {
        self.max_auto_retries = retries;
        self
    }

    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    #[must_use]
    pub fn with_observer_capacity(mut self, capacity: usize) -> Self {
        self.observer_capacity = capacity;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            decision_timeout: Duration::from_secs(30),
            max_auto_retries: 3,
            cancel_grace: Duration::from_secs(2),
            observer_capacity: 1024,
        }
    }
}

type ExclusiveJob = Box<dyn FnOnce(&ObjectStore, &Timeline) + Send>;

enum Command {
    Run(Arc<UnitEntry>),
    Undo(oneshot::Sender<Result<StepOutcome, HistoryError>>),
    Redo(oneshot::Sender<Result<StepOutcome, HistoryError>>),
    Exclusive(ExclusiveJob),
    Shutdown,
}

struct UnitEntry {
    unit: MutationUnit,
    sequence: u64,
    // Captured at submission; `None` when recording was off.
    statement: Option<String>,
    cancel: Arc<CancelToken>,
    status: Arc<UnitStatus>,
}

/// Caller's view of a submitted unit
#[derive(Debug, Clone)]
pub struct UnitHandle {
    id: UnitId,
    sequence: u64,
    status: Arc<UnitStatus>,
}

impl UnitHandle {
    #[inline]
    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Submission order
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.status.phase()
    }

    /// Outcome, if the unit already finished
    #[must_use]
    pub fn outcome(&self) -> Option<UnitOutcome> {
        self.status.subscribe().borrow().clone()
    }

    /// Wait for the unit to finish
    ///
    /// # Errors
    /// [`SchedulerError::WorkerGone`] if the scheduler was dropped first
    pub async fn wait(&self) -> Result<UnitOutcome, SchedulerError> {
        let mut rx = self.status.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SchedulerError::WorkerGone)?;
        outcome.clone().ok_or(SchedulerError::WorkerGone)
    }
}

/// Holding this blocks new submissions; dropping it resumes them
#[derive(Debug)]
pub struct SubmissionPause {
    _guard: OwnedRwLockWriteGuard<()>,
}

struct Intake {
    next_sequence: u64,
    tx: Option<mpsc::UnboundedSender<Command>>,
}

enum AttemptResult {
    Finished(Result<Vec<EditRecord>, MutationError>),
    Abandoned,
}

struct Shared {
    store: Arc<ObjectStore>,
    timeline: Arc<Timeline>,
    gateway: Arc<dyn DecisionGateway>,
    config: SchedulerConfig,
    events: Arc<EventSink>,
    intake: Mutex<Intake>,
    reservations: DashMap<ObjectName, UnitId>,
    units: DashMap<UnitId, Arc<UnitEntry>>,
    active: Mutex<Option<UnitId>>,
    pause: Arc<RwLock<()>>,
    outstanding: watch::Sender<usize>,
}

/// Single-slot scheduler for mutation units
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the scheduler and its worker task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        store: Arc<ObjectStore>,
        timeline: Arc<Timeline>,
        gateway: Arc<dyn DecisionGateway>,
        config: SchedulerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            store,
            timeline,
            gateway,
            events: Arc::new(EventSink::new(config.observer_capacity)),
            config,
            intake: Mutex::new(Intake {
                next_sequence: 0,
                tx: Some(tx),
            }),
            reservations: DashMap::new(),
            units: DashMap::new(),
            active: Mutex::new(None),
            pause: Arc::new(RwLock::new(())),
            outstanding,
        });
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), rx));
        tracing::debug!("scheduler started");
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a unit
    ///
    /// Waits only while submissions are paused (session save/restore).
    /// The unit's reserved names are claimed immediately.
    ///
    /// # Errors
    /// - [`SchedulerError::ShuttingDown`] after `shutdown`
    /// - [`SchedulerError::NameExists`] / [`SchedulerError::NameReserved`]
    ///   for reservation clashes
    pub async fn submit(&self, unit: MutationUnit) -> Result<UnitHandle, SchedulerError> {
        let _open = self.shared.pause.read().await;
        self.shared.enqueue(unit)
    }

    /// Request cooperative cancellation of a pending or running unit
    ///
    /// Returns immediately; the outcome arrives as a lifecycle event.
    ///
    /// # Errors
    /// [`SchedulerError::UnknownUnit`] if the unit is not queued or running
    pub fn abort(&self, id: UnitId) -> Result<(), SchedulerError> {
        let entry = self
            .shared
            .units
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(SchedulerError::UnknownUnit(id))?;
        entry.cancel.cancel();
        tracing::info!("abort requested for unit {} ({})", id, entry.unit.describe());
        Ok(())
    }

    /// Cancel whatever unit is running, if any
    pub fn abort_active(&self) -> Option<UnitId> {
        let id = (*self.shared.active.lock())?;
        self.abort(id).ok().map(|()| id)
    }

    /// Cancel every queued and running unit; returns how many were signalled
    pub fn abort_all(&self) -> usize {
        let mut count = 0;
        for entry in &self.shared.units {
            entry.cancel.cancel();
            count += 1;
        }
        if count > 0 {
            tracing::info!("abort requested for {count} unit(s)");
        }
        count
    }

    /// Undo the latest compound on the worker
    ///
    /// # Errors
    /// History failures (nothing changed) or a stopped scheduler
    pub async fn undo(&self) -> Result<StepOutcome, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.shared.send(Command::Undo(tx))?;
        Ok(rx.await.map_err(|_| SchedulerError::WorkerGone)??)
    }

    /// Redo the latest undone compound on the worker
    ///
    /// # Errors
    /// History failures (nothing changed) or a stopped scheduler
    pub async fn redo(&self) -> Result<StepOutcome, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.shared.send(Command::Redo(tx))?;
        Ok(rx.await.map_err(|_| SchedulerError::WorkerGone)??)
    }

    /// Run `job` in the execution slot, after everything queued before it
    ///
    /// The job runs on a blocking thread and may do I/O.
    ///
    /// # Errors
    /// [`SchedulerError::ShuttingDown`] or [`SchedulerError::WorkerGone`]
    pub async fn exclusive<F, R>(&self, job: F) -> Result<R, SchedulerError>
    where
        F: FnOnce(&ObjectStore, &Timeline) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.shared.send(Command::Exclusive(Box::new(move |store: &ObjectStore, timeline: &Timeline| {
            let _ = tx.send(job(store, timeline));
        })))?;
        rx.await.map_err(|_| SchedulerError::WorkerGone)
    }

    /// Block new submissions until the returned guard is dropped
    pub async fn pause_submissions(&self) -> SubmissionPause {
        SubmissionPause {
            _guard: Arc::clone(&self.shared.pause).write_owned().await,
        }
    }

    /// Wait until every queued command has been processed
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting work and stop the worker
    ///
    /// With `wait`, queued units run to completion first; without it they
    /// are all cancelled.
    ///
    /// # Errors
    /// [`SchedulerError::WorkerGone`] if the worker panicked
    pub async fn shutdown(&self, wait: bool) -> Result<(), SchedulerError> {
        let tx = self.shared.intake.lock().tx.take();
        let Some(tx) = tx else {
            return Ok(());
        };
        if !wait {
            self.abort_all();
        }
        self.shared.outstanding.send_modify(|n| *n += 1);
        let _ = tx.send(Command::Shutdown);
        drop(tx);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.await.map_err(|_| SchedulerError::WorkerGone)?;
        }
        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// Take the presentation event stream (single consumer)
    pub fn take_events(&self) -> Option<EventStream> {
        self.shared.events.take_stream()
    }

    /// Additional lossy observer of all events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Phase of a queued or running unit
    #[must_use]
    pub fn phase_of(&self, id: UnitId) -> Option<Phase> {
        self.shared.units.get(&id).map(|e| e.status.phase())
    }

    /// Id of the running unit
    #[must_use]
    pub fn active(&self) -> Option<UnitId> {
        *self.shared.active.lock()
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.shared.intake.lock().tx.is_some()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.shared.store
    }

    #[must_use]
    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.shared.timeline
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain and exit.
        if self.shared.intake.lock().tx.take().is_some() {
            self.abort_all();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("queued", &self.shared.units.len())
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}

async fn run_worker(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        let stop = matches!(command, Command::Shutdown);
        match command {
            Command::Run(entry) => shared.execute(entry).await,
            Command::Undo(reply) => {
                let result = shared.timeline.undo(&shared.store);
                shared.after_step("undo", &result);
                let _ = reply.send(result);
            }
            Command::Redo(reply) => {
                let result = shared.timeline.redo(&shared.store);
                shared.after_step("redo", &result);
                let _ = reply.send(result);
            }
            Command::Exclusive(job) => {
                let store = Arc::clone(&shared.store);
                let timeline = Arc::clone(&shared.timeline);
                if let Err(e) = tokio::task::spawn_blocking(move || job(&store, &timeline)).await {
                    tracing::error!("exclusive job failed: {e}");
                }
            }
            Command::Shutdown => {}
        }
        shared.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        if stop {
            break;
        }
    }
    tracing::debug!("scheduler worker exited");
}

fn flatten(joined: Result<Result<Vec<EditRecord>, MutationError>, JoinError>) -> Result<Vec<EditRecord>, MutationError> {
    joined.unwrap_or_else(|e| Err(MutationError::System(format!("mutation panicked: {e}"))))
}

impl Shared {
    fn send(&self, command: Command) -> Result<(), SchedulerError> {
        let intake = self.intake.lock();
        let tx = intake.tx.as_ref().ok_or(SchedulerError::ShuttingDown)?;
        self.outstanding.send_modify(|n| *n += 1);
        tx.send(command).map_err(|_| {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            SchedulerError::WorkerGone
        })
    }

    fn enqueue(&self, unit: MutationUnit) -> Result<UnitHandle, SchedulerError> {
        let mut intake = self.intake.lock();
        let tx = intake.tx.clone().ok_or(SchedulerError::ShuttingDown)?;
        self.reserve(&unit)?;

        let sequence = intake.next_sequence;
        intake.next_sequence += 1;
        let statement = if self.timeline.is_recording() {
            unit.statement()
        } else {
            None
        };
        let id = unit.id();
        let entry = Arc::new(UnitEntry {
            unit,
            sequence,
            statement,
            cancel: Arc::new(CancelToken::new()),
            status: Arc::new(UnitStatus::new()),
        });
        let handle = UnitHandle {
            id,
            sequence,
            status: Arc::clone(&entry.status),
        };

        self.units.insert(id, Arc::clone(&entry));
        self.reporter(&entry).emit(Phase::Pending, None, "queued");
        self.outstanding.send_modify(|n| *n += 1);
        if tx.send(Command::Run(Arc::clone(&entry))).is_err() {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            self.release(&entry);
            return Err(SchedulerError::WorkerGone);
        }
        tracing::info!("submitted unit {} #{} ({})", id, sequence, entry.unit.describe());
        Ok(handle)
    }

    fn reserve(&self, unit: &MutationUnit) -> Result<(), SchedulerError> {
        let snapshot = self.store.snapshot();
        for name in unit.reserved() {
            if snapshot.contains(name) {
                return Err(SchedulerError::NameExists(name.clone()));
            }
            if let Some(holder) = self.reservations.get(name) {
                return Err(SchedulerError::NameReserved {
                    name: name.clone(),
                    holder: *holder,
                });
            }
        }
        for name in unit.reserved() {
            self.reservations.insert(name.clone(), unit.id());
        }
        Ok(())
    }

    fn release(&self, entry: &UnitEntry) {
        let id = entry.unit.id();
        for name in entry.unit.reserved() {
            self.reservations.remove_if(name, |_, holder| *holder == id);
        }
        self.units.remove(&id);
    }

    fn reporter(&self, entry: &UnitEntry) -> Reporter {
        Reporter {
            events: Arc::clone(&self.events),
            unit_id: entry.unit.id(),
            unit_name: entry.unit.name().to_string(),
            sequence: entry.sequence,
        }
    }

    fn advance(&self, entry: &UnitEntry, to: Phase) {
        if let Err(e) = entry.status.advance(to) {
            tracing::error!("unit {}: {e}", entry.unit.id());
        }
    }

    fn after_step(&self, what: &str, result: &Result<StepOutcome, HistoryError>) {
        match result {
            Ok(outcome) => self.events.emit(Event::History(outcome.state.clone())),
            Err(e) => tracing::warn!("{what} failed: {e}"),
        }
    }

    /// Push a unit's records as one compound and announce the new state
    fn record(
        &self,
        label: &str,
        records: &[EditRecord],
        statement: Option<String>,
    ) -> Result<Option<CompoundId>, HistoryError> {
        let id = self.timeline.commit_unit(label, records.to_vec(), statement)?;
        if id.is_some() {
            self.events.emit(Event::History(self.timeline.state()));
        }
        Ok(id)
    }

    /// Record `committed`, or take the edits back out of the store when
    /// history refuses them
    fn record_or_revert(&self, label: &str, committed: &[EditRecord]) -> Option<CompoundId> {
        match self.record(label, committed, None) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("could not record {label:?} in history: {e}");
                if let Err(e) = revert_all(&self.store, committed) {
                    tracing::error!("edits of {label:?} stay in the store without history: {e}");
                }
                None
            }
        }
    }

    async fn execute(&self, entry: Arc<UnitEntry>) {
        let reporter = self.reporter(&entry);
        let name = entry.unit.name().to_string();

        if entry.cancel.is_cancelled() {
            self.advance(&entry, Phase::Aborted);
            reporter.emit(Phase::Aborted, None, "aborted before start");
            self.finish(&entry, UnitOutcome {
                phase: Phase::Aborted,
                compound: None,
                error: None,
                attempts: 0,
            });
            return;
        }

        *self.active.lock() = Some(entry.unit.id());
        self.advance(&entry, Phase::Running);
        reporter.emit(Phase::Running, Some(Progress::Percent(0)), "started");
        tracing::info!("running unit {} ({})", entry.unit.id(), entry.unit.describe());

        let mut retries_left = self.config.max_auto_retries;
        let mut attempts = 0;
        let mut last_error = None;
        let outcome = loop {
            attempts += 1;
            let attempt = Arc::new(Attempt::default());
            match self.run_attempt(&entry, &reporter, &attempt).await {
                AttemptResult::Finished(Ok(records)) => match self.record(&name, &records, entry.statement.clone()) {
                    Ok(compound) => {
                        self.advance(&entry, Phase::Done);
                        reporter.emit(Phase::Done, Some(Progress::Percent(100)), "done");
                        break UnitOutcome {
                            phase: Phase::Done,
                            compound,
                            error: last_error,
                            attempts,
                        };
                    }
                    Err(e) => break self.fail_unrecorded(&entry, &reporter, &records, &e, attempts),
                },
                AttemptResult::Finished(Err(err)) if err.is_cancellation() => {
                    let committed = attempt.take_committed();
                    break self.abort_keeping(&entry, &reporter, committed, Some(err), attempts, "cancelled");
                }
                AttemptResult::Abandoned => {
                    let committed = attempt.revoke();
                    tracing::warn!(
                        "unit {} ignored cancellation for {:?}; abandoned",
                        entry.unit.id(),
                        self.config.cancel_grace
                    );
                    break self.abort_keeping(
                        &entry,
                        &reporter,
                        committed,
                        Some(MutationError::Cancelled),
                        attempts,
                        "abandoned after cancel grace period",
                    );
                }
                AttemptResult::Finished(Err(err)) => {
                    let committed = attempt.take_committed();
                    self.advance(&entry, Phase::Error);
                    reporter.emit(Phase::Error, None, err.to_string());
                    let decision = self.consult(&entry, &err, attempts, retries_left).await;
                    last_error = Some(err.clone());
                    match decision {
                        Decision::Retry => {
                            if let Err(e) = revert_all(&self.store, &committed) {
                                break self.fail_terminal(&entry, &reporter, committed, e, attempts);
                            }
                            retries_left = retries_left.saturating_sub(1);
                            self.advance(&entry, Phase::Running);
                            reporter.emit(Phase::Running, Some(Progress::Percent(0)), format!("retry {attempts}"));
                        }
                        Decision::Abort => {
                            break self.abort_keeping(&entry, &reporter, committed, Some(err), attempts, "aborted");
                        }
                        Decision::AbortAndRollback => match revert_all(&self.store, &committed) {
                            Ok(()) => {
                                self.advance(&entry, Phase::Aborted);
                                reporter.emit(Phase::Aborted, None, "aborted and rolled back");
                                break UnitOutcome {
                                    phase: Phase::Aborted,
                                    compound: None,
                                    error: Some(err),
                                    attempts,
                                };
                            }
                            Err(e) => break self.fail_terminal(&entry, &reporter, committed, e, attempts),
                        },
                    }
                }
            }
        };

        *self.active.lock() = None;
        self.finish(&entry, outcome);
    }

    async fn run_attempt(&self, entry: &UnitEntry, reporter: &Reporter, attempt: &Arc<Attempt>) -> AttemptResult {
        let mut ctx = MutationContext::new(
            Arc::clone(&self.store),
            Arc::clone(attempt),
            Arc::clone(&entry.cancel),
            reporter.clone(),
        );
        let mutation = entry.unit.mutation();
        let mut task = tokio::task::spawn_blocking(move || {
            mutation.execute(&mut ctx)?;
            ctx.finish()
        });

        tokio::select! {
            joined = &mut task => AttemptResult::Finished(flatten(joined)),
            () = entry.cancel.cancelled() => {
                tracing::debug!("waiting up to {:?} for unit {} to stop", self.config.cancel_grace, entry.unit.id());
                match tokio::time::timeout(self.config.cancel_grace, &mut task).await {
                    Ok(joined) => AttemptResult::Finished(flatten(joined)),
                    Err(_) => AttemptResult::Abandoned,
                }
            }
        }
    }

    /// Ask the gateway, falling back to the default on timeout
    async fn consult(&self, entry: &UnitEntry, err: &MutationError, attempt: u32, retries_left: u32) -> Decision {
        // Retrying invalid operator input cannot help.
        let default = if retries_left > 0 && err.class() != ErrorClass::User {
            Decision::Retry
        } else {
            Decision::Abort
        };
        let request = DecisionRequest {
            unit_id: entry.unit.id(),
            unit_name: entry.unit.name().to_string(),
            error: err.clone(),
            attempt,
            retries_left,
            default,
            timeout: self.config.decision_timeout,
        };
        tracing::info!(
            "unit {} failed on attempt {attempt} ({} error): {err}",
            entry.unit.id(),
            err.class()
        );

        let decision = match tokio::time::timeout(self.config.decision_timeout, self.gateway.decide(&request)).await {
            Ok(decision) => decision,
            Err(_) => {
                tracing::info!("no decision within {:?}, using default {default}", self.config.decision_timeout);
                default
            }
        };
        let decision = match decision {
            Decision::Retry if retries_left == 0 => {
                tracing::warn!("retry budget of unit {} exhausted, aborting", entry.unit.id());
                Decision::Abort
            }
            Decision::Retry if entry.cancel.is_cancelled() => Decision::Abort,
            other => other,
        };
        tracing::info!("decision for unit {}: {decision}", entry.unit.id());
        decision
    }

    /// End as ABORTED, keeping already-committed edits as an undoable entry
    fn abort_keeping(
        &self,
        entry: &UnitEntry,
        reporter: &Reporter,
        committed: Vec<EditRecord>,
        error: Option<MutationError>,
        attempts: u32,
        message: &str,
    ) -> UnitOutcome {
        let compound = self.record_or_revert(&format!("{} (aborted)", entry.unit.name()), &committed);
        self.advance(entry, Phase::Aborted);
        reporter.emit(Phase::Aborted, None, message);
        UnitOutcome {
            phase: Phase::Aborted,
            compound,
            error,
            attempts,
        }
    }

    /// Rolling back failed: the unit's edits stay, and so does ERROR
    fn fail_terminal(
        &self,
        entry: &UnitEntry,
        reporter: &Reporter,
        committed: Vec<EditRecord>,
        cause: StoreError,
        attempts: u32,
    ) -> UnitOutcome {
        tracing::error!("rollback of unit {} failed: {cause}", entry.unit.id());
        let label = format!("{} (failed)", entry.unit.name());
        let compound = self.record(&label, &committed, None).unwrap_or_else(|e| {
            tracing::error!("could not record {label:?} in history: {e}");
            None
        });
        reporter.emit(Phase::Error, None, format!("rollback failed: {cause}"));
        UnitOutcome {
            phase: Phase::Error,
            compound,
            error: Some(MutationError::Store(cause)),
            attempts,
        }
    }

    /// The unit succeeded but history refused its compound: take its edits
    /// back out so the store never holds changes that cannot be undone
    fn fail_unrecorded(
        &self,
        entry: &UnitEntry,
        reporter: &Reporter,
        records: &[EditRecord],
        cause: &HistoryError,
        attempts: u32,
    ) -> UnitOutcome {
        tracing::error!("unit {} could not be recorded in history: {cause}", entry.unit.id());
        let error = match revert_all(&self.store, records) {
            Ok(()) => MutationError::System(format!("not recorded in history: {cause}")),
            Err(e) => {
                tracing::error!("edits of unit {} stay in the store without history: {e}", entry.unit.id());
                MutationError::Store(e)
            }
        };
        self.advance(entry, Phase::Error);
        reporter.emit(Phase::Error, None, error.to_string());
        UnitOutcome {
            phase: Phase::Error,
            compound: None,
            error: Some(error),
            attempts,
        }
    }

    fn finish(&self, entry: &UnitEntry, outcome: UnitOutcome) {
        self.release(entry);
        tracing::info!(
            "unit {} finished: {} after {} attempt(s)",
            entry.unit.id(),
            outcome.phase,
            outcome.attempts
        );
        entry.status.finish(outcome);
    }
}
