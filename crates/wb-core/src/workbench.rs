//! The workbench facade
//!
//! Owns the store, timeline and scheduler, and routes every store writer
//! (units, undo/redo, session restore) through the scheduler's single
//! execution slot. Presentation talks to this type only.

use crate::config::WorkbenchConfig;
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::registry::OperationRegistry;
use crate::script::{is_blank_or_comment, parse_statement};
use parking_lot::Mutex;
use serde_json::Value;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use wb_history::{HistoryState, StepOutcome, Timeline};
use wb_kernel::{DecisionGateway, Event, EventStream, MutationUnit, Params, Scheduler, UnitHandle, UnitId};
use wb_session::{Auxiliary, RestoreSummary, SaveSummary, SessionError, SessionInfo, SessionSerializer};
use wb_store::{ObjectStore, Snapshot};

/// Single-user workbench core
pub struct Workbench {
    config: WorkbenchConfig,
    scheduler: Scheduler,
    registry: OperationRegistry,
    serializer: SessionSerializer,
    /// View settings and tabs; the script text lives in the timeline
    presentation: Mutex<Auxiliary>,
    scripts: Mutex<ScriptRuns>,
}

/// Units queued by `run_script` that an emergency stop must reach
#[derive(Debug, Default)]
struct ScriptRuns {
    /// Bumped by every stop; a script started under an older value stops queueing
    generation: u64,
    queued: Vec<UnitHandle>,
}

impl Workbench {
    /// Start a workbench with the built-in operations
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Invalid configuration
    pub fn new(config: WorkbenchConfig, gateway: Arc<dyn DecisionGateway>) -> WorkbenchResult<Self> {
        Self::with_registry(config, gateway, OperationRegistry::with_builtins())
    }

    /// Start a workbench with a custom operation registry
    ///
    /// # Errors
    /// Invalid configuration
    pub fn with_registry(
        config: WorkbenchConfig,
        gateway: Arc<dyn DecisionGateway>,
        registry: OperationRegistry,
    ) -> WorkbenchResult<Self> {
        config.validate()?;
        let store = Arc::new(ObjectStore::new());
        let timeline = Arc::new(Timeline::new(config.history_limit));
        timeline.set_recording(config.record_script);
        let scheduler = Scheduler::new(store, timeline, gateway, config.scheduler());
        tracing::info!(
            "workbench started: {} operation(s), {} plugin(s) installed",
            registry.len(),
            config.installed_plugins.len()
        );
        Ok(Self {
            serializer: config.serializer(),
            config,
            scheduler,
            registry,
            presentation: Mutex::new(Auxiliary::default()),
            scripts: Mutex::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ObjectStore> {
        self.scheduler.store()
    }

    /// Consistent read-only view of the store
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.scheduler.store().snapshot()
    }

    fn timeline(&self) -> &Timeline {
        self.scheduler.timeline()
    }

    // --- Units ------------------------------------------------------------

    /// Queue a prepared unit
    ///
    /// # Errors
    /// Shutdown or a reserved-name clash
    pub async fn submit(&self, unit: MutationUnit) -> WorkbenchResult<UnitHandle> {
        Ok(self.scheduler.submit(unit).await?)
    }

    /// Build a registered operation and queue it
    ///
    /// # Errors
    /// Unknown operation, rejected parameters, or a submission failure
    pub async fn submit_operation(&self, op: &str, params: Params) -> WorkbenchResult<UnitHandle> {
        let unit = self.registry.build(op, &params)?;
        self.submit(unit).await
    }

    /// Parse one script statement and queue it
    ///
    /// # Errors
    /// Syntax errors plus everything [`submit_operation`](Self::submit_operation) reports
    pub async fn submit_statement(&self, line: &str) -> WorkbenchResult<UnitHandle> {
        let statement = parse_statement(line)?;
        self.submit_operation(&statement.op, statement.params).await
    }

    /// Queue one unit per statement line of `text`, tagged with its line number
    ///
    /// Every line is parsed and built before anything is queued, so a
    /// malformed script queues nothing. Submission stops at the first
    /// rejected unit; units queued before it keep running. After
    /// `abort(None)` the rest of the script is not queued.
    ///
    /// # Errors
    /// [`WorkbenchError::Line`] wrapping the first failure
    pub async fn run_script(&self, text: &str) -> WorkbenchResult<Vec<UnitHandle>> {
        let mut units = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if is_blank_or_comment(line) {
                continue;
            }
            let number = index + 1;
            let unit = parse_statement(line)
                .map_err(WorkbenchError::from)
                .and_then(|statement| self.registry.build(&statement.op, &statement.params))
                .map_err(|e| e.at_line(number))?;
            units.push(unit.at_line(number));
        }
        tracing::info!("running script: {} statement(s)", units.len());

        let generation = {
            let mut scripts = self.scripts.lock();
            scripts.queued.retain(|h| h.outcome().is_none());
            scripts.generation
        };
        let mut handles = Vec::with_capacity(units.len());
        for unit in units {
            let number = unit.line().unwrap_or_default();
            if self.scripts.lock().generation != generation {
                tracing::info!("script stopped before line {number}");
                break;
            }
            let handle = self
                .scheduler
                .submit(unit)
                .await
                .map_err(|e| WorkbenchError::from(e).at_line(number))?;
            {
                let mut scripts = self.scripts.lock();
                if scripts.generation == generation {
                    scripts.queued.push(handle.clone());
                } else {
                    // The stop landed while this line was being queued.
                    let _ = self.scheduler.abort(handle.id());
                }
            }
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Abort `unit`; with `None`, stop everything: the running unit and
    /// every unit still queued by a running script
    ///
    /// Returns the units the request went to. Completion arrives later as
    /// lifecycle events.
    ///
    /// # Errors
    /// Unknown or already finished unit
    pub fn abort(&self, unit: Option<UnitId>) -> WorkbenchResult<Vec<UnitId>> {
        if let Some(id) = unit {
            self.scheduler.abort(id)?;
            return Ok(vec![id]);
        }

        let queued = {
            let mut scripts = self.scripts.lock();
            scripts.generation += 1;
            std::mem::take(&mut scripts.queued)
        };
        let mut aborted: Vec<UnitId> = self.scheduler.abort_active().into_iter().collect();
        for handle in queued {
            if handle.outcome().is_none() && !aborted.contains(&handle.id()) && self.scheduler.abort(handle.id()).is_ok() {
                aborted.push(handle.id());
            }
        }
        tracing::info!("stop requested: {} unit(s) signalled", aborted.len());
        Ok(aborted)
    }

    /// Wait until every queued unit and request has been processed
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    // --- History ----------------------------------------------------------

    /// Undo the most recent compound, after all queued work
    ///
    /// # Errors
    /// Nothing to undo, or the store no longer matches the compound
    pub async fn undo(&self) -> WorkbenchResult<StepOutcome> {
        Ok(self.scheduler.undo().await?)
    }

    /// Redo the most recently undone compound, after all queued work
    ///
    /// # Errors
    /// Nothing to redo, or the store no longer matches the compound
    pub async fn redo(&self) -> WorkbenchResult<StepOutcome> {
        Ok(self.scheduler.redo().await?)
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.timeline().can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.timeline().can_redo()
    }

    #[must_use]
    pub fn history_state(&self) -> HistoryState {
        self.timeline().state()
    }

    /// Applies to units submitted from now on
    pub fn set_recording(&self, recording: bool) {
        self.timeline().set_recording(recording);
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.timeline().is_recording()
    }

    #[must_use]
    pub fn script_text(&self) -> String {
        self.timeline().script_text()
    }

    /// Insert an operator-typed line at the script cursor
    pub fn insert_script_line(&self, text: impl Into<String>) -> usize {
        self.timeline().insert_text(text)
    }

    // --- Presentation state -------------------------------------------------

    pub fn set_view_setting(&self, key: impl Into<String>, value: Value) {
        self.presentation.lock().view_settings.insert(key.into(), value);
    }

    pub fn set_tabs(&self, open: Vec<String>, selected: Option<String>) {
        let mut presentation = self.presentation.lock();
        presentation.open_tabs = open;
        presentation.selected_tab = selected;
    }

    /// Presentation state as it would be saved
    #[must_use]
    pub fn auxiliary(&self) -> Auxiliary {
        Auxiliary {
            script_text: self.script_text(),
            ..self.presentation.lock().clone()
        }
    }

    // --- Sessions -----------------------------------------------------------

    /// Save the session to `path`
    ///
    /// Submissions are held off and the save runs in the execution slot,
    /// so it captures the state after everything queued before it.
    ///
    /// # Errors
    /// Serialization or I/O failures
    pub async fn save_session(&self, path: impl AsRef<Path>) -> WorkbenchResult<SaveSummary> {
        let path = path.as_ref().to_path_buf();
        let _pause = self.scheduler.pause_submissions().await;
        let serializer = self.serializer.clone();
        let presentation = self.presentation.lock().clone();
        let summary = self
            .scheduler
            .exclusive(move |store, timeline| {
                let auxiliary = Auxiliary {
                    script_text: timeline.script_text(),
                    ..presentation
                };
                serializer.save_path(&store.snapshot(), &auxiliary, &path)
            })
            .await??;
        Ok(summary)
    }

    /// Save the session into `writer`, handing the writer back
    ///
    /// # Errors
    /// Serialization or I/O failures
    pub async fn save_session_to<W>(&self, writer: W) -> WorkbenchResult<(SaveSummary, W)>
    where
        W: Write + Send + 'static,
    {
        let _pause = self.scheduler.pause_submissions().await;
        let serializer = self.serializer.clone();
        let presentation = self.presentation.lock().clone();
        let saved = self
            .scheduler
            .exclusive(move |store, timeline| {
                let mut writer = writer;
                let auxiliary = Auxiliary {
                    script_text: timeline.script_text(),
                    ..presentation
                };
                serializer
                    .save(&store.snapshot(), &auxiliary, &mut writer)
                    .map(|summary| (summary, writer))
            })
            .await??;
        Ok(saved)
    }

    /// Replace the store with the session at `path`
    ///
    /// Runs after everything queued before it. Edit history and redo
    /// entries are discarded and the saved script becomes the script text.
    /// On any failure the store, history and script are unchanged.
    ///
    /// # Errors
    /// - [`SessionError::Unmet`] listing each unmet requirement
    /// - size, decode and consistency failures
    pub async fn restore_session(&self, path: impl AsRef<Path>) -> WorkbenchResult<RestoreSummary> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let _pause = self.scheduler.pause_submissions().await;
        let serializer = self.serializer.clone();
        let summary = self
            .scheduler
            .exclusive(move |store, timeline| {
                serializer
                    .load_path(&path)
                    .and_then(|loaded| loaded.install(store, timeline))
            })
            .await??;
        self.adopt(&summary);
        Ok(summary)
    }

    /// [`restore_session`](Self::restore_session) from a reader
    ///
    /// # Errors
    /// See [`restore_session`](Self::restore_session)
    pub async fn restore_session_from<R>(&self, reader: R) -> WorkbenchResult<RestoreSummary>
    where
        R: Read + Send + 'static,
    {
        let _pause = self.scheduler.pause_submissions().await;
        let serializer = self.serializer.clone();
        let summary = self
            .scheduler
            .exclusive(move |store, timeline| serializer.restore(reader, store, timeline))
            .await??;
        self.adopt(&summary);
        Ok(summary)
    }

    /// Header and requirement check of a session file, without restoring
    ///
    /// # Errors
    /// Unreadable or malformed file
    pub fn inspect_session(&self, path: impl AsRef<Path>) -> WorkbenchResult<SessionInfo> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SessionError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.serializer.inspect(file)?)
    }

    fn adopt(&self, summary: &RestoreSummary) {
        *self.presentation.lock() = Auxiliary {
            script_text: String::new(),
            ..summary.auxiliary.clone()
        };
    }

    // --- Events and shutdown ----------------------------------------------

    /// Take the presentation event stream (single consumer)
    pub fn events(&self) -> Option<EventStream> {
        self.scheduler.take_events()
    }

    /// Additional lossy observer
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.scheduler.subscribe()
    }

    /// Stop the scheduler; with `wait`, queued units finish first
    ///
    /// # Errors
    /// The worker task panicked
    pub async fn shutdown(&self, wait: bool) -> WorkbenchResult<()> {
        Ok(self.scheduler.shutdown(wait).await?)
    }
}

impl std::fmt::Debug for Workbench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbench")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("operations", &self.registry.len())
            .finish_non_exhaustive()
    }
}
