//! Execution context handed to running mutations
//!
//! Edits are staged in a private [`StoreTxn`]; readers of the shared store
//! see nothing until the unit finishes or calls
//! [`MutationContext::checkpoint`], and then see all staged edits at once.

use crate::error::MutationError;
use crate::event::{Event, EventSink, Progress, UnitEvent};
use crate::lifecycle::Phase;
use crate::unit::UnitId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use wb_store::{
    DataObject, EditRecord, ObjectBody, ObjectName, ObjectStore, Snapshot, StoreError, StoreTxn,
};

/// Cooperative cancellation flag
#[derive(Debug, Default)]
pub struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; never blocks
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Commit rights and committed records of one execution attempt
///
/// After [`revoke`](Attempt::revoke) the attempt can neither commit nor
/// report progress, so a unit abandoned after the cancel grace period
/// cannot touch the store behind the next unit's back.
#[derive(Debug, Default)]
pub(crate) struct Attempt {
    inner: Mutex<AttemptInner>,
}

#[derive(Debug, Default)]
struct AttemptInner {
    revoked: bool,
    committed: Vec<EditRecord>,
}

impl Attempt {
    fn commit(&self, store: &ObjectStore, txn: StoreTxn, staged: Vec<EditRecord>) -> Result<(), MutationError> {
        let mut inner = self.inner.lock();
        if inner.revoked {
            return Err(StoreError::Revoked.into());
        }
        store.commit(txn)?;
        inner.committed.extend(staged);
        Ok(())
    }

    fn while_live(&self, f: impl FnOnce()) {
        let inner = self.inner.lock();
        if !inner.revoked {
            f();
        }
    }

    /// Withdraw commit rights and hand back what was committed so far
    pub(crate) fn revoke(&self) -> Vec<EditRecord> {
        let mut inner = self.inner.lock();
        inner.revoked = true;
        std::mem::take(&mut inner.committed)
    }

    pub(crate) fn take_committed(&self) -> Vec<EditRecord> {
        std::mem::take(&mut self.inner.lock().committed)
    }
}

/// Emits progress for one unit
#[derive(Debug, Clone)]
pub(crate) struct Reporter {
    pub(crate) events: Arc<EventSink>,
    pub(crate) unit_id: UnitId,
    pub(crate) unit_name: String,
    pub(crate) sequence: u64,
}

impl Reporter {
    pub(crate) fn emit(&self, phase: Phase, progress: Option<Progress>, message: impl Into<String>) {
        self.events.emit(Event::Unit(UnitEvent {
            unit_id: self.unit_id,
            unit_name: self.unit_name.clone(),
            sequence: self.sequence,
            phase,
            progress,
            message: message.into(),
        }));
    }
}

/// Store access and progress reporting for a running mutation
#[derive(Debug)]
pub struct MutationContext {
    store: Arc<ObjectStore>,
    working: StoreTxn,
    staged: Vec<EditRecord>,
    attempt: Arc<Attempt>,
    cancel: Arc<CancelToken>,
    reporter: Reporter,
}

impl MutationContext {
    pub(crate) fn new(
        store: Arc<ObjectStore>,
        attempt: Arc<Attempt>,
        cancel: Arc<CancelToken>,
        reporter: Reporter,
    ) -> Self {
        let working = store.begin();
        Self {
            store,
            working,
            staged: Vec::new(),
            attempt,
            cancel,
            reporter,
        }
    }

    /// Context outside any scheduler, for running a mutation directly
    ///
    /// Progress goes nowhere and cancellation is never requested.
    #[must_use]
    pub fn detached(store: Arc<ObjectStore>) -> Self {
        let reporter = Reporter {
            events: Arc::new(EventSink::new(1)),
            unit_id: UnitId::new(),
            unit_name: "detached".into(),
            sequence: 0,
        };
        Self::new(store, Arc::default(), Arc::default(), reporter)
    }

    /// Current view, including this unit's staged edits
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.working.view()
    }

    #[must_use]
    pub fn get(&self, name: &ObjectName) -> Option<Arc<DataObject>> {
        self.working.get(name).cloned()
    }

    /// Object that must exist
    ///
    /// # Errors
    /// [`StoreError::NotFound`] as a mutation error
    pub fn require(&self, name: &ObjectName) -> Result<Arc<DataObject>, MutationError> {
        self.get(name)
            .ok_or_else(|| StoreError::NotFound(name.clone()).into())
    }

    /// Apply a record to the working copy and keep it for the history
    ///
    /// # Errors
    /// The store's validation failure; nothing is staged in that case.
    pub fn stage(&mut self, record: EditRecord) -> Result<(), MutationError> {
        self.working.apply(&record)?;
        self.staged.push(record);
        Ok(())
    }

    /// Stage creation of a new object
    ///
    /// # Errors
    /// Name taken or unresolved references
    pub fn create(&mut self, object: DataObject) -> Result<(), MutationError> {
        self.stage(EditRecord::created(Arc::new(object)))
    }

    /// Stage a whole-object replacement
    ///
    /// # Errors
    /// Object missing or unresolved references
    pub fn replace(&mut self, object: DataObject) -> Result<(), MutationError> {
        let before = self.require(object.name())?;
        self.stage(EditRecord::replaced(before, Arc::new(object)))
    }

    /// Stage removal
    ///
    /// # Errors
    /// Object missing or still referenced
    pub fn remove(&mut self, name: &ObjectName) -> Result<(), MutationError> {
        let before = self.require(name)?;
        self.stage(EditRecord::removed(before))
    }

    /// Stage a single-row change of an alignment (`None` deletes the row)
    ///
    /// Only the row is recorded, not the alignment.
    ///
    /// # Errors
    /// Object missing, not an alignment, or deleting a missing row
    pub fn replace_row(&mut self, name: &ObjectName, row: &str, fragment: Option<&str>) -> Result<(), MutationError> {
        let object = self.require(name)?;
        let ObjectBody::Alignment(alignment) = object.body() else {
            return Err(StoreError::WrongType {
                name: name.clone(),
                expected: "alignment",
                actual: object.type_tag(),
            }
            .into());
        };
        let before = alignment.row(row).cloned();
        self.stage(EditRecord::row(name.clone(), row, before, fragment.map(Arc::from)))
    }

    /// Publish the staged edits atomically
    ///
    /// Committed edits stay in the store even if the unit later fails,
    /// unless the operator chooses abort-and-rollback. Returns the number
    /// of records published.
    ///
    /// # Errors
    /// [`StoreError::Revoked`] after forced abandonment
    pub fn checkpoint(&mut self) -> Result<usize, MutationError> {
        if self.staged.is_empty() {
            return Ok(0);
        }
        let staged = std::mem::take(&mut self.staged);
        let count = staged.len();
        self.attempt.commit(&self.store, self.working.clone(), staged)?;
        self.working = self.store.begin();
        Ok(count)
    }

    /// Publish remaining edits and return every record this attempt committed
    ///
    /// # Errors
    /// See [`checkpoint`](Self::checkpoint)
    pub fn finish(mut self) -> Result<Vec<EditRecord>, MutationError> {
        self.checkpoint()?;
        Ok(self.attempt.take_committed())
    }

    /// Report progress (clamped to 100)
    pub fn progress(&self, percent: u8) {
        self.report(Some(Progress::Percent(percent.min(100))), String::new());
    }

    /// Report progress with a status message
    pub fn progress_with(&self, percent: u8, message: impl Into<String>) {
        self.report(Some(Progress::Percent(percent.min(100))), message.into());
    }

    /// Report that the remaining work cannot be estimated
    pub fn indeterminate(&self) {
        self.report(Some(Progress::Indeterminate), String::new());
    }

    fn report(&self, progress: Option<Progress>, message: String) {
        self.attempt
            .while_live(|| self.reporter.emit(Phase::Running, progress, message));
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Bail out if cancellation was requested
    ///
    /// # Errors
    /// [`MutationError::Cancelled`]
    pub fn check_cancelled(&self) -> Result<(), MutationError> {
        if self.is_cancelled() {
            Err(MutationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Number of edits not yet published
    #[inline]
    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wb_store::{Alignment, Alphabet};

    fn name(s: &str) -> ObjectName {
        ObjectName::new(s).unwrap()
    }

    #[test]
    fn staged_edits_are_private_until_finish() {
        let store = Arc::new(ObjectStore::new());
        let mut ctx = MutationContext::detached(Arc::clone(&store));
        ctx.create(DataObject::sequence(name("a"), Alphabet::Dna, "ACGT").unwrap()).unwrap();
        assert!(ctx.snapshot().contains(&name("a")));
        assert!(store.is_empty());

        let records = ctx.finish().unwrap();
        assert_eq!(records.len(), 1);
        assert!(store.get(&name("a")).is_some());
    }

    #[test]
    fn checkpoint_publishes_and_keeps_records() {
        let store = Arc::new(ObjectStore::new());
        let mut ctx = MutationContext::detached(Arc::clone(&store));
        ctx.create(DataObject::sequence(name("a"), Alphabet::Dna, "A").unwrap()).unwrap();
        assert_eq!(ctx.checkpoint().unwrap(), 1);
        assert_eq!(store.len(), 1);

        ctx.create(DataObject::sequence(name("b"), Alphabet::Dna, "C").unwrap()).unwrap();
        assert_eq!(ctx.finish().unwrap().len(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn revoked_attempt_cannot_commit() {
        let store = Arc::new(ObjectStore::new());
        let attempt = Arc::new(Attempt::default());
        let reporter = Reporter {
            events: Arc::new(EventSink::new(1)),
            unit_id: UnitId::new(),
            unit_name: "t".into(),
            sequence: 0,
        };
        let mut ctx = MutationContext::new(Arc::clone(&store), Arc::clone(&attempt), Arc::default(), reporter);
        ctx.create(DataObject::sequence(name("a"), Alphabet::Dna, "A").unwrap()).unwrap();
        assert!(attempt.revoke().is_empty());

        let err = ctx.checkpoint().unwrap_err();
        assert!(err.is_cancellation());
        assert!(store.is_empty());
    }

    #[test]
    fn replace_row_records_only_the_row() {
        let aln = DataObject::new(
            name("aln"),
            ObjectBody::Alignment(Alignment::from_rows([("r1", "AAAA")])),
        )
        .unwrap();
        let store = Arc::new(ObjectStore::with_objects([aln]).unwrap());
        let mut ctx = MutationContext::detached(store);
        ctx.replace_row(&name("aln"), "r1", Some("CCCC")).unwrap();
        let records = ctx.finish().unwrap();
        assert!(records[0].is_partial());
    }

    #[test]
    fn cancellation_is_observed() {
        let cancel = Arc::new(CancelToken::new());
        let reporter = Reporter {
            events: Arc::new(EventSink::new(1)),
            unit_id: UnitId::new(),
            unit_name: "t".into(),
            sequence: 0,
        };
        let ctx = MutationContext::new(Arc::new(ObjectStore::new()), Arc::default(), Arc::clone(&cancel), reporter);
        assert!(ctx.check_cancelled().is_ok());
        cancel.cancel();
        assert_eq!(ctx.check_cancelled(), Err(MutationError::Cancelled));
    }
}
