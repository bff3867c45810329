//! Edit history and script mirror kept in step
//!
//! [`Timeline`] holds both behind one lock so a reader can never observe a
//! compound without its script line, or the other way round.

use crate::error::HistoryResult;
use crate::history::{CompoundId, EditHistory, PushOutcome};
use crate::script::ScriptMirror;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use wb_store::{EditRecord, ObjectStore};

/// Undo/redo availability, published after every history change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryState {
    pub can_undo: bool,
    pub can_redo: bool,
    pub undo_label: Option<String>,
    pub redo_label: Option<String>,
    pub depth: usize,
}

/// What an undo or redo touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub compound: CompoundId,
    pub label: String,
    /// Index of the script line retracted or reinserted
    pub script_line: Option<usize>,
    pub state: HistoryState,
}

#[derive(Debug)]
struct Inner {
    history: EditHistory,
    mirror: ScriptMirror,
}

impl Inner {
    fn state(&self) -> HistoryState {
        HistoryState {
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
            undo_label: self.history.undo_label().map(str::to_string),
            redo_label: self.history.redo_label().map(str::to_string),
            depth: self.history.depth(),
        }
    }

    fn settle(&mut self, outcome: &PushOutcome) {
        self.mirror.forget(&outcome.discarded);
        self.mirror.unpair(&outcome.evicted);
    }
}

/// Edit history plus its paired script mirror
#[derive(Debug)]
pub struct Timeline {
    inner: Mutex<Inner>,
}

impl Timeline {
    /// Create with a bounded history
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                history: EditHistory::new(history_limit),
                mirror: ScriptMirror::new(),
            }),
        }
    }

    /// Record the edits of one finished mutation as a single compound
    ///
    /// `statement` is the script line to pair with the compound; pass
    /// `None` when recording was off at submission. Returns `None` when
    /// `records` is empty.
    ///
    /// # Errors
    /// [`crate::HistoryError::CompoundOpen`] if a manual compound is open
    pub fn commit_unit(
        &self,
        label: &str,
        records: Vec<EditRecord>,
        statement: Option<String>,
    ) -> HistoryResult<Option<CompoundId>> {
        let mut inner = self.inner.lock();
        inner.history.begin_compound(label)?;
        for record in records {
            inner.history.add_record(record)?;
        }
        let (id, outcome) = inner.history.end_compound()?;
        inner.settle(&outcome);
        if let (Some(id), Some(statement)) = (id, statement) {
            let line = inner.mirror.record(id, statement);
            tracing::debug!("recorded {id} at script line {line}");
        }
        Ok(id)
    }

    /// Open a manual compound
    ///
    /// # Errors
    /// [`crate::HistoryError::CompoundOpen`] if one is already open
    pub fn begin_compound(&self, label: &str) -> HistoryResult<CompoundId> {
        self.inner.lock().history.begin_compound(label)
    }

    /// Add an already-applied record to the open compound
    ///
    /// # Errors
    /// [`crate::HistoryError::NoOpenCompound`] outside a compound
    pub fn add_record(&self, record: EditRecord) -> HistoryResult<()> {
        self.inner.lock().history.add_record(record)
    }

    /// Close the manual compound, pairing it with `statement` if given
    ///
    /// # Errors
    /// [`crate::HistoryError::NoOpenCompound`] outside a compound
    pub fn end_compound(&self, statement: Option<String>) -> HistoryResult<Option<CompoundId>> {
        let mut inner = self.inner.lock();
        let (id, outcome) = inner.history.end_compound()?;
        inner.settle(&outcome);
        if let (Some(id), Some(statement)) = (id, statement) {
            inner.mirror.record(id, statement);
        }
        Ok(id)
    }

    /// Undo the latest compound and retract its script line
    ///
    /// # Errors
    /// See [`EditHistory::undo`]; on error nothing changes.
    pub fn undo(&self, store: &ObjectStore) -> HistoryResult<StepOutcome> {
        let mut inner = self.inner.lock();
        let (compound, label) = {
            let compound = inner.history.undo(store)?;
            (compound.id(), compound.label().to_string())
        };
        let script_line = inner.mirror.retract(compound);
        Ok(StepOutcome {
            compound,
            label,
            script_line,
            state: inner.state(),
        })
    }

    /// Redo the latest undone compound and reinsert its script line
    ///
    /// # Errors
    /// See [`EditHistory::redo`]; on error nothing changes.
    pub fn redo(&self, store: &ObjectStore) -> HistoryResult<StepOutcome> {
        let mut inner = self.inner.lock();
        let (compound, label) = {
            let compound = inner.history.redo(store)?;
            (compound.id(), compound.label().to_string())
        };
        let script_line = inner.mirror.reinsert(compound);
        Ok(StepOutcome {
            compound,
            label,
            script_line,
            state: inner.state(),
        })
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.inner.lock().history.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.inner.lock().history.can_redo()
    }

    #[must_use]
    pub fn state(&self) -> HistoryState {
        self.inner.lock().state()
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.inner.lock().mirror.is_recording()
    }

    pub fn set_recording(&self, recording: bool) {
        self.inner.lock().mirror.set_recording(recording);
        tracing::info!("script recording {}", if recording { "on" } else { "off" });
    }

    pub fn set_cursor(&self, cursor: Option<usize>) {
        self.inner.lock().mirror.set_cursor(cursor);
    }

    /// Insert an operator-typed script line at the cursor
    pub fn insert_text(&self, text: impl Into<String>) -> usize {
        self.inner.lock().mirror.insert_text(text)
    }

    #[must_use]
    pub fn script_text(&self) -> String {
        self.inner.lock().mirror.text()
    }

    /// Index of the script line paired with `compound`
    #[must_use]
    pub fn script_position(&self, compound: CompoundId) -> Option<usize> {
        self.inner.lock().mirror.position(compound)
    }

    /// Number of compounds that can be undone
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.lock().history.depth()
    }

    /// Discard all history and load `script` as unpaired lines
    ///
    /// Used after a session restore: the restored objects have no
    /// relationship to any earlier edit record.
    pub fn reset(&self, script: &str) {
        let mut inner = self.inner.lock();
        inner.history.clear();
        inner.mirror.load_text(script);
        tracing::debug!("timeline reset ({} script line(s))", inner.mirror.len());
    }

    /// Discard history and script alike
    pub fn clear(&self) {
        self.reset("");
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(EditHistory::DEFAULT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wb_store::{Alphabet, DataObject, ObjectName};

    fn create(store: &ObjectStore, n: &str) -> EditRecord {
        let record = EditRecord::created(Arc::new(
            DataObject::sequence(ObjectName::new(n).unwrap(), Alphabet::Dna, "ACGT").unwrap(),
        ));
        crate::history::apply_all(store, std::slice::from_ref(&record)).unwrap();
        record
    }

    #[test]
    fn undo_retracts_and_redo_reinserts_line() {
        let store = ObjectStore::new();
        let timeline = Timeline::default();
        timeline.set_recording(true);
        timeline.insert_text("# session");
        timeline
            .commit_unit("a", vec![create(&store, "a")], Some("create_sequence(name=\"a\")".into()))
            .unwrap();
        timeline
            .commit_unit("b", vec![create(&store, "b")], Some("create_sequence(name=\"b\")".into()))
            .unwrap();
        timeline.insert_text("# end");

        let undo = timeline.undo(&store).unwrap();
        assert_eq!(undo.script_line, Some(2));
        assert_eq!(timeline.script_text(), "# session\ncreate_sequence(name=\"a\")\n# end");

        let redo = timeline.redo(&store).unwrap();
        assert_eq!(redo.script_line, Some(2));
        assert_eq!(
            timeline.script_text(),
            "# session\ncreate_sequence(name=\"a\")\ncreate_sequence(name=\"b\")\n# end"
        );
    }

    #[test]
    fn unrecorded_units_have_no_line() {
        let store = ObjectStore::new();
        let timeline = Timeline::default();
        let id = timeline.commit_unit("a", vec![create(&store, "a")], None).unwrap().unwrap();
        assert_eq!(timeline.script_position(id), None);
        assert_eq!(timeline.undo(&store).unwrap().script_line, None);
    }

    #[test]
    fn state_reflects_labels() {
        let store = ObjectStore::new();
        let timeline = Timeline::default();
        timeline.commit_unit("make a", vec![create(&store, "a")], None).unwrap();
        assert_eq!(
            timeline.state(),
            HistoryState {
                can_undo: true,
                can_redo: false,
                undo_label: Some("make a".into()),
                redo_label: None,
                depth: 1,
            }
        );
        let outcome = timeline.undo(&store).unwrap();
        assert_eq!(outcome.state.redo_label.as_deref(), Some("make a"));
    }

    #[test]
    fn reset_discards_history_and_loads_script() {
        let store = ObjectStore::new();
        let timeline = Timeline::default();
        timeline.commit_unit("a", vec![create(&store, "a")], Some("x".into())).unwrap();
        timeline.reset("line one\nline two");
        assert!(!timeline.can_undo());
        assert_eq!(timeline.script_text(), "line one\nline two");
    }
}
