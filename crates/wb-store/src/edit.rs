//! Reversible edit records
//!
//! Provides [`EditRecord`], the delta produced as a side effect of running a
//! mutation. Records are immutable once built and can be applied forwards
//! (redo) or backwards (undo) against a [`StoreTxn`].

use crate::error::{StoreError, StoreResult};
use crate::name::ObjectName;
use crate::object::{DataObject, ObjectBody};
use crate::store::StoreTxn;
use std::sync::Arc;

/// Reversible delta on the data store
///
/// # Invariants
/// - Reverting a `Full` record restores exactly the previous instance
///   (the same `Arc`, hence byte-for-byte identical).
/// - Reverting a `Partial` record reverses exactly one row-level change.
/// - Both directions verify that the store holds the state the record
///   expects before changing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditRecord {
    /// Whole-object swap. `None` means "absent", so create and delete are
    /// full records with one empty side.
    Full {
        name: ObjectName,
        before: Option<Arc<DataObject>>,
        after: Option<Arc<DataObject>>,
    },

    /// One row of an alignment changed; the rest of the dataset is untouched
    Partial {
        name: ObjectName,
        row: String,
        before: Option<Arc<str>>,
        after: Option<Arc<str>>,
    },
}

impl EditRecord {
    /// Record for a newly created object
    #[inline]
    #[must_use]
    pub fn created(object: Arc<DataObject>) -> Self {
        Self::Full {
            name: object.name().clone(),
            before: None,
            after: Some(object),
        }
    }

    /// Record for an object replaced in place
    #[inline]
    #[must_use]
    pub fn replaced(before: Arc<DataObject>, after: Arc<DataObject>) -> Self {
        Self::Full {
            name: after.name().clone(),
            before: Some(before),
            after: Some(after),
        }
    }

    /// Record for a removed object
    #[inline]
    #[must_use]
    pub fn removed(before: Arc<DataObject>) -> Self {
        Self::Full {
            name: before.name().clone(),
            before: Some(before),
            after: None,
        }
    }

    /// Record for a single-row change
    #[inline]
    #[must_use]
    pub fn row(
        name: ObjectName,
        row: impl Into<String>,
        before: Option<Arc<str>>,
        after: Option<Arc<str>>,
    ) -> Self {
        Self::Partial {
            name,
            row: row.into(),
            before,
            after,
        }
    }

    /// Name of the affected object
    #[inline]
    #[must_use]
    pub fn name(&self) -> &ObjectName {
        match self {
            Self::Full { name, .. } | Self::Partial { name, .. } => name,
        }
    }

    /// True for row-level records
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    /// The same change in the opposite direction
    #[must_use]
    pub fn inverse(&self) -> Self {
        match self {
            Self::Full { name, before, after } => Self::Full {
                name: name.clone(),
                before: after.clone(),
                after: before.clone(),
            },
            Self::Partial {
                name,
                row,
                before,
                after,
            } => Self::Partial {
                name: name.clone(),
                row: row.clone(),
                before: after.clone(),
                after: before.clone(),
            },
        }
    }

    /// Human-readable summary
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Full {
                name,
                before: None,
                after: Some(_),
            } => format!("create {name}"),
            Self::Full {
                name,
                before: Some(_),
                after: None,
            } => format!("remove {name}"),
            Self::Full { name, .. } => format!("replace {name}"),
            Self::Partial { name, row, .. } => format!("edit row {row} of {name}"),
        }
    }

    /// Apply forwards: requires the store to hold `before`, leaves `after`
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if the precondition fails, or the store's
    /// own validation error.
    pub fn apply(&self, txn: &mut StoreTxn) -> StoreResult<()> {
        self.transition(txn, false)
    }

    /// Apply backwards: requires the store to hold `after`, leaves `before`
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if the postcondition fails, or the store's
    /// own validation error (e.g. restoring an object whose references were
    /// removed by a later edit).
    pub fn revert(&self, txn: &mut StoreTxn) -> StoreResult<()> {
        self.transition(txn, true)
    }

    fn transition(&self, txn: &mut StoreTxn, backwards: bool) -> StoreResult<()> {
        match self {
            Self::Full { name, before, after } => {
                let (expected, target) = if backwards { (after, before) } else { (before, after) };
                let current = txn.get(name);
                if !same_object(current, expected.as_ref()) {
                    return Err(StoreError::Conflict {
                        name: name.clone(),
                        reason: format!(
                            "expected {}, found {}",
                            presence(expected.as_ref()),
                            presence(current)
                        ),
                    });
                }
                txn.put(name, target.clone())
            }
            Self::Partial {
                name,
                row,
                before,
                after,
            } => {
                let (expected, target) = if backwards { (after, before) } else { (before, after) };
                let current = current_row(txn, name, row)?;
                if current.as_deref() != expected.as_deref() {
                    return Err(StoreError::Conflict {
                        name: name.clone(),
                        reason: format!("row {row} changed since the edit was recorded"),
                    });
                }
                txn.replace_row(name, row, target.clone()).map(|_| ())
            }
        }
    }
}

fn same_object(current: Option<&Arc<DataObject>>, expected: Option<&Arc<DataObject>>) -> bool {
    match (current, expected) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
        _ => false,
    }
}

fn presence(object: Option<&Arc<DataObject>>) -> &'static str {
    if object.is_some() {
        "a different object"
    } else {
        "no object"
    }
}

fn current_row(txn: &StoreTxn, name: &ObjectName, row: &str) -> StoreResult<Option<Arc<str>>> {
    let object = txn
        .get(name)
        .ok_or_else(|| StoreError::NotFound(name.clone()))?;
    match object.body() {
        ObjectBody::Alignment(alignment) => Ok(alignment.row(row).cloned()),
        _ => Err(StoreError::WrongType {
            name: name.clone(),
            expected: "alignment",
            actual: object.type_tag(),
        }),
    }
}
