//! Error types for the data store
//!
//! Also home of [`ErrorClass`], the classification every workbench error
//! reports so presentation code can decide how to render it.

use crate::name::ObjectName;

/// How a failure should be presented to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Caused by operator input (invalid parameters, name collisions)
    User,
    /// Internal invariant violation, always surfaced with full detail
    System,
    /// Version or plugin mismatch while restoring a session
    Compatibility,
    /// Cooperative abort; not reported as a failure
    Cancellation,
}

impl ErrorClass {
    /// Short lowercase label used in logs and events
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Compatibility => "compatibility",
            Self::Cancellation => "cancellation",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by store mutations and edit records
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Name is syntactically invalid
    #[error("invalid object name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// An object with this name already exists
    #[error("object already exists: {0}")]
    NameTaken(ObjectName),

    /// Object not present in the store
    #[error("object not found: {0}")]
    NotFound(ObjectName),

    /// Insertion would create a reference to a missing object
    #[error("{from} references unknown object {missing}")]
    UnknownReference {
        from: ObjectName,
        missing: ObjectName,
    },

    /// Removal would leave other objects with dangling references
    #[error("{name} is still referenced by {}", .referrers.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    StillReferenced {
        name: ObjectName,
        referrers: Vec<ObjectName>,
    },

    /// Operation is not valid for the object's type
    #[error("{name} is a {actual}, expected {expected}")]
    WrongType {
        name: ObjectName,
        expected: &'static str,
        actual: &'static str,
    },

    /// Row missing from an alignment
    #[error("row {row:?} not found in {name}")]
    RowNotFound { name: ObjectName, row: String },

    /// The store no longer holds the state an edit record expects
    #[error("conflict on {name}: {reason}")]
    Conflict { name: ObjectName, reason: String },

    /// Residues contain characters outside the declared alphabet
    #[error("invalid residue {residue:?} for {alphabet} alphabet")]
    InvalidResidue { alphabet: &'static str, residue: char },

    /// Transaction was built on an outdated store version
    #[error("stale transaction: based on version {base}, store is at {current}")]
    StaleTransaction { base: u64, current: u64 },

    /// Writer lost its right to commit (forcibly abandoned)
    #[error("commit rejected: writer was revoked")]
    Revoked,
}

impl StoreError {
    /// Classification for presentation
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidName { .. }
            | Self::NameTaken(_)
            | Self::NotFound(_)
            | Self::UnknownReference { .. }
            | Self::StillReferenced { .. }
            | Self::WrongType { .. }
            | Self::RowNotFound { .. }
            | Self::InvalidResidue { .. } => ErrorClass::User,
            Self::Conflict { .. } | Self::StaleTransaction { .. } => ErrorClass::System,
            Self::Revoked => ErrorClass::Cancellation,
        }
    }
}

/// Convenience alias
pub type StoreResult<T> = Result<T, StoreError>;
