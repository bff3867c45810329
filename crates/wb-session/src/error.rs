//! Session error types

use crate::requirement::Unmet;
use std::path::PathBuf;
use thiserror::Error;
use wb_store::{ErrorClass, ObjectName, StoreError};

/// Failure while saving, inspecting or restoring a session
///
/// Restore failures are all reported before the live store is touched.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session io error at {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The runtime cannot read this session; lists every unmet requirement
    #[error("session has {} unmet requirement(s): {}", .0.len(), join(.0))]
    Unmet(Vec<Unmet>),

    /// Session exceeds the size limit or its buffer could not be allocated
    #[error("session of {size} bytes does not fit in memory (limit {limit} bytes); raise max_session_bytes or free memory")]
    OutOfMemory { size: u64, limit: u64 },

    #[error("session json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Well-formed JSON that is not a session envelope
    #[error("malformed session: {0}")]
    Malformed(String),

    #[error("object {object} of type {type_tag:?} cannot be decoded: {source}")]
    Object {
        object: String,
        type_tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("object {0} appears more than once")]
    DuplicateName(ObjectName),

    #[error("object {object} references {missing}, which is not in the session")]
    DanglingReference { object: ObjectName, missing: ObjectName },

    #[error("objects form a reference cycle through {0}")]
    ReferenceCycle(ObjectName),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn join(unmet: &[Unmet]) -> String {
    unmet.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl SessionError {
    /// Classification for presentation
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unmet(_) | Self::OutOfMemory { .. } => ErrorClass::Compatibility,
            Self::Io(_) | Self::File { .. } => ErrorClass::User,
            Self::Json(_)
            | Self::Malformed(_)
            | Self::Object { .. }
            | Self::DuplicateName(_)
            | Self::DanglingReference { .. }
            | Self::ReferenceCycle(_) => ErrorClass::System,
            Self::Store(e) => e.class(),
        }
    }

    /// Unmet requirements, if that is why the restore failed
    #[must_use]
    pub fn unmet(&self) -> &[Unmet] {
        match self {
            Self::Unmet(unmet) => unmet,
            _ => &[],
        }
    }
}

/// Convenience alias
pub type SessionResult<T> = Result<T, SessionError>;
