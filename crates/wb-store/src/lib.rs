//! Workbench data store
//!
//! Named, immutable data objects behind a snapshot-readable store, plus the
//! reversible edit records that undo and redo are built from.
//!
//! # Core Concepts
//!
//! - [`DataObject`]: a named object with a typed [`ObjectBody`]
//! - [`ObjectStore`]: single-writer store; readers take O(1) [`Snapshot`]s
//! - [`StoreTxn`]: private working copy, committed atomically
//! - [`EditRecord`]: full or row-level delta that can be applied both ways
//! - [`Fingerprint`]: Blake3 digest for byte-for-byte state comparison
//!
//! # Example
//!
//! ```rust,ignore
//! use wb_store::{Alphabet, DataObject, EditRecord, ObjectName, ObjectStore};
//!
//! let store = ObjectStore::new();
//! let seq = Arc::new(DataObject::sequence(ObjectName::new("seqA")?, Alphabet::Dna, "ACGT")?);
//! let record = EditRecord::created(seq);
//!
//! let mut txn = store.begin();
//! txn.apply(&record)?;
//! store.commit(txn)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod edit;
mod error;
mod fingerprint;
mod name;
mod object;
mod store;

pub use edit::EditRecord;
pub use error::{ErrorClass, StoreError, StoreResult};
pub use fingerprint::Fingerprint;
pub use name::ObjectName;
pub use object::{
    Alignment, Alphabet, Collection, DataObject, Extension, Motif, ObjectBody, Partition, Sequence,
};
pub use store::{ObjectMap, ObjectStore, Snapshot, StoreTxn};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
