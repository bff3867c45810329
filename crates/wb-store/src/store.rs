//! The shared data store
//!
//! [`ObjectStore`] maps unique names to immutable [`DataObject`]s. It has
//! one writer at a time and any number of readers:
//!
//! - Readers take a [`Snapshot`], an O(1) copy of a persistent map.
//! - Writers build a [`StoreTxn`] on a private copy, then [`ObjectStore::commit`]
//!   swaps it in under the write lock. A mutation touching several objects
//!   becomes visible all at once or not at all.
//!
//! Every write path validates name references, so the store never holds an
//! object referring to a missing one.

use crate::edit::EditRecord;
use crate::error::{StoreError, StoreResult};
use crate::fingerprint::Fingerprint;
use crate::name::ObjectName;
use crate::object::{DataObject, ObjectBody};
use im::OrdMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Persistent name → object map
pub type ObjectMap = OrdMap<ObjectName, Arc<DataObject>>;

/// Point-in-time view of the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    objects: ObjectMap,
    version: u64,
}

impl Snapshot {
    /// Object by name
    #[inline]
    #[must_use]
    pub fn get(&self, name: &ObjectName) -> Option<&Arc<DataObject>> {
        self.objects.get(name)
    }

    /// Whether an object with this name exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &ObjectName) -> bool {
        self.objects.contains_key(name)
    }

    /// Number of objects
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when the store holds nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects in name order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<DataObject>> {
        self.objects.values()
    }

    /// Commit counter at the time of the snapshot
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Objects that reference `name`
    #[must_use]
    pub fn referrers(&self, name: &ObjectName) -> Vec<ObjectName> {
        referrers(&self.objects, name)
    }

    /// Digest of the canonical serialized form
    ///
    /// Two snapshots with equal fingerprints are byte-for-byte identical
    /// when serialized.
    ///
    /// # Errors
    /// Returns error if an object fails to serialize
    pub fn fingerprint(&self) -> Result<Fingerprint, serde_json::Error> {
        let objects: Vec<&Arc<DataObject>> = self.objects.values().collect();
        Fingerprint::of_serializable(&objects)
    }
}

/// Shared, concurrently readable data store
#[derive(Debug, Default)]
pub struct ObjectStore {
    state: RwLock<Snapshot>,
}

impl ObjectStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state; never blocks behind a running mutation
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.state.read().clone()
    }

    /// Object by name
    #[must_use]
    pub fn get(&self, name: &ObjectName) -> Option<Arc<DataObject>> {
        self.state.read().get(name).cloned()
    }

    /// Number of objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    /// True when the store holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// Start a transaction on the current state
    #[must_use]
    pub fn begin(&self) -> StoreTxn {
        let state = self.state.read();
        StoreTxn {
            base_version: state.version,
            objects: state.objects.clone(),
        }
    }

    /// Start a transaction that replaces the entire content
    ///
    /// Used by session restore: objects are inserted through the normal
    /// validating entry points into an empty map, then swapped in.
    #[must_use]
    pub fn begin_empty(&self) -> StoreTxn {
        StoreTxn {
            base_version: self.state.read().version,
            objects: ObjectMap::new(),
        }
    }

    /// Atomically publish a transaction
    ///
    /// # Errors
    /// Returns [`StoreError::StaleTransaction`] if another commit happened since the
    /// transaction began.
    pub fn commit(&self, txn: StoreTxn) -> StoreResult<u64> {
        let mut state = self.state.write();
        if state.version != txn.base_version {
            return Err(StoreError::StaleTransaction {
                base: txn.base_version,
                current: state.version,
            });
        }
        state.objects = txn.objects;
        state.version += 1;
        tracing::trace!(version = state.version, objects = state.objects.len(), "store commit");
        Ok(state.version)
    }

    /// Remove every object
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.objects = ObjectMap::new();
        state.version += 1;
    }

    /// Create a store pre-populated through the validating insert path
    ///
    /// # Errors
    /// Returns the first insertion failure
    pub fn with_objects<I>(objects: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = DataObject>,
    {
        let store = Self::new();
        let mut txn = store.begin();
        for object in objects {
            txn.insert(Arc::new(object))?;
        }
        store.commit(txn)?;
        Ok(store)
    }
}

/// Private working copy of the store
///
/// All mutations validate references against the working copy, so a
/// transaction can create an object and, later in the same transaction,
/// an object referencing it.
#[derive(Debug, Clone)]
pub struct StoreTxn {
    base_version: u64,
    objects: ObjectMap,
}

impl StoreTxn {
    /// Object by name in the working copy
    #[inline]
    #[must_use]
    pub fn get(&self, name: &ObjectName) -> Option<&Arc<DataObject>> {
        self.objects.get(name)
    }

    /// Whether the working copy holds `name`
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &ObjectName) -> bool {
        self.objects.contains_key(name)
    }

    /// Number of objects in the working copy
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when the working copy is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Read-only view of the working copy
    #[must_use]
    pub fn view(&self) -> Snapshot {
        Snapshot {
            objects: self.objects.clone(),
            version: self.base_version,
        }
    }

    /// Insert a new object
    ///
    /// # Errors
    /// - [`StoreError::NameTaken`] if the name exists
    /// - [`StoreError::UnknownReference`] if a referenced object is missing
    pub fn insert(&mut self, object: Arc<DataObject>) -> StoreResult<()> {
        if self.objects.contains_key(object.name()) {
            return Err(StoreError::NameTaken(object.name().clone()));
        }
        self.check_references(&object)?;
        self.objects.insert(object.name().clone(), object);
        Ok(())
    }

    /// Replace an existing object, returning the previous one
    ///
    /// # Errors
    /// - [`StoreError::NotFound`] if the object does not exist
    /// - [`StoreError::UnknownReference`] if a referenced object is missing
    pub fn replace(&mut self, object: Arc<DataObject>) -> StoreResult<Arc<DataObject>> {
        let Some(previous) = self.objects.get(object.name()).cloned() else {
            return Err(StoreError::NotFound(object.name().clone()));
        };
        self.check_references(&object)?;
        self.objects.insert(object.name().clone(), object);
        Ok(previous)
    }

    /// Remove an object nothing else references
    ///
    /// # Errors
    /// - [`StoreError::NotFound`] if the object does not exist
    /// - [`StoreError::StillReferenced`] if other objects reference it
    pub fn remove(&mut self, name: &ObjectName) -> StoreResult<Arc<DataObject>> {
        if !self.objects.contains_key(name) {
            return Err(StoreError::NotFound(name.clone()));
        }
        let referrers = referrers(&self.objects, name);
        if !referrers.is_empty() {
            return Err(StoreError::StillReferenced {
                name: name.clone(),
                referrers,
            });
        }
        self.objects
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(name.clone()))
    }

    /// Replace one row of an alignment, returning the previous row
    ///
    /// Only the row changes; every other row is shared with the previous
    /// version of the alignment. `None` deletes the row.
    ///
    /// # Errors
    /// - [`StoreError::NotFound`] if the alignment does not exist
    /// - [`StoreError::WrongType`] if the object is not an alignment
    /// - [`StoreError::RowNotFound`] when deleting a missing row
    pub fn replace_row(
        &mut self,
        name: &ObjectName,
        row: &str,
        fragment: Option<Arc<str>>,
    ) -> StoreResult<Option<Arc<str>>> {
        let Some(current) = self.objects.get(name) else {
            return Err(StoreError::NotFound(name.clone()));
        };
        let ObjectBody::Alignment(alignment) = current.body() else {
            return Err(StoreError::WrongType {
                name: name.clone(),
                expected: "alignment",
                actual: current.type_tag(),
            });
        };
        let mut alignment = alignment.clone();
        let previous = match fragment {
            Some(fragment) => alignment.rows.insert(row.to_string(), fragment),
            None => Some(alignment.rows.remove(row).ok_or_else(|| StoreError::RowNotFound {
                name: name.clone(),
                row: row.to_string(),
            })?),
        };
        let updated = current.with_body(ObjectBody::Alignment(alignment))?;
        self.objects.insert(name.clone(), Arc::new(updated));
        Ok(previous)
    }

    /// Set the slot for `name` to `object` (absent when `None`)
    ///
    /// Dispatches to [`insert`](Self::insert), [`replace`](Self::replace) or
    /// [`remove`](Self::remove) so every validation still applies.
    ///
    /// # Errors
    /// Propagates the validation failure of the underlying operation
    pub fn put(&mut self, name: &ObjectName, object: Option<Arc<DataObject>>) -> StoreResult<()> {
        match object {
            Some(object) if self.objects.contains_key(name) => self.replace(object).map(|_| ()),
            Some(object) => self.insert(object),
            None => self.remove(name).map(|_| ()),
        }
    }

    /// Apply an edit record forwards
    ///
    /// # Errors
    /// Returns error if the record's precondition does not hold
    pub fn apply(&mut self, record: &EditRecord) -> StoreResult<()> {
        record.apply(self)
    }

    /// Apply an edit record backwards
    ///
    /// # Errors
    /// Returns error if the record's postcondition does not hold
    pub fn revert(&mut self, record: &EditRecord) -> StoreResult<()> {
        record.revert(self)
    }

    fn check_references(&self, object: &DataObject) -> StoreResult<()> {
        for reference in object.references() {
            if !self.objects.contains_key(reference) {
                return Err(StoreError::UnknownReference {
                    from: object.name().clone(),
                    missing: reference.clone(),
                });
            }
        }
        Ok(())
    }
}

fn referrers(objects: &ObjectMap, name: &ObjectName) -> Vec<ObjectName> {
    objects
        .values()
        .filter(|o| o.name() != name && o.references().contains(&name))
        .map(|o| o.name().clone())
        .collect()
}
