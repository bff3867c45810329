//! Session save, inspect and restore
//!
//! Restore runs in two phases. [`SessionSerializer::load`] reads, migrates,
//! decodes, checks requirements (declared ones and the plugins the payload
//! really uses) and plans without touching any store;
//! [`LoadedSession::install`] then builds the new store content through the
//! validating insert path and swaps it in with one commit. A failure in the
//! first phase leaves the live store exactly as it was.

use crate::envelope::{Auxiliary, SessionEnvelope, CURRENT_FORMAT_VERSION};
use crate::error::{SessionError, SessionResult};
use crate::migrate::{upgrade, RawHeader};
use crate::plan::{RestorePlan, TierCounts};
use crate::requirement::{PluginCatalog, Requirement, Unmet};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use wb_history::Timeline;
use wb_store::{DataObject, Fingerprint, ObjectStore, Snapshot};

type Decoded = (SessionEnvelope, Vec<DataObject>);

/// What `save` wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSummary {
    pub objects: usize,
    pub bytes: u64,
    pub requirements: Vec<Requirement>,
    pub fingerprint: Fingerprint,
}

/// Header information, available even when restore would fail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub format_version: u32,
    pub requirements: Vec<Requirement>,
    /// Requirements this runtime cannot satisfy
    #[serde(skip)]
    pub unmet: Vec<Unmet>,
    pub saved_at: Option<DateTime<Utc>>,
    pub producer: Option<String>,
    pub object_count: usize,
    /// `None` when the payload cannot be decoded by this runtime
    pub tiers: Option<TierCounts>,
}

impl SessionInfo {
    #[must_use]
    pub fn is_restorable(&self) -> bool {
        self.unmet.is_empty() && self.tiers.is_some()
    }
}

/// A fully validated session, not yet applied
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub info: SessionInfo,
    pub plan: RestorePlan,
    pub auxiliary: Auxiliary,
}

/// Result of a successful restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub objects: usize,
    pub tiers: TierCounts,
    pub auxiliary: Auxiliary,
}

impl LoadedSession {
    /// Replace the store content and reset history to the saved script
    ///
    /// The new content is built from empty through the validating insert
    /// path in tier order, then committed at once. All edit history,
    /// including redo entries, is discarded.
    ///
    /// # Errors
    /// Insertion failures or a concurrent commit; the store is unchanged then.
    pub fn install(self, store: &ObjectStore, timeline: &Timeline) -> SessionResult<RestoreSummary> {
        let tiers = self.plan.counts();
        let mut txn = store.begin_empty();
        for object in self.plan.into_objects() {
            txn.insert(object)?;
        }
        let objects = txn.len();
        store.commit(txn)?;
        timeline.reset(&self.auxiliary.script_text);
        tracing::info!("restored session: {objects} object(s)");
        Ok(RestoreSummary {
            objects,
            tiers,
            auxiliary: self.auxiliary,
        })
    }
}

/// Writes and reads session envelopes
#[derive(Debug, Clone)]
pub struct SessionSerializer {
    catalog: PluginCatalog,
    max_bytes: u64,
}

impl Default for SessionSerializer {
    fn default() -> Self {
        Self::new(PluginCatalog::new())
    }
}

impl SessionSerializer {
    /// 512 MiB
    pub const DEFAULT_MAX_BYTES: u64 = 512 * 1024 * 1024;

    #[must_use]
    pub fn new(catalog: PluginCatalog) -> Self {
        Self {
            catalog,
            max_bytes: Self::DEFAULT_MAX_BYTES,
        }
    }

    /// Largest session this serializer will load
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Write `snapshot` and `auxiliary` as a session
    ///
    /// # Errors
    /// Serialization or I/O failures
    pub fn save<W: Write>(&self, snapshot: &Snapshot, auxiliary: &Auxiliary, writer: W) -> SessionResult<SaveSummary> {
        self.save_at(snapshot, auxiliary, Utc::now(), writer)
    }

    /// [`save`](Self::save) with an explicit timestamp
    ///
    /// # Errors
    /// Serialization or I/O failures
    pub fn save_at<W: Write>(
        &self,
        snapshot: &Snapshot,
        auxiliary: &Auxiliary,
        saved_at: DateTime<Utc>,
        mut writer: W,
    ) -> SessionResult<SaveSummary> {
        let envelope = SessionEnvelope::capture(snapshot, auxiliary.clone(), saved_at)?;
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        let summary = SaveSummary {
            objects: envelope.objects.len(),
            bytes: bytes.len() as u64,
            requirements: envelope.requirements,
            fingerprint: snapshot.fingerprint()?,
        };
        tracing::info!(
            "saved session: {} object(s), {} bytes, state {}",
            summary.objects,
            summary.bytes,
            summary.fingerprint.short()
        );
        Ok(summary)
    }

    /// Save to a file, replacing it only once the new content is complete
    ///
    /// # Errors
    /// Serialization or I/O failures
    pub fn save_path(&self, snapshot: &Snapshot, auxiliary: &Auxiliary, path: &Path) -> SessionResult<SaveSummary> {
        let partial = path.with_extension("partial");
        let file_error = |source| SessionError::File {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(&partial).map_err(file_error)?;
        let summary = self.save(snapshot, auxiliary, BufWriter::new(file))?;
        std::fs::rename(&partial, path).map_err(file_error)?;
        Ok(summary)
    }

    /// Read and fully validate a session without applying it
    ///
    /// # Errors
    /// - [`SessionError::Unmet`] listing every unsatisfiable requirement
    /// - [`SessionError::OutOfMemory`] for oversized sessions
    /// - decode and consistency failures
    pub fn load<R: Read>(&self, reader: R) -> SessionResult<LoadedSession> {
        let bytes = self.read_bounded(reader, None)?;
        self.load_bytes(&bytes)
    }

    /// [`load`](Self::load) from a file
    ///
    /// # Errors
    /// See [`load`](Self::load)
    pub fn load_path(&self, path: &Path) -> SessionResult<LoadedSession> {
        let file_error = |source| SessionError::File {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(file_error)?;
        let size = file.metadata().map_err(file_error)?.len();
        let bytes = self.read_bounded(file, Some(size))?;
        self.load_bytes(&bytes)
    }

    /// Load and install in one step
    ///
    /// Callers must hold off concurrent store writers; the workbench runs
    /// this in the scheduler's execution slot.
    ///
    /// # Errors
    /// See [`load`](Self::load) and [`LoadedSession::install`]
    pub fn restore<R: Read>(&self, reader: R, store: &ObjectStore, timeline: &Timeline) -> SessionResult<RestoreSummary> {
        self.load(reader)?.install(store, timeline)
    }

    /// Header, requirement check and tier counts, without restoring
    ///
    /// Unmet requirements are reported in the result, not as an error.
    ///
    /// # Errors
    /// Unreadable or malformed sessions
    pub fn inspect<R: Read>(&self, reader: R) -> SessionResult<SessionInfo> {
        let bytes = self.read_bounded(reader, None)?;
        let (header, unmet, decoded) = self.examine(&bytes)?;
        let tiers = if unmet.is_empty() {
            Some(RestorePlan::build(decoded?.1)?.counts())
        } else {
            None
        };
        Ok(info(header, unmet, tiers))
    }

    fn load_bytes(&self, bytes: &[u8]) -> SessionResult<LoadedSession> {
        let (header, unmet, decoded) = self.examine(bytes)?;
        if !unmet.is_empty() {
            for u in &unmet {
                tracing::warn!("unmet session requirement: {u}");
            }
            return Err(SessionError::Unmet(unmet));
        }

        let (envelope, objects) = decoded?;
        let plan = RestorePlan::build(objects)?;
        Ok(LoadedSession {
            info: info(header, Vec::new(), Some(plan.counts())),
            plan,
            auxiliary: envelope.auxiliary,
        })
    }

    /// Read the header, decode what this runtime can, and list unmet
    /// requirements
    ///
    /// The declared requirements are merged with the plugins the decoded
    /// objects actually use, so a file that omits a plugin from its list
    /// still reports it. Decode failures are returned alongside, to be
    /// surfaced only once every requirement is met.
    fn examine(&self, bytes: &[u8]) -> SessionResult<(RawHeader, Vec<Unmet>, SessionResult<Decoded>)> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let header = RawHeader::read(&value)?;
        let decoded = decode(value, header.format_version)
            .and_then(|envelope| envelope.decode_objects().map(|objects| (envelope, objects)));

        let mut requirements = header.requirements.clone();
        if let Ok((_, objects)) = &decoded {
            let used: BTreeSet<&str> = objects.iter().filter_map(DataObject::plugin).collect();
            requirements.extend(used.into_iter().map(|p| Requirement::Plugin(p.to_string())));
        }
        let unmet = self
            .catalog
            .unmet(header.format_version, CURRENT_FORMAT_VERSION, &requirements);
        Ok((header, unmet, decoded))
    }

    fn read_bounded<R: Read>(&self, reader: R, size_hint: Option<u64>) -> SessionResult<Vec<u8>> {
        let limit = self.max_bytes;
        let expected = size_hint.unwrap_or(0);
        if expected > limit {
            return Err(SessionError::OutOfMemory { size: expected, limit });
        }
        let mut bytes = Vec::new();
        let reserve = usize::try_from(expected).map_err(|_| SessionError::OutOfMemory { size: expected, limit })?;
        bytes
            .try_reserve_exact(reserve)
            .map_err(|_| SessionError::OutOfMemory { size: expected, limit })?;
        reader.take(limit.saturating_add(1)).read_to_end(&mut bytes)?;
        let size = bytes.len() as u64;
        if size > limit {
            return Err(SessionError::OutOfMemory { size, limit });
        }
        Ok(bytes)
    }
}

fn decode(value: serde_json::Value, format_version: u32) -> SessionResult<SessionEnvelope> {
    let value = upgrade(value, format_version)?;
    Ok(serde_json::from_value(value)?)
}

fn info(header: RawHeader, unmet: Vec<Unmet>, tiers: Option<TierCounts>) -> SessionInfo {
    SessionInfo {
        format_version: header.format_version,
        requirements: header.requirements,
        unmet,
        saved_at: header.saved_at,
        producer: header.producer,
        object_count: header.object_count,
        tiers,
    }
}
