//! Session envelope
//!
//! The on-disk form of a session: format marker, requirement list, every
//! data object as `{name, type, payload}`, and auxiliary presentation state.

use crate::error::{SessionError, SessionResult};
use crate::requirement::Requirement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use wb_store::{DataObject, ObjectBody, ObjectName, Snapshot};

/// Format written by this release
pub const CURRENT_FORMAT_VERSION: u32 = 2;

/// Presentation state saved alongside the data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Auxiliary {
    pub view_settings: BTreeMap<String, serde_json::Value>,
    /// Full text of the recorded script
    pub script_text: String,
    pub open_tabs: Vec<String>,
    pub selected_tab: Option<String>,
}

/// One serialized data object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub payload: serde_json::Value,
}

impl ObjectEntry {
    fn capture(object: &DataObject) -> SessionResult<Self> {
        Ok(Self {
            name: object.name().to_string(),
            type_tag: object.type_tag().to_string(),
            payload: object.body().payload()?,
        })
    }

    /// Rebuild the object, validating its name and content
    ///
    /// # Errors
    /// Invalid name, unknown type, malformed payload or invalid residues
    pub fn decode(&self) -> SessionResult<DataObject> {
        let name = ObjectName::new(self.name.clone())?;
        let body = ObjectBody::from_parts(&self.type_tag, self.payload.clone()).map_err(|source| {
            SessionError::Object {
                object: self.name.clone(),
                type_tag: self.type_tag.clone(),
                source,
            }
        })?;
        Ok(DataObject::new(name, body)?)
    }
}

/// Versioned, self-describing session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub format_version: u32,
    pub requirements: Vec<Requirement>,
    /// Informational; not part of compatibility checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    /// Informational; not part of compatibility checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    pub objects: Vec<ObjectEntry>,
    #[serde(default)]
    pub auxiliary: Auxiliary,
}

impl SessionEnvelope {
    /// Envelope for a store snapshot
    ///
    /// Objects are written in name order. Requirements are the current
    /// format version plus every plugin supplying an object's type.
    ///
    /// # Errors
    /// Returns error if an object fails to serialize
    pub fn capture(snapshot: &Snapshot, auxiliary: Auxiliary, saved_at: DateTime<Utc>) -> SessionResult<Self> {
        let objects = snapshot.iter().map(|o| ObjectEntry::capture(o)).collect::<SessionResult<Vec<_>>>()?;
        let plugins: BTreeSet<&str> = snapshot.iter().filter_map(|o| o.plugin()).collect();
        let requirements = std::iter::once(Requirement::FormatVersion(CURRENT_FORMAT_VERSION))
            .chain(plugins.into_iter().map(|p| Requirement::Plugin(p.to_string())))
            .collect();
        Ok(Self {
            format_version: CURRENT_FORMAT_VERSION,
            requirements,
            saved_at: Some(saved_at),
            producer: Some(format!("workbench {}", crate::VERSION)),
            objects,
            auxiliary,
        })
    }

    /// Decode every object, in file order
    ///
    /// # Errors
    /// The first object that fails to decode
    pub fn decode_objects(&self) -> SessionResult<Vec<DataObject>> {
        self.objects.iter().map(ObjectEntry::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use wb_store::{Alphabet, Extension, ObjectStore};

    fn name(s: &str) -> ObjectName {
        ObjectName::new(s).unwrap()
    }

    #[test]
    fn capture_lists_plugins_once() {
        let ext = |n: &str| {
            DataObject::new(
                name(n),
                ObjectBody::Extension(Extension {
                    plugin: "phylo".into(),
                    kind: "tree".into(),
                    payload: serde_json::json!({"newick": "(a,b);"}),
                    references: vec![],
                }),
            )
            .unwrap()
        };
        let store = ObjectStore::with_objects([
            DataObject::sequence(name("s"), Alphabet::Dna, "ACGT").unwrap(),
            ext("t1"),
            ext("t2"),
        ])
        .unwrap();

        let envelope = SessionEnvelope::capture(&store.snapshot(), Auxiliary::default(), Utc::now()).unwrap();
        assert_eq!(
            envelope.requirements,
            vec![Requirement::FormatVersion(CURRENT_FORMAT_VERSION), Requirement::Plugin("phylo".into())]
        );
        let names: Vec<&str> = envelope.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["s", "t1", "t2"]);
    }

    #[test]
    fn entries_decode_back_to_equal_objects() {
        let object = DataObject::collection(name("c"), vec![name("a"), name("b")]);
        let entry = ObjectEntry::capture(&object).unwrap();
        assert_eq!(entry.type_tag, "collection");
        assert_eq!(Arc::new(entry.decode().unwrap()), Arc::new(object));
    }

    #[test]
    fn unknown_type_is_reported_with_object_name() {
        let entry = ObjectEntry {
            name: "x".into(),
            type_tag: "hologram".into(),
            payload: serde_json::Value::Null,
        };
        let err = entry.decode().unwrap_err();
        assert!(matches!(err, SessionError::Object { ref object, .. } if object == "x"));
    }
}
