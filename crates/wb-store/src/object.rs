//! Data objects held by the store
//!
//! Every object has a unique [`ObjectName`] and a typed [`ObjectBody`].
//! Objects refer to each other only by name, never by pointer, which keeps
//! the object graph acyclic for serialization and lets the store validate
//! references at insertion time.

use crate::error::{StoreError, StoreResult};
use crate::name::ObjectName;
use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Residue alphabet of a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alphabet {
    Dna,
    Rna,
    Protein,
}

impl Alphabet {
    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dna => "dna",
            Self::Rna => "rna",
            Self::Protein => "protein",
        }
    }

    fn accepts(self, residue: char) -> bool {
        let upper = residue.to_ascii_uppercase();
        match self {
            Self::Dna => "ACGTN-".contains(upper),
            Self::Rna => "ACGUN-".contains(upper),
            Self::Protein => "ACDEFGHIKLMNPQRSTVWYX*-".contains(upper),
        }
    }

    /// Check every residue against the alphabet
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidResidue`] for the first offending character
    pub fn validate(self, residues: &str) -> StoreResult<()> {
        match residues.chars().find(|c| !self.accepts(*c)) {
            Some(residue) => Err(StoreError::InvalidResidue {
                alphabet: self.as_str(),
                residue,
            }),
            None => Ok(()),
        }
    }
}

impl std::str::FromStr for Alphabet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dna" => Ok(Self::Dna),
            "rna" => Ok(Self::Rna),
            "protein" => Ok(Self::Protein),
            other => Err(format!("unknown alphabet {other:?}")),
        }
    }
}

/// A single biological sequence (leaf object)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub alphabet: Alphabet,
    pub residues: String,
}

/// A sequence motif / catalog entry (leaf object)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Motif {
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

/// A multi-row dataset keyed by row id (leaf object)
///
/// Rows live in a persistent map so replacing one row shares the rest of
/// the dataset with the previous version instead of copying it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Alignment {
    pub rows: OrdMap<String, Arc<str>>,
}

impl Alignment {
    /// Build from `(row id, residues)` pairs
    #[must_use]
    pub fn from_rows<I, K, V>(rows: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|(k, v)| (k.into(), Arc::from(v.as_ref())))
                .collect(),
        }
    }

    /// Residues of one row
    #[must_use]
    pub fn row(&self, id: &str) -> Option<&Arc<str>> {
        self.rows.get(id)
    }
}

/// A named set of other objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub members: Vec<ObjectName>,
}

/// Grouping of the members of a source object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub source: ObjectName,
    pub groups: BTreeMap<String, Vec<ObjectName>>,
}

/// Object whose type is supplied by an optional plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub plugin: String,
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub references: Vec<ObjectName>,
}

/// Typed content of a data object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ObjectBody {
    Sequence(Sequence),
    Motif(Motif),
    Alignment(Alignment),
    Collection(Collection),
    Partition(Partition),
    Extension(Extension),
}

impl ObjectBody {
    /// Stable type tag, as written to session files
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Sequence(_) => "sequence",
            Self::Motif(_) => "motif",
            Self::Alignment(_) => "alignment",
            Self::Collection(_) => "collection",
            Self::Partition(_) => "partition",
            Self::Extension(_) => "extension",
        }
    }

    /// Rebuild a body from its type tag and JSON payload
    ///
    /// # Errors
    /// Returns the decode error for unknown tags or malformed payloads
    pub fn from_parts(type_tag: &str, payload: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "type": type_tag, "payload": payload }))
    }

    /// Payload without the type tag
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("payload")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }
}

/// A named object in the data store
///
/// Immutable once built; the store replaces whole objects by swapping
/// `Arc`s, so readers never observe a half-applied change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    name: ObjectName,
    body: ObjectBody,
}

impl DataObject {
    /// Create and validate an object
    ///
    /// # Errors
    /// Returns error if residues do not match the declared alphabet
    pub fn new(name: ObjectName, body: ObjectBody) -> StoreResult<Self> {
        let object = Self { name, body };
        object.validate()?;
        Ok(object)
    }

    /// Shorthand for a sequence object
    ///
    /// # Errors
    /// Returns error on invalid residues
    pub fn sequence(name: ObjectName, alphabet: Alphabet, residues: impl Into<String>) -> StoreResult<Self> {
        Self::new(
            name,
            ObjectBody::Sequence(Sequence {
                alphabet,
                residues: residues.into(),
            }),
        )
    }

    /// Shorthand for a collection object
    #[must_use]
    pub fn collection(name: ObjectName, members: Vec<ObjectName>) -> Self {
        Self {
            name,
            body: ObjectBody::Collection(Collection { members }),
        }
    }

    /// Object name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &ObjectName {
        &self.name
    }

    /// Object body
    #[inline]
    #[must_use]
    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    /// Type tag of the body
    #[inline]
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        self.body.type_tag()
    }

    /// Same body under a different name
    #[must_use]
    pub fn renamed(&self, name: ObjectName) -> Self {
        Self {
            name,
            body: self.body.clone(),
        }
    }

    /// Same name with a different body
    ///
    /// # Errors
    /// Returns error if the new body fails validation
    pub fn with_body(&self, body: ObjectBody) -> StoreResult<Self> {
        Self::new(self.name.clone(), body)
    }

    /// Plugin that supplies this object's type, if any
    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        match &self.body {
            ObjectBody::Extension(ext) => Some(&ext.plugin),
            _ => None,
        }
    }

    /// Outgoing name references (deduplicated, in first-seen order)
    #[must_use]
    pub fn references(&self) -> Vec<&ObjectName> {
        let all: Box<dyn Iterator<Item = &ObjectName>> = match &self.body {
            ObjectBody::Sequence(_) | ObjectBody::Motif(_) | ObjectBody::Alignment(_) => {
                Box::new(std::iter::empty())
            }
            ObjectBody::Collection(c) => Box::new(c.members.iter()),
            ObjectBody::Partition(p) => {
                Box::new(std::iter::once(&p.source).chain(p.groups.values().flatten()))
            }
            ObjectBody::Extension(e) => Box::new(e.references.iter()),
        };
        let mut refs: Vec<&ObjectName> = Vec::new();
        for name in all {
            if !refs.contains(&name) {
                refs.push(name);
            }
        }
        refs
    }

    /// True when the object references nothing
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.references().is_empty()
    }

    /// Check content invariants
    ///
    /// # Errors
    /// Returns error on residues outside the alphabet
    pub fn validate(&self) -> StoreResult<()> {
        match &self.body {
            ObjectBody::Sequence(seq) => seq.alphabet.validate(&seq.residues),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn name(s: &str) -> ObjectName {
        ObjectName::new(s).unwrap()
    }

    #[test]
    fn sequence_validates_alphabet() {
        assert!(DataObject::sequence(name("s"), Alphabet::Dna, "ACGTN-acgt").is_ok());
        let err = DataObject::sequence(name("s"), Alphabet::Dna, "ACGU").unwrap_err();
        assert!(matches!(err, StoreError::InvalidResidue { residue: 'U', .. }));
    }

    #[test]
    fn references_are_deduplicated() {
        let mut groups = BTreeMap::new();
        groups.insert("g1".to_string(), vec![name("a"), name("b")]);
        groups.insert("g2".to_string(), vec![name("a")]);
        let obj = DataObject::new(
            name("p"),
            ObjectBody::Partition(Partition {
                source: name("set"),
                groups,
            }),
        )
        .unwrap();

        let refs: Vec<&str> = obj.references().iter().map(|n| n.as_str()).collect();
        assert_eq!(refs, vec!["set", "a", "b"]);
        assert!(!obj.is_leaf());
    }

    #[test]
    fn extensions_compare_by_value() {
        fn total_eq<T: Eq>(a: &T, b: &T) -> bool {
            a == b
        }
        let ext = |newick: &str| Extension {
            plugin: "phylo".into(),
            kind: "tree".into(),
            payload: serde_json::json!({ "newick": newick }),
            references: vec![name("set")],
        };
        assert!(total_eq(&ext("(a,b);"), &ext("(a,b);")));
        assert!(!total_eq(&ext("(a,b);"), &ext("(b,a);")));
    }

    #[test]
    fn body_round_trips_through_parts() {
        let body = ObjectBody::Motif(Motif {
            pattern: "TATAAA".into(),
            description: "TATA box".into(),
        });
        let payload = body.payload().unwrap();
        let rebuilt = ObjectBody::from_parts(body.type_tag(), payload).unwrap();
        assert_eq!(rebuilt, body);
    }

    #[test]
    fn unknown_type_tag_fails() {
        assert!(ObjectBody::from_parts("hologram", serde_json::json!({})).is_err());
    }

    #[test]
    fn alignment_rows_share_structure() {
        let a = Alignment::from_rows([("r1", "ACGT"), ("r2", "AC-T")]);
        let mut b = a.clone();
        b.rows.insert("r2".into(), Arc::from("ACTT"));
        assert_eq!(a.row("r2").map(|r| &**r), Some("AC-T"));
        assert_eq!(b.row("r2").map(|r| &**r), Some("ACTT"));
        assert!(Arc::ptr_eq(a.row("r1").unwrap(), b.row("r1").unwrap()));
    }
}
