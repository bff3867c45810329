//! Object names
//!
//! Provides [`ObjectName`], the only way objects refer to each other.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Unique name of a data object in the store
///
/// Names are non-empty and contain no whitespace or script punctuation
/// (`"`, `,`, `(`, `)`, `=`), so they can appear verbatim in recorded
/// script statements.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectName(String);

const FORBIDDEN: &[char] = &['"', ',', '(', ')', '='];

impl ObjectName {
    /// Validate and wrap a name
    ///
    /// # Errors
    /// Returns [`StoreError::InvalidName`] for empty names, whitespace or
    /// script punctuation.
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StoreError::InvalidName {
                name,
                reason: "name is empty",
            });
        }
        if name.chars().any(char::is_whitespace) {
            return Err(StoreError::InvalidName {
                name,
                reason: "name contains whitespace",
            });
        }
        if name.contains(FORBIDDEN) {
            return Err(StoreError::InvalidName {
                name,
                reason: "name contains script punctuation",
            });
        }
        Ok(Self(name))
    }

    /// Name as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ObjectName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectName {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ObjectName {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ObjectName> for String {
    fn from(value: ObjectName) -> Self {
        value.0
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        let name = ObjectName::new("chr1_contig-2.fa").unwrap();
        assert_eq!(name.as_str(), "chr1_contig-2.fa");
        assert_eq!(name.to_string(), "chr1_contig-2.fa");
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(ObjectName::new("").is_err());
        assert!(ObjectName::new("two words").is_err());
        assert!(ObjectName::new("quote\"d").is_err());
        assert!(ObjectName::new("call(x)").is_err());
        assert!(ObjectName::new("a=b").is_err());
    }

    #[test]
    fn serde_validates() {
        let ok: ObjectName = serde_json::from_str("\"seqA\"").unwrap();
        assert_eq!(ok.as_str(), "seqA");
        assert!(serde_json::from_str::<ObjectName>("\"bad name\"").is_err());
    }
}
