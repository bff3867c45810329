//! Session requirements and the plugin catalog
//!
//! A session file lists what a reader must support, as plain strings:
//! `format-version:N` and one `plugin:NAME` per optional plugin whose data
//! types appear in the payload. Anything else is kept verbatim and, since
//! this runtime cannot know what it means, reported as unmet.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const FORMAT_PREFIX: &str = "format-version:";
const PLUGIN_PREFIX: &str = "plugin:";

/// One entry of the envelope's requirement list
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Requirement {
    FormatVersion(u32),
    Plugin(String),
    /// Not understood by this runtime
    Unrecognized(String),
}

impl Requirement {
    /// Parse a requirement string; never fails, unknown forms are kept raw
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if let Some(version) = s.strip_prefix(FORMAT_PREFIX) {
            if let Ok(version) = version.parse() {
                return Self::FormatVersion(version);
            }
        } else if let Some(plugin) = s.strip_prefix(PLUGIN_PREFIX) {
            if !plugin.is_empty() {
                return Self::Plugin(plugin.to_string());
            }
        }
        Self::Unrecognized(s.to_string())
    }
}

impl FromStr for Requirement {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl TryFrom<String> for Requirement {
    type Error = std::convert::Infallible;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(Self::parse(&s))
    }
}

impl From<Requirement> for String {
    fn from(requirement: Requirement) -> Self {
        requirement.to_string()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FormatVersion(v) => write!(f, "{FORMAT_PREFIX}{v}"),
            Self::Plugin(name) => write!(f, "{PLUGIN_PREFIX}{name}"),
            Self::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

/// A requirement this runtime cannot satisfy, with the fix to suggest
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Unmet {
    /// Written by a newer release
    NewerFormat { found: u32, supported: u32 },
    /// Payload uses data types of a plugin that is not installed
    MissingPlugin(String),
    Unrecognized(String),
}

impl Unmet {
    /// The requirement string as found in the file
    #[must_use]
    pub fn requirement(&self) -> Requirement {
        match self {
            Self::NewerFormat { found, .. } => Requirement::FormatVersion(*found),
            Self::MissingPlugin(name) => Requirement::Plugin(name.clone()),
            Self::Unrecognized(raw) => Requirement::Unrecognized(raw.clone()),
        }
    }
}

impl fmt::Display for Unmet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewerFormat { found, supported } => write!(
                f,
                "session format {found} is newer than supported format {supported}; upgrade the workbench"
            ),
            Self::MissingPlugin(name) => write!(f, "plugin {name:?} is not installed"),
            Self::Unrecognized(raw) => write!(f, "unrecognized requirement {raw:?}"),
        }
    }
}

/// Plugins whose data types this runtime can read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginCatalog {
    installed: BTreeSet<String>,
}

impl PluginCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, plugin: impl Into<String>) -> Self {
        self.install(plugin);
        self
    }

    pub fn install(&mut self, plugin: impl Into<String>) {
        self.installed.insert(plugin.into());
    }

    #[inline]
    #[must_use]
    pub fn is_installed(&self, plugin: &str) -> bool {
        self.installed.contains(plugin)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.installed.iter().map(String::as_str)
    }

    /// Every requirement in `requirements` this runtime cannot satisfy
    ///
    /// `format_version` is the envelope's own marker; it is checked even if
    /// the list omits it. Each unmet requirement is reported once.
    #[must_use]
    pub fn unmet(&self, format_version: u32, supported: u32, requirements: &[Requirement]) -> Vec<Unmet> {
        let mut unmet = BTreeSet::new();
        if format_version > supported {
            unmet.insert(Unmet::NewerFormat {
                found: format_version,
                supported,
            });
        }
        for requirement in requirements {
            match requirement {
                Requirement::FormatVersion(v) if *v > supported => {
                    unmet.insert(Unmet::NewerFormat { found: *v, supported });
                }
                Requirement::FormatVersion(_) => {}
                Requirement::Plugin(name) if !self.is_installed(name) => {
                    unmet.insert(Unmet::MissingPlugin(name.clone()));
                }
                Requirement::Plugin(_) => {}
                Requirement::Unrecognized(raw) => {
                    unmet.insert(Unmet::Unrecognized(raw.clone()));
                }
            }
        }
        unmet.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for PluginCatalog {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            installed: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn requirement_strings() {
        assert_eq!("format-version:2".parse::<Requirement>().unwrap(), Requirement::FormatVersion(2));
        assert_eq!("plugin:phylo".parse::<Requirement>().unwrap(), Requirement::Plugin("phylo".into()));
        assert_eq!(
            "plugin:".parse::<Requirement>().unwrap(),
            Requirement::Unrecognized("plugin:".into())
        );
        assert_eq!(
            "format-version:x".parse::<Requirement>().unwrap(),
            Requirement::Unrecognized("format-version:x".into())
        );
        assert_eq!(Requirement::Plugin("phylo".into()).to_string(), "plugin:phylo");
    }

    #[test]
    fn serde_uses_plain_strings() {
        let json = serde_json::to_string(&vec![Requirement::FormatVersion(2), Requirement::Plugin("p".into())]).unwrap();
        assert_eq!(json, r#"["format-version:2","plugin:p"]"#);
        let back: Vec<Requirement> = serde_json::from_str(r#"["weird"]"#).unwrap();
        assert_eq!(back, vec![Requirement::Unrecognized("weird".into())]);
    }

    #[test]
    fn each_unmet_requirement_is_listed() {
        let catalog = PluginCatalog::new().with("structure");
        let requirements = vec![
            Requirement::FormatVersion(3),
            Requirement::Plugin("structure".into()),
            Requirement::Plugin("phylo".into()),
            Requirement::Plugin("tracks".into()),
            Requirement::Unrecognized("gpu".into()),
        ];
        let unmet = catalog.unmet(3, 2, &requirements);
        assert_eq!(
            unmet,
            vec![
                Unmet::NewerFormat { found: 3, supported: 2 },
                Unmet::MissingPlugin("phylo".into()),
                Unmet::MissingPlugin("tracks".into()),
                Unmet::Unrecognized("gpu".into()),
            ]
        );
        assert_eq!(unmet[1].requirement().to_string(), "plugin:phylo");
    }

    #[test]
    fn satisfied_requirements_report_nothing() {
        let catalog: PluginCatalog = ["phylo"].into_iter().collect();
        let requirements = vec![Requirement::FormatVersion(1), Requirement::Plugin("phylo".into())];
        assert!(catalog.unmet(2, 2, &requirements).is_empty());
    }
}
