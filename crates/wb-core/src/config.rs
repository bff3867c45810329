//! Workbench configuration
//!
//! Loaded from TOML; every field has a default, so an empty file is a
//! valid configuration.
//!
//! ```toml
//! history_limit = 512
//! decision_timeout_ms = 60000
//! installed_plugins = ["phylo"]
//! log_filter = "wb_kernel=debug,info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wb_kernel::SchedulerConfig;
use wb_session::{PluginCatalog, SessionSerializer};
use wb_store::ErrorClass;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        ErrorClass::User
    }
}

/// Runtime configuration of a [`Workbench`](crate::Workbench)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// Compounds kept in the undo history
    pub history_limit: usize,
    /// How long the decision gateway may take before the default applies
    pub decision_timeout_ms: u64,
    /// Automatic retries per unit before failures default to abort
    pub max_auto_retries: u32,
    /// How long a cancelled unit may keep running before it is abandoned
    pub cancel_grace_ms: u64,
    /// Buffer of the lossy observer channel
    pub event_capacity: usize,
    /// Largest session file that will be loaded
    pub max_session_bytes: u64,
    /// Plugins whose data types this runtime can read
    pub installed_plugins: Vec<String>,
    /// Record script statements for completed units
    pub record_script: bool,
    /// `tracing` filter directive, overridden by `RUST_LOG`
    pub log_filter: String,
}

impl WorkbenchConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Syntax errors or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// I/O, syntax or invalid values
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// The first invalid field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.history_limit == 0 {
            return invalid("history_limit", "must be at least 1");
        }
        if self.cancel_grace_ms == 0 {
            return invalid("cancel_grace_ms", "must be positive");
        }
        if self.decision_timeout_ms == 0 {
            return invalid("decision_timeout_ms", "must be positive");
        }
        if self.event_capacity == 0 {
            return invalid("event_capacity", "must be at least 1");
        }
        if self.max_session_bytes == 0 {
            return invalid("max_session_bytes", "must be positive");
        }
        if self.installed_plugins.iter().any(|p| p.trim().is_empty()) {
            return invalid("installed_plugins", "plugin names must not be empty");
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout_ms = millis(timeout);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_auto_retries(mut self, retries: u32) -> Self {
        self.max_auto_retries = retries;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = millis(grace);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_session_bytes(mut self, bytes: u64) -> Self {
        self.max_session_bytes = bytes;
        self
    }

    /// Add an installed plugin
    #[must_use]
    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        let plugin = plugin.into();
        if !self.installed_plugins.contains(&plugin) {
            self.installed_plugins.push(plugin);
        }
        self
    }

    #[inline]
    #[must_use]
    pub fn with_record_script(mut self, record: bool) -> Self {
        self.record_script = record;
        self
    }

    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Scheduler settings derived from this configuration
    #[must_use]
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig::new()
            .with_decision_timeout(Duration::from_millis(self.decision_timeout_ms))
            .with_max_auto_retries(self.max_auto_retries)
            .with_cancel_grace(Duration::from_millis(self.cancel_grace_ms))
            .with_observer_capacity(self.event_capacity)
    }

    #[must_use]
    pub fn plugin_catalog(&self) -> PluginCatalog {
        self.installed_plugins.iter().cloned().collect()
    }

    /// Session serializer honouring the plugin catalog and size limit
    #[must_use]
    pub fn serializer(&self) -> SessionSerializer {
        SessionSerializer::new(self.plugin_catalog()).with_max_bytes(self.max_session_bytes)
    }
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            history_limit: 256,
            decision_timeout_ms: 30_000,
            max_auto_retries: 3,
            cancel_grace_ms: 2_000,
            event_capacity: 1024,
            max_session_bytes: SessionSerializer::DEFAULT_MAX_BYTES,
            installed_plugins: Vec::new(),
            record_script: true,
            log_filter: "info".into(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
