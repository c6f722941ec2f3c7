// settings.rs — Compiler and host settings
//
// One flat record, loaded from a kebab-case JSON file and then overridden by
// command-line flags. Every field has a default so an empty object `{}` is a
// valid settings file.
//
// Preconditions: none.
// Postconditions: a `Settings` returned by `load` has passed `validate`.
// Failure modes: unreadable file, malformed JSON, out-of-range values
//   (`SettingsError`).
// Side effects: `load` reads one file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::runtime::HostLimits;
use crate::scopes::InitStrategy;

// ── Target ──────────────────────────────────────────────────────────────────

/// Which scheduling-routine flavour to emit and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Target {
    #[default]
    Cooperative,
    Multicore,
    VirtualTime,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Cooperative => write!(f, "cooperative"),
            Target::Multicore => write!(f, "multicore"),
            Target::VirtualTime => write!(f, "virtual-time"),
        }
    }
}

// ── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Settings {
    /// Use the liveness-based scope initializer instead of the conservative one.
    pub scope_liveness_analysis: bool,
    pub target: Target,
    /// Channel capacity for edges that do not set one.
    pub queue_depth: usize,
    /// Record virtual-time trace entries on every firing.
    pub enable_traces: bool,
    /// Host round budget; `None` runs until quiescent.
    pub max_rounds: Option<u64>,
    /// Wall-clock limit for one host run.
    pub stall_timeout_ms: Option<u64>,
    /// Worker threads for the multicore host.
    pub workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            scope_liveness_analysis: true,
            target: Target::Cooperative,
            queue_depth: 4096,
            enable_traces: false,
            max_rounds: None,
            stall_timeout_ms: None,
            workers: 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid setting '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl Settings {
    pub fn load(path: &Path) -> Result<Settings, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        tracing::debug!(path = %path.display(), ?settings, "settings loaded");
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Settings, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.queue_depth == 0 {
            return Err(SettingsError::Invalid {
                key: "queue-depth",
                reason: "must be at least 1".into(),
            });
        }
        if self.workers == 0 {
            return Err(SettingsError::Invalid {
                key: "workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_rounds == Some(0) {
            return Err(SettingsError::Invalid {
                key: "max-rounds",
                reason: "must be at least 1 when set".into(),
            });
        }
        Ok(())
    }

    pub fn strategy(&self) -> InitStrategy {
        if self.scope_liveness_analysis {
            InitStrategy::Liveness
        } else {
            InitStrategy::Conservative
        }
    }

    pub fn stall_timeout(&self) -> Option<std::time::Duration> {
        self.stall_timeout_ms.map(std::time::Duration::from_millis)
    }

    /// Round and wall-clock limits for either host.
    pub fn host_limits(&self) -> HostLimits {
        HostLimits {
            max_rounds: self.max_rounds,
            stall_timeout: self.stall_timeout(),
        }
    }
}
