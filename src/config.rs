//! Workspace configuration.
//!
//! Stored as `config.json` in the workspace root. Loading validates every
//! field and rejects unknown ones.

use crate::error::{BranchError, Result};
use crate::types::MAIN_BRANCH;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the configuration inside a workspace.
pub const CONFIG_FILE: &str = "config.json";

/// How to reach the relational engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionDescriptor {
    /// Base database name. `main` uses it as-is, other branches use
    /// `<database>_<branch>`.
    pub database: String,

    /// Directory holding the engine's schema files. Relative paths are
    /// resolved against the workspace root.
    pub data_dir: PathBuf,

    /// How long a session waits on a locked schema before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        Self {
            database: "mydb".to_string(),
            data_dir: PathBuf::from("data"),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl ConnectionDescriptor {
    /// Schema that holds a branch's tables.
    pub fn schema_for(&self, branch: &str) -> String {
        if branch == MAIN_BRANCH {
            self.database.clone()
        } else {
            format!("{}_{}", self.database, branch)
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Reconnect behaviour before running a migration script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            reconnect_attempts: 3,
            reconnect_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Top-level workspace configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    pub connection: ConnectionDescriptor,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl WorkspaceConfig {
    /// Check every field; called on load and before save.
    pub fn validate(&self) -> Result<()> {
        let db = &self.connection.database;
        if db.is_empty() {
            return Err(BranchError::InvalidConfig(
                "connection.database must not be empty".into(),
            ));
        }
        if !db.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(BranchError::InvalidConfig(format!(
                "connection.database '{db}' may only contain letters, digits and '_'"
            )));
        }
        if self.connection.data_dir.as_os_str().is_empty() {
            return Err(BranchError::InvalidConfig(
                "connection.data_dir must not be empty".into(),
            ));
        }
        if self.retry.reconnect_attempts == 0 {
            return Err(BranchError::InvalidConfig(
                "retry.reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let config: WorkspaceConfig = serde_json::from_slice(&bytes)
            .map_err(|e| BranchError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate and write the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Engine data directory, resolved against the workspace root.
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        if self.connection.data_dir.is_absolute() {
            self.connection.data_dir.clone()
        } else {
            root.join(&self.connection.data_dir)
        }
    }
}
