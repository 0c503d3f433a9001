//! Core types shared by the registry, the ledger and the merge engine.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the root branch.
pub const MAIN_BRANCH: &str = "main";

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    /// Seconds since Unix epoch, used in artifact headers.
    pub fn as_secs(self) -> i64 {
        self.0 / 1_000_000
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Position of a migration within its branch.
///
/// Numbers start at 0 and are allocated strictly increasing per branch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct MigrationNumber(pub u64);

impl MigrationNumber {
    pub fn next(self) -> Self {
        MigrationNumber(self.0 + 1)
    }
}

impl fmt::Debug for MigrationNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Migration({})", self.0)
    }
}

impl fmt::Display for MigrationNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Branch metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub created_at: Timestamp,
    pub last_accessed: Timestamp,
    /// Branch this one was created from. `None` only for `main`.
    #[serde(rename = "created_from", default)]
    pub parent: Option<String>,
}

impl Branch {
    /// The root branch record.
    pub fn main() -> Self {
        let now = Timestamp::now();
        Self {
            name: MAIN_BRANCH.to_string(),
            created_at: now,
            last_accessed: now,
            parent: None,
        }
    }
}

/// Lifecycle status of a migration.
///
/// ```text
/// pending --apply ok--> applied --rollback ok--> rolled_back
///    |                     ^                         |
///    +--apply err--> failed+----apply (by number)----+
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Applied,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    /// Whether `apply` may run this migration when selected by number.
    pub fn can_apply(self) -> bool {
        !matches!(self, MigrationStatus::Applied)
    }

    /// Whether `rollback` may run this migration.
    pub fn can_roll_back(self) -> bool {
        matches!(self, MigrationStatus::Applied)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Applied => "applied",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// A migration record in a branch ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub number: MigrationNumber,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub branch: String,
    pub status: MigrationStatus,
    pub created_at: Timestamp,
    #[serde(default)]
    pub applied_at: Option<Timestamp>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub parent_branch: Option<String>,
    /// Highest migration applied in the parent when this branch was created.
    #[serde(default)]
    pub parent_migration_number: Option<MigrationNumber>,
    /// SHA-256 of the `up` script as of the last successful apply.
    #[serde(default)]
    pub checksum: Option<String>,
}

impl Migration {
    /// Directory name of this migration's artifacts, e.g. `0003_add_email`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.number, self.name)
    }
}

/// A column as reported by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Declared type, verbatim from the engine.
    pub declared_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
        }
    }
}

/// A table qualified by the schema that holds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableRef<'a> {
    pub schema: &'a str,
    pub table: &'a str,
}

impl<'a> TableRef<'a> {
    pub fn new(schema: &'a str, table: &'a str) -> Self {
        Self { schema, table }
    }
}

impl fmt::Display for TableRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Hex-encoded SHA-256 of a script.
pub fn script_checksum(script: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.as_bytes());
    hex::encode(hasher.finalize())
}
