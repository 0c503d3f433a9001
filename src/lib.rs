//! # Schemabranch
//!
//! Git-like branching for relational databases.
//!
//! ## Core Concepts
//!
//! - **Branches**: Independent copies of a schema and its rows, each with a
//!   recorded parent
//! - **Migrations**: Numbered up/down script pairs tracked per branch in a
//!   ledger with a lifecycle status
//! - **Merges**: Additive schema reconciliation plus row upserts from one
//!   branch into another, followed by a ledger splice
//!
//! ## Example
//!
//! ```no_run
//! use schemabranch::{Direction, Workspace};
//!
//! # fn main() -> schemabranch::Result<()> {
//! let ws = Workspace::open_or_create("./my-workspace")?;
//!
//! // Branch off main
//! ws.create_branch("feature", None)?;
//!
//! // Write and apply a migration on the branch
//! let m = ws.create_migration("feature", "add_users", None)?;
//! ws.artifacts()
//!     .write_script(&m, Direction::Up, "CREATE TABLE users (id INTEGER PRIMARY KEY);")?;
//! ws.apply_migration("feature", Some(m.number))?;
//!
//! // Fold it back
//! let report = ws.merge("feature", "main")?;
//! println!("created {:?}", report.tables_created);
//! # Ok(())
//! # }
//! ```

pub mod branches;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod migrations;
pub mod names;
pub mod storage;
pub mod types;
pub mod workspace;

// Re-exports
pub use branches::BranchRegistry;
pub use config::{ConnectionDescriptor, RetryPolicy, WorkspaceConfig};
pub use engine::{RelationalEngine, Session, SqliteEngine, Transaction};
pub use error::{BranchError, ErrorKind, MergeStep, Result};
pub use merge::{pending_from, MergeEngine, MergeReport};
pub use migrations::{ArtifactStore, Direction, MigrationLedger};
pub use storage::{FileStateStore, LedgerState, MemoryStateStore, RegistryState, StateStore};
pub use types::{
    Branch, Column, Migration, MigrationNumber, MigrationStatus, TableRef, Timestamp, MAIN_BRANCH,
};
pub use workspace::{BranchEntry, Workspace};
