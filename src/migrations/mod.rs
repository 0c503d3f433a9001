//! Migration ledger.
//!
//! Every branch owns an ordered list of migrations numbered from 0. Each
//! migration has an `up` and a `down` script stored as artifacts on disk
//! and a status that moves through `pending`, `applied`, `failed` and
//! `rolled_back` as scripts are run against the branch schema.

mod allocator;
mod artifacts;
mod ledger;

pub use allocator::{highest_number, next_number};
pub use artifacts::{ArtifactStore, Direction, METADATA_FILE};
pub use ledger::MigrationLedger;
