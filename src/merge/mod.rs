//! Merging one branch into another.
//!
//! A merge reconciles the target's schema with the source's (additively),
//! upserts every source row into the target and splices the source's newer
//! migration records into the target ledger.

mod engine;
mod pending;

pub use engine::{MergeEngine, MergeReport};
pub use pending::pending_from;
