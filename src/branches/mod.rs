//! Branch registry.
//!
//! A branch is an independent copy of its parent's schema and rows, made
//! at creation time. The registry records who each branch was created from
//! and answers lineage and common-ancestor queries over those links.

mod registry;

pub use registry::BranchRegistry;
