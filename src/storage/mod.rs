//! Persisted registry and ledger state.
//!
//! The registry and the ledger are service objects over an injected
//! [`StateStore`]; they never reach for files or globals themselves.

mod file;

pub use file::FileStateStore;

use crate::config::ConnectionDescriptor;
use crate::error::Result;
use crate::types::{Branch, Migration, MAIN_BRANCH};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted branch registry record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    pub current_branch: String,
    pub branches: BTreeMap<String, Branch>,
    pub connection: ConnectionDescriptor,
}

impl RegistryState {
    /// Fresh registry holding only `main`, which is current.
    pub fn new(connection: ConnectionDescriptor) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(MAIN_BRANCH.to_string(), Branch::main());
        Self {
            current_branch: MAIN_BRANCH.to_string(),
            branches,
            connection,
        }
    }
}

/// Persisted migration ledger: branch name to migrations ordered by number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub branches: BTreeMap<String, Vec<Migration>>,

    /// Records of deleted branches. They no longer count as applied or
    /// pending anywhere but still reserve their numbers.
    #[serde(default)]
    pub archived: BTreeMap<String, Vec<Migration>>,
}

/// Storage backend for registry and ledger state.
pub trait StateStore: Send + Sync {
    /// Load the registry, `None` if it was never saved.
    fn load_registry(&self) -> Result<Option<RegistryState>>;

    fn save_registry(&self, state: &RegistryState) -> Result<()>;

    /// Load the ledger, `None` if it was never saved.
    fn load_ledger(&self) -> Result<Option<LedgerState>>;

    fn save_ledger(&self, state: &LedgerState) -> Result<()>;
}

/// In-memory state store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    registry: Mutex<Option<RegistryState>>,
    ledger: Mutex<Option<LedgerState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load_registry(&self) -> Result<Option<RegistryState>> {
        Ok(self.registry.lock().clone())
    }

    fn save_registry(&self, state: &RegistryState) -> Result<()> {
        *self.registry.lock() = Some(state.clone());
        Ok(())
    }

    fn load_ledger(&self) -> Result<Option<LedgerState>> {
        Ok(self.ledger.lock().clone())
    }

    fn save_ledger(&self, state: &LedgerState) -> Result<()> {
        *self.ledger.lock() = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_main_current() {
        let state = RegistryState::new(ConnectionDescriptor::default());
        assert_eq!(state.current_branch, MAIN_BRANCH);
        assert!(state.branches[MAIN_BRANCH].parent.is_none());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStateStore::new();
        assert!(store.load_registry().unwrap().is_none());
        assert!(store.load_ledger().unwrap().is_none());

        let state = RegistryState::new(ConnectionDescriptor::default());
        store.save_registry(&state).unwrap();
        assert_eq!(store.load_registry().unwrap(), Some(state));
    }
}
