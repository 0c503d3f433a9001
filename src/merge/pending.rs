//! Pending-propagation lookup between branches.

use crate::branches::BranchRegistry;
use crate::error::Result;
use crate::migrations::MigrationLedger;
use crate::types::{Migration, MigrationStatus};

/// Migrations applied in `source` that `target` has not applied yet.
///
/// Only migrations numbered above the cutoff are considered. The cutoff is
/// the highest migration the common ancestor had applied when `source` was
/// created; without a common ancestor (or with nothing applied in it) every
/// applied migration of `source` qualifies. Read-only.
pub fn pending_from(
    registry: &BranchRegistry,
    ledger: &MigrationLedger,
    source: &str,
    target: &str,
) -> Result<Vec<Migration>> {
    let source_branch = registry.require(source)?;
    registry.require(target)?;

    let cutoff = registry
        .common_ancestor(source, target)?
        .and_then(|ancestor| ledger.highest_applied_at_or_before(&ancestor, source_branch.created_at));
    let applied_in_target = ledger.applied_numbers(target);

    Ok(ledger
        .list(source)
        .into_iter()
        .filter(|m| m.status == MigrationStatus::Applied)
        .filter(|m| cutoff.map_or(true, |cutoff| m.number > cutoff))
        .filter(|m| !applied_in_target.contains(&m.number))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionDescriptor, RetryPolicy};
    use crate::engine::SqliteEngine;
    use crate::migrations::{ArtifactStore, Direction};
    use crate::storage::{MemoryStateStore, StateStore};
    use crate::types::MigrationNumber;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (BranchRegistry, MigrationLedger) {
        let engine =
            Arc::new(SqliteEngine::new(dir.path().join("data"), Duration::from_secs(1)).unwrap());
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let registry =
            BranchRegistry::open(store.clone(), engine.clone(), ConnectionDescriptor::default())
                .unwrap();
        let ledger = MigrationLedger::open(
            store,
            engine,
            ArtifactStore::new(dir.path().join("migrations")).unwrap(),
            RetryPolicy::default(),
        )
        .unwrap();
        (registry, ledger)
    }

    fn applied(registry: &BranchRegistry, ledger: &MigrationLedger, branch: &str, table: &str) {
        let m = ledger.create(registry, branch, table, None).unwrap();
        ledger
            .artifacts()
            .write_script(&m, Direction::Up, &format!("CREATE TABLE {table} (id INT);"))
            .unwrap();
        ledger.apply(registry, branch, Some(m.number)).unwrap();
    }

    fn numbers(ms: &[Migration]) -> Vec<u64> {
        ms.iter().map(|m| m.number.0).collect()
    }

    #[test]
    fn test_pending_above_ancestor_cutoff() {
        let dir = TempDir::new().unwrap();
        let (registry, ledger) = setup(&dir);

        applied(&registry, &ledger, "main", "m0");
        applied(&registry, &ledger, "main", "m1");
        std::thread::sleep(Duration::from_millis(2));
        registry.create("feature", None).unwrap();
        for table in ["f0", "f1", "f2"] {
            applied(&registry, &ledger, "feature", table);
        }

        // Cutoff is main's 1: feature's 0 and 1 are below it.
        let pending = pending_from(&registry, &ledger, "feature", "main").unwrap();
        assert_eq!(numbers(&pending), vec![2]);
    }

    #[test]
    fn test_pending_excludes_applied_in_target() {
        let dir = TempDir::new().unwrap();
        let (registry, ledger) = setup(&dir);

        registry.create("a", None).unwrap();
        registry.create("b", None).unwrap();
        applied(&registry, &ledger, "a", "a0");
        applied(&registry, &ledger, "a", "a1");
        applied(&registry, &ledger, "b", "b0");

        // No cutoff: main had nothing applied.
        let pending = pending_from(&registry, &ledger, "a", "b").unwrap();
        assert_eq!(numbers(&pending), vec![1]);
        assert_eq!(pending[0].number, MigrationNumber(1));
    }

    #[test]
    fn test_pending_ignores_unapplied() {
        let dir = TempDir::new().unwrap();
        let (registry, ledger) = setup(&dir);

        registry.create("feature", None).unwrap();
        ledger.create(&registry, "feature", "draft", None).unwrap();

        assert!(pending_from(&registry, &ledger, "feature", "main")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_pending_unknown_branch() {
        let dir = TempDir::new().unwrap();
        let (registry, ledger) = setup(&dir);
        assert!(pending_from(&registry, &ledger, "ghost", "main").is_err());
    }
}
