//! Property tests for lineage and migration numbering.

use proptest::prelude::*;
use schemabranch::migrations::next_number;
use schemabranch::{
    BranchRegistry, ConnectionDescriptor, MemoryStateStore, Migration, MigrationStatus,
    SqliteEngine, Timestamp, MAIN_BRANCH,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Build a registry whose branch `b{i}` is created from a random earlier
/// branch (`main` or `b{j}` with `j < i`).
fn random_tree(dir: &TempDir, parents: &[usize]) -> (BranchRegistry, Vec<String>) {
    let engine =
        Arc::new(SqliteEngine::new(dir.path().join("data"), Duration::from_secs(1)).unwrap());
    let registry = BranchRegistry::open(
        Arc::new(MemoryStateStore::new()),
        engine,
        ConnectionDescriptor::default(),
    )
    .unwrap();

    let mut names = vec![MAIN_BRANCH.to_string()];
    for (i, pick) in parents.iter().enumerate() {
        let parent = names[pick % names.len()].clone();
        let name = format!("b{i}");
        registry.create(&name, Some(&parent)).unwrap();
        names.push(name);
    }
    (registry, names)
}

fn status_strategy() -> impl Strategy<Value = MigrationStatus> {
    prop_oneof![
        Just(MigrationStatus::Pending),
        Just(MigrationStatus::Applied),
        Just(MigrationStatus::Failed),
        Just(MigrationStatus::RolledBack),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_lineage_ends_at_root(parents in prop::collection::vec(0usize..16, 0..8)) {
        let dir = TempDir::new().unwrap();
        let (registry, names) = random_tree(&dir, &parents);

        for name in &names {
            let lineage = registry.lineage(name).unwrap();
            prop_assert!(lineage.len() <= names.len());
            prop_assert_eq!(&lineage[0], name);
            prop_assert_eq!(lineage.last().map(String::as_str), Some(MAIN_BRANCH));
            let root = registry.get(lineage.last().unwrap()).unwrap();
            prop_assert!(root.parent.is_none());
        }
    }

    #[test]
    fn prop_common_ancestor_always_defined(parents in prop::collection::vec(0usize..16, 1..8)) {
        let dir = TempDir::new().unwrap();
        let (registry, names) = random_tree(&dir, &parents);

        for a in &names {
            for b in &names {
                let ancestor = registry.common_ancestor(a, b).unwrap();
                prop_assert!(ancestor.is_some());
                let ancestor = ancestor.unwrap();
                prop_assert!(registry.lineage(a).unwrap().contains(&ancestor));
                prop_assert!(registry.lineage(b).unwrap().contains(&ancestor));
            }
        }
    }

    #[test]
    fn prop_numbers_strictly_increase(statuses in prop::collection::vec(status_strategy(), 0..40)) {
        let mut ledger: Vec<Migration> = Vec::new();
        for (i, status) in statuses.into_iter().enumerate() {
            let number = next_number(&ledger);
            if let Some(last) = ledger.last() {
                prop_assert!(number > last.number);
            }
            prop_assert_eq!(number.0, i as u64);
            ledger.push(Migration {
                number,
                name: format!("m{i}"),
                description: None,
                branch: MAIN_BRANCH.to_string(),
                status,
                created_at: Timestamp::now(),
                applied_at: None,
                error_message: None,
                parent_branch: None,
                parent_migration_number: None,
                checksum: None,
            });
        }
    }
}
