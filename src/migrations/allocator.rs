//! Migration number allocation.

use crate::types::{Migration, MigrationNumber};

/// Highest number recorded in a branch ledger.
pub fn highest_number(migrations: &[Migration]) -> Option<MigrationNumber> {
    migrations.iter().map(|m| m.number).max()
}

/// Next number for a branch: one past the highest recorded, or 0.
///
/// Failed and rolled-back records still count, so a number is never handed
/// out twice.
pub fn next_number(migrations: &[Migration]) -> MigrationNumber {
    highest_number(migrations)
        .map(MigrationNumber::next)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MigrationStatus, Timestamp};

    fn migration(number: u64, status: MigrationStatus) -> Migration {
        Migration {
            number: MigrationNumber(number),
            name: format!("m{number}"),
            description: None,
            branch: "main".into(),
            status,
            created_at: Timestamp(0),
            applied_at: None,
            error_message: None,
            parent_branch: None,
            parent_migration_number: None,
            checksum: None,
        }
    }

    #[test]
    fn test_empty_branch_starts_at_zero() {
        assert_eq!(next_number(&[]), MigrationNumber(0));
        assert_eq!(highest_number(&[]), None);
    }

    #[test]
    fn test_next_is_max_plus_one() {
        let ms = vec![
            migration(0, MigrationStatus::Applied),
            migration(4, MigrationStatus::Pending),
            migration(2, MigrationStatus::Applied),
        ];
        assert_eq!(next_number(&ms), MigrationNumber(5));
    }

    #[test]
    fn test_failed_and_rolled_back_are_not_reused() {
        let ms = vec![
            migration(0, MigrationStatus::Applied),
            migration(1, MigrationStatus::Failed),
            migration(2, MigrationStatus::RolledBack),
        ];
        assert_eq!(next_number(&ms), MigrationNumber(3));
    }
}
