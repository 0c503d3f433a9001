//! Migration ledger implementation.

use super::allocator::highest_number;
use super::artifacts::{ArtifactStore, Direction};
use crate::branches::BranchRegistry;
use crate::config::RetryPolicy;
use crate::engine::{ensure_connected, RelationalEngine, Transaction};
use crate::error::{BranchError, Result};
use crate::names::validate_migration_name;
use crate::storage::{LedgerState, StateStore};
use crate::types::{script_checksum, Migration, MigrationNumber, MigrationStatus, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-branch ordered record of migrations and their status.
pub struct MigrationLedger {
    store: Arc<dyn StateStore>,
    engine: Arc<dyn RelationalEngine>,
    artifacts: ArtifactStore,
    retry: RetryPolicy,
    state: RwLock<LedgerState>,
    /// Serializes mutations, including the engine work they wrap.
    write_lock: Mutex<()>,
}

impl MigrationLedger {
    /// Load the ledger from `store`, or start empty.
    pub fn open(
        store: Arc<dyn StateStore>,
        engine: Arc<dyn RelationalEngine>,
        artifacts: ArtifactStore,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let state = store.load_ledger()?.unwrap_or_default();
        Ok(Self {
            store,
            engine,
            artifacts,
            retry,
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
        })
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn commit_state(&self, next: LedgerState) -> Result<()> {
        self.store.save_ledger(&next)?;
        *self.state.write() = next;
        Ok(())
    }

    /// Replace one record (matched by number) and persist.
    fn store_record(&self, updated: &Migration) -> Result<()> {
        let mut next = self.state.read().clone();
        let slot = next
            .branches
            .get_mut(&updated.branch)
            .and_then(|ms| ms.iter_mut().find(|m| m.number == updated.number))
            .ok_or_else(|| BranchError::MigrationNotFound {
                branch: updated.branch.clone(),
                number: updated.number,
            })?;
        *slot = updated.clone();
        self.commit_state(next)?;

        if let Err(e) = self.artifacts.write_metadata(updated) {
            warn!(branch = %updated.branch, number = %updated.number, error = %e,
                "could not mirror metadata");
        }
        Ok(())
    }

    // --- Queries ---

    /// All migrations of a branch, ordered by number.
    pub fn list(&self, branch: &str) -> Vec<Migration> {
        self.state
            .read()
            .branches
            .get(branch)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, branch: &str, number: MigrationNumber) -> Option<Migration> {
        self.state
            .read()
            .branches
            .get(branch)?
            .iter()
            .find(|m| m.number == number)
            .cloned()
    }

    /// Number the next migration created on `branch` will get.
    ///
    /// Archived records of an earlier branch with the same name count, so
    /// a re-created branch continues the numbering.
    pub fn allocate_number(&self, branch: &str) -> MigrationNumber {
        let state = self.state.read();
        let live = state.branches.get(branch).and_then(|ms| highest_number(ms));
        let archived = state.archived.get(branch).and_then(|ms| highest_number(ms));
        live.max(archived)
            .map(MigrationNumber::next)
            .unwrap_or_default()
    }

    /// Highest applied migration, `None` when nothing is applied.
    pub fn current(&self, branch: &str) -> Option<MigrationNumber> {
        self.state
            .read()
            .branches
            .get(branch)?
            .iter()
            .filter(|m| m.status == MigrationStatus::Applied)
            .map(|m| m.number)
            .max()
    }

    /// Numbers of all applied migrations in `branch`.
    pub fn applied_numbers(&self, branch: &str) -> BTreeSet<MigrationNumber> {
        self.state
            .read()
            .branches
            .get(branch)
            .map(|ms| {
                ms.iter()
                    .filter(|m| m.status == MigrationStatus::Applied)
                    .map(|m| m.number)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Highest migration applied in `branch` no later than `at`.
    pub fn highest_applied_at_or_before(
        &self,
        branch: &str,
        at: Timestamp,
    ) -> Option<MigrationNumber> {
        self.state
            .read()
            .branches
            .get(branch)?
            .iter()
            .filter(|m| m.status == MigrationStatus::Applied)
            .filter(|m| m.applied_at.is_some_and(|applied| applied <= at))
            .map(|m| m.number)
            .max()
    }

    /// Lowest-numbered pending migration.
    pub fn next_pending(&self, branch: &str) -> Option<Migration> {
        self.state
            .read()
            .branches
            .get(branch)?
            .iter()
            .filter(|m| m.status == MigrationStatus::Pending)
            .min_by_key(|m| m.number)
            .cloned()
    }

    // --- Mutations ---

    /// Record a new pending migration and write its script templates.
    pub fn create(
        &self,
        registry: &BranchRegistry,
        branch: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Migration> {
        validate_migration_name(name)?;
        let owner = registry.require(branch)?;
        let _lock = self.write_lock.lock();

        let number = self.allocate_number(branch);

        let parent_migration_number = owner
            .parent
            .as_deref()
            .and_then(|parent| self.highest_applied_at_or_before(parent, owner.created_at));

        let migration = Migration {
            number,
            name: name.to_string(),
            description: description.map(str::to_string),
            branch: branch.to_string(),
            status: MigrationStatus::Pending,
            created_at: Timestamp::now(),
            applied_at: None,
            error_message: None,
            parent_branch: owner.parent.clone(),
            parent_migration_number,
            checksum: None,
        };

        self.artifacts.create(&migration)?;

        let mut next = self.state.read().clone();
        let list = next.branches.entry(branch.to_string()).or_default();
        list.push(migration.clone());
        list.sort_by_key(|m| m.number);
        self.commit_state(next)?;

        info!(branch, number = %number, name, "created migration");
        Ok(migration)
    }

    /// Apply a migration's `up` script.
    ///
    /// With `number == None` the lowest pending migration is chosen and
    /// `Ok(None)` means nothing is pending. Failed and rolled-back
    /// migrations are only re-applied when selected by number.
    pub fn apply(
        &self,
        registry: &BranchRegistry,
        branch: &str,
        number: Option<MigrationNumber>,
    ) -> Result<Option<Migration>> {
        registry.require(branch)?;
        let _lock = self.write_lock.lock();

        let migration = match number {
            Some(number) => {
                let migration = self.get(branch, number).ok_or_else(|| {
                    BranchError::MigrationNotFound {
                        branch: branch.to_string(),
                        number,
                    }
                })?;
                if !migration.status.can_apply() {
                    return Err(BranchError::Validation(format!(
                        "migration {number} in branch '{branch}' is already applied"
                    )));
                }
                migration
            }
            None => match self.next_pending(branch) {
                Some(migration) => migration,
                None => {
                    debug!(branch, "no pending migrations");
                    return Ok(None);
                }
            },
        };

        let script = self.artifacts.read_script(&migration, Direction::Up)?;
        let schema = registry.schema_name(branch);

        match self.run_script(&schema, &script) {
            Ok(()) => {
                let mut applied = migration;
                applied.status = MigrationStatus::Applied;
                applied.applied_at = Some(Timestamp::now());
                applied.error_message = None;
                applied.checksum = Some(script_checksum(&script));
                self.store_record(&applied)?;

                info!(branch, number = %applied.number, "applied migration");
                Ok(Some(applied))
            }
            Err(e @ BranchError::Connection(_)) => Err(e),
            Err(e) => {
                let message = e.to_string();
                let mut failed = migration;
                failed.status = MigrationStatus::Failed;
                failed.error_message = Some(message.clone());
                self.store_record(&failed)?;

                warn!(branch, number = %failed.number, error = %message, "migration failed");
                Err(BranchError::MigrationFailed {
                    branch: branch.to_string(),
                    number: failed.number,
                    message,
                })
            }
        }
    }

    /// Run a migration's `down` script.
    ///
    /// Only applied migrations can be rolled back. If the script fails the
    /// record keeps its status and the error is returned.
    pub fn rollback(
        &self,
        registry: &BranchRegistry,
        branch: &str,
        number: MigrationNumber,
    ) -> Result<Migration> {
        registry.require(branch)?;
        let _lock = self.write_lock.lock();

        let migration = self
            .get(branch, number)
            .ok_or_else(|| BranchError::MigrationNotFound {
                branch: branch.to_string(),
                number,
            })?;
        if !migration.status.can_roll_back() {
            return Err(BranchError::Validation(format!(
                "migration {number} in branch '{branch}' is {}, not applied",
                migration.status
            )));
        }

        let script = self.artifacts.read_script(&migration, Direction::Down)?;
        let schema = registry.schema_name(branch);

        if let Err(e) = self.run_script(&schema, &script) {
            warn!(branch, number = %number, error = %e, "rollback failed");
            return Err(match e {
                BranchError::Connection(_) => e,
                other => BranchError::Execution(format!(
                    "rollback of migration {number} in branch '{branch}' failed: {other}"
                )),
            });
        }

        let mut rolled_back = migration;
        rolled_back.status = MigrationStatus::RolledBack;
        rolled_back.applied_at = None;
        self.store_record(&rolled_back)?;

        info!(branch, number = %number, "rolled back migration");
        Ok(rolled_back)
    }

    /// Move the records of a deleted branch out of the live ledger.
    ///
    /// Returns how many records were archived. Artifacts stay on disk.
    pub fn archive_branch(&self, branch: &str) -> Result<usize> {
        let _lock = self.write_lock.lock();
        let mut next = self.state.read().clone();

        let Some(records) = next.branches.remove(branch) else {
            return Ok(0);
        };
        let count = records.len();
        let archive = next.archived.entry(branch.to_string()).or_default();
        archive.extend(records);
        archive.sort_by_key(|m| m.number);
        self.commit_state(next)?;

        info!(branch, count, "archived migration history");
        Ok(count)
    }

    /// Append `source` migrations numbered above everything recorded for
    /// `target` to `target`'s ledger, status copied as-is.
    ///
    /// Bookkeeping only: nothing is executed against `target`.
    pub fn splice(&self, source: &str, target: &str) -> Result<Vec<Migration>> {
        let _lock = self.write_lock.lock();
        let mut next = self.state.read().clone();

        let target_max = next.branches.get(target).and_then(|ms| highest_number(ms));
        let spliced: Vec<Migration> = next
            .branches
            .get(source)
            .map(|ms| {
                ms.iter()
                    .filter(|m| target_max.map_or(true, |max| m.number > max))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if spliced.is_empty() {
            return Ok(Vec::new());
        }

        let copies: Vec<Migration> = spliced
            .iter()
            .map(|m| Migration {
                branch: target.to_string(),
                ..m.clone()
            })
            .collect();

        let list = next.branches.entry(target.to_string()).or_default();
        list.extend(copies.iter().cloned());
        list.sort_by_key(|m| m.number);
        self.commit_state(next)?;

        for (original, copy) in spliced.iter().zip(&copies) {
            if let Err(e) = self.artifacts.copy(original, copy) {
                warn!(source, target, number = %copy.number, error = %e,
                    "could not copy migration artifacts");
            }
        }

        info!(source, target, count = copies.len(), "spliced migration history");
        Ok(copies)
    }

    /// Run a script in one transaction on a session opened on `schema`.
    fn run_script(&self, schema: &str, script: &str) -> Result<()> {
        let mut session = self.engine.connect(Some(schema))?;
        ensure_connected(session.as_mut(), &self.retry)?;

        let mut tx = Transaction::begin(session.as_mut())?;
        tx.session().execute_script(schema, script)?;
        tx.commit()
    }
}
