//! Workspace tying the registry, the ledger and the merge engine together.
//!
//! ```text
//! <root>/MANIFEST
//!       /LOCK
//!       /config.json
//!       /state/branches.bin, ledger.bin
//!       /migrations/<branch>/<NNNN>_<name>/...
//!       /data/<schema>.db            (default data_dir)
//! ```

use crate::branches::BranchRegistry;
use crate::config::{WorkspaceConfig, CONFIG_FILE};
use crate::engine::{RelationalEngine, SqliteEngine};
use crate::error::{BranchError, Result};
use crate::merge::{pending_from, MergeEngine, MergeReport};
use crate::migrations::{ArtifactStore, MigrationLedger};
use crate::storage::{FileStateStore, StateStore};
use crate::types::{Branch, Column, Migration, MigrationNumber, TableRef};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Magic bytes for the workspace manifest.
const WORKSPACE_MAGIC: &[u8; 4] = b"SBW\0";

/// Current workspace layout version.
const WORKSPACE_VERSION: u8 = 1;

/// A branch together with whether it is the current one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchEntry {
    pub branch: Branch,
    pub is_current: bool,
}

/// An opened workspace.
///
/// Holds an exclusive lock on the workspace directory for its lifetime.
pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    engine: Arc<dyn RelationalEngine>,
    registry: BranchRegistry,
    ledger: MigrationLedger,
    merger: MergeEngine,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Open the workspace at `path`, creating it with the default
    /// configuration if it does not exist.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            WorkspaceConfig::default().save(&config_path)?;
        }
        let config = WorkspaceConfig::load(&config_path)?;
        Self::open_inner(root, config)
    }

    /// Open the workspace at `path` with `config`, replacing any saved
    /// configuration.
    pub fn open_with_config(path: impl AsRef<Path>, config: WorkspaceConfig) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        config.save(&root.join(CONFIG_FILE))?;
        Self::open_inner(root, config)
    }

    fn open_inner(root: PathBuf, config: WorkspaceConfig) -> Result<Self> {
        let manifest = root.join("MANIFEST");
        if manifest.exists() {
            Self::verify_manifest(&manifest)?;
        } else {
            Self::write_manifest(&manifest)?;
        }

        let lock_file = Self::acquire_lock(&root)?;

        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::open(root.join("state"))?);
        let engine: Arc<dyn RelationalEngine> = Arc::new(SqliteEngine::new(
            config.data_dir(&root),
            config.connection.busy_timeout(),
        )?);
        let artifacts = ArtifactStore::new(root.join("migrations"))?;

        let registry =
            BranchRegistry::open(store.clone(), engine.clone(), config.connection.clone())?;
        let ledger =
            MigrationLedger::open(store, engine.clone(), artifacts, config.retry.clone())?;
        let merger = MergeEngine::new(engine.clone());

        info!(
            root = %root.display(),
            database = %config.connection.database,
            branches = registry.branch_count(),
            current = %registry.current_name(),
            "opened workspace"
        );

        Ok(Self {
            root,
            config,
            _lock_file: lock_file,
            engine,
            registry,
            ledger,
            merger,
        })
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let mut file = File::create(path)?;
        file.write_all(WORKSPACE_MAGIC)?;
        file.write_all(&[WORKSPACE_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let mut file = File::open(path)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != WORKSPACE_MAGIC {
            return Err(BranchError::InvalidFormat("Invalid workspace magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != WORKSPACE_VERSION {
            return Err(BranchError::InvalidFormat(format!(
                "Unsupported workspace version: {}",
                version[0]
            )));
        }
        Ok(())
    }

    fn acquire_lock(root: &Path) -> Result<File> {
        let lock_file = File::create(root.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| BranchError::Locked)?;
        Ok(lock_file)
    }

    // --- Accessors ---

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn registry(&self) -> &BranchRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        self.ledger.artifacts()
    }

    /// The relational engine the workspace runs against.
    pub fn engine(&self) -> Arc<dyn RelationalEngine> {
        self.engine.clone()
    }

    // --- Branch Operations ---

    /// Create a branch copied from `from`, or from the current branch.
    pub fn create_branch(&self, name: &str, from: Option<&str>) -> Result<Branch> {
        self.registry.create(name, from)
    }

    pub fn switch_branch(&self, name: &str) -> Result<Branch> {
        self.registry.switch(name)
    }

    /// Delete a branch and archive its ledger records.
    ///
    /// A branch later created under the same name starts with an empty
    /// ledger but continues the old numbering.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.registry.delete(name)?;
        self.ledger.archive_branch(name)?;
        Ok(())
    }

    pub fn current_branch(&self) -> Result<Branch> {
        self.registry.current()
    }

    /// All branches sorted by name, flagged with the current one.
    pub fn list_branches(&self) -> Vec<BranchEntry> {
        let current = self.registry.current_name();
        self.registry
            .list()
            .into_iter()
            .map(|branch| BranchEntry {
                is_current: branch.name == current,
                branch,
            })
            .collect()
    }

    pub fn lineage(&self, name: &str) -> Result<Vec<String>> {
        self.registry.lineage(name)
    }

    pub fn common_ancestor(&self, a: &str, b: &str) -> Result<Option<String>> {
        self.registry.common_ancestor(a, b)
    }

    // --- Table Inspection ---

    /// Table names in `branch`'s schema, sorted.
    pub fn tables(&self, branch: &str) -> Result<Vec<String>> {
        self.registry.require(branch)?;
        let schema = self.registry.schema_name(branch);
        let mut session = self.engine.connect(None)?;
        session.list_tables(&schema)
    }

    /// Columns of `table` in `branch`, in declaration order.
    ///
    /// Fails with [`BranchError::TableNotFound`] when the table is missing.
    pub fn describe_table(&self, branch: &str, table: &str) -> Result<Vec<Column>> {
        self.registry.require(branch)?;
        let schema = self.registry.schema_name(branch);
        let mut session = self.engine.connect(None)?;
        session.list_columns(TableRef::new(&schema, table))
    }

    // --- Migration Operations ---

    pub fn create_migration(
        &self,
        branch: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Migration> {
        self.ledger.create(&self.registry, branch, name, description)
    }

    /// Apply `number`, or the lowest pending migration when `None`.
    pub fn apply_migration(
        &self,
        branch: &str,
        number: Option<MigrationNumber>,
    ) -> Result<Option<Migration>> {
        self.ledger.apply(&self.registry, branch, number)
    }

    pub fn rollback_migration(&self, branch: &str, number: MigrationNumber) -> Result<Migration> {
        self.ledger.rollback(&self.registry, branch, number)
    }

    /// Highest applied migration of `branch`.
    pub fn current_migration(&self, branch: &str) -> Result<Option<MigrationNumber>> {
        self.registry.require(branch)?;
        Ok(self.ledger.current(branch))
    }

    /// Status report of `branch`, ordered by number.
    pub fn migrations(&self, branch: &str) -> Result<Vec<Migration>> {
        self.registry.require(branch)?;
        Ok(self.ledger.list(branch))
    }

    /// Apply the next pending migration on the current branch.
    pub fn migrate_up(&self) -> Result<Option<Migration>> {
        let branch = self.registry.current_name();
        self.ledger.apply(&self.registry, &branch, None)
    }

    /// Roll back the highest applied migration on the current branch.
    ///
    /// `Ok(None)` when nothing is applied.
    pub fn migrate_down(&self) -> Result<Option<Migration>> {
        let branch = self.registry.current_name();
        match self.ledger.current(&branch) {
            Some(number) => self
                .ledger
                .rollback(&self.registry, &branch, number)
                .map(Some),
            None => Ok(None),
        }
    }

    // --- Merge Operations ---

    /// Merge `source` into `target`.
    pub fn merge(&self, source: &str, target: &str) -> Result<MergeReport> {
        self.merger
            .merge(&self.registry, &self.ledger, source, target)
    }

    /// Migrations applied in `source` but not in `target` (the current
    /// branch when `None`).
    pub fn pending_from(&self, source: &str, target: Option<&str>) -> Result<Vec<Migration>> {
        let target = match target {
            Some(target) => target.to_string(),
            None => self.registry.current_name(),
        };
        pending_from(&self.registry, &self.ledger, source, &target)
    }
}
