//! Branch registry implementation.

use crate::config::ConnectionDescriptor;
use crate::engine::{RelationalEngine, Session};
use crate::error::{BranchError, Result};
use crate::names::validate_branch_name;
use crate::storage::{RegistryState, StateStore};
use crate::types::{Branch, TableRef, Timestamp, MAIN_BRANCH};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns branch metadata and the current-branch pointer.
pub struct BranchRegistry {
    /// Where registry state is persisted.
    store: Arc<dyn StateStore>,

    /// Engine holding one schema per branch.
    engine: Arc<dyn RelationalEngine>,

    /// In-memory copy of the persisted state.
    state: RwLock<RegistryState>,

    /// Serializes mutations so check-then-act stays consistent.
    write_lock: Mutex<()>,
}

impl BranchRegistry {
    /// Load the registry, or start one holding only `main`.
    ///
    /// The connection descriptor from configuration replaces the persisted
    /// one, and `main`'s schema is created if it is missing.
    pub fn open(
        store: Arc<dyn StateStore>,
        engine: Arc<dyn RelationalEngine>,
        connection: ConnectionDescriptor,
    ) -> Result<Self> {
        let mut state = match store.load_registry()? {
            Some(state) => state,
            None => RegistryState::new(connection.clone()),
        };
        state.connection = connection;

        if !state.branches.contains_key(MAIN_BRANCH) {
            return Err(BranchError::Corruption(
                "registry has no main branch".into(),
            ));
        }
        if !state.branches.contains_key(&state.current_branch) {
            warn!(current = %state.current_branch, "current branch missing; resetting to main");
            state.current_branch = MAIN_BRANCH.to_string();
        }

        store.save_registry(&state)?;

        let registry = Self {
            store,
            engine,
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
        };
        registry.ensure_main_schema()?;
        Ok(registry)
    }

    fn ensure_main_schema(&self) -> Result<()> {
        let schema = self.schema_name(MAIN_BRANCH);
        let mut session = self.engine.connect(None)?;
        if !session.schema_exists(&schema)? {
            session.create_schema(&schema)?;
            info!(schema = %schema, "created main schema");
        }
        Ok(())
    }

    /// Save `next` and make it the in-memory state.
    fn commit_state(&self, next: RegistryState) -> Result<()> {
        self.store.save_registry(&next)?;
        *self.state.write() = next;
        Ok(())
    }

    /// Get a branch by name.
    pub fn get(&self, name: &str) -> Option<Branch> {
        self.state.read().branches.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().branches.contains_key(name)
    }

    /// Get a branch by name or fail with `BranchNotFound`.
    pub fn require(&self, name: &str) -> Result<Branch> {
        self.get(name)
            .ok_or_else(|| BranchError::BranchNotFound(name.to_string()))
    }

    /// Name of the current branch.
    pub fn current_name(&self) -> String {
        self.state.read().current_branch.clone()
    }

    /// The current branch.
    pub fn current(&self) -> Result<Branch> {
        let name = self.current_name();
        self.require(&name)
    }

    /// All branches, sorted by name.
    pub fn list(&self) -> Vec<Branch> {
        self.state.read().branches.values().cloned().collect()
    }

    pub fn branch_count(&self) -> usize {
        self.state.read().branches.len()
    }

    /// Schema that holds `branch`'s tables.
    pub fn schema_name(&self, branch: &str) -> String {
        self.state.read().connection.schema_for(branch)
    }

    /// Create a branch as a full copy of `from` (the current branch when
    /// `None`).
    ///
    /// The copy is a sequence of statements. If any of them fails the new
    /// schema is dropped again and the branch is not registered.
    pub fn create(&self, name: &str, from: Option<&str>) -> Result<Branch> {
        validate_branch_name(name)?;
        let _lock = self.write_lock.lock();

        let (parent, parent_schema, schema) = {
            let state = self.state.read();
            if state.branches.contains_key(name) {
                return Err(BranchError::BranchExists(name.to_string()));
            }
            let parent = from
                .map(str::to_string)
                .unwrap_or_else(|| state.current_branch.clone());
            if !state.branches.contains_key(&parent) {
                return Err(BranchError::BranchNotFound(parent));
            }
            let parent_schema = state.connection.schema_for(&parent);
            let schema = state.connection.schema_for(name);
            (parent, parent_schema, schema)
        };

        let mut session = self.engine.connect(None)?;
        session.create_schema(&schema)?;

        let copied = match copy_tables(session.as_mut(), &parent_schema, &schema) {
            Ok(copied) => copied,
            Err(e) => {
                warn!(branch = name, error = %e, "branch copy failed; dropping partial schema");
                drop_quietly(session.as_mut(), &schema);
                return Err(e);
            }
        };

        let now = Timestamp::now();
        let branch = Branch {
            name: name.to_string(),
            created_at: now,
            last_accessed: now,
            parent: Some(parent.clone()),
        };

        let mut next = self.state.read().clone();
        next.branches.insert(name.to_string(), branch.clone());
        if let Err(e) = self.commit_state(next) {
            drop_quietly(session.as_mut(), &schema);
            return Err(e);
        }

        info!(branch = name, from = %parent, tables = copied, "created branch");
        Ok(branch)
    }

    /// Make `name` the current branch.
    pub fn switch(&self, name: &str) -> Result<Branch> {
        let _lock = self.write_lock.lock();
        let mut next = self.state.read().clone();

        let branch = next
            .branches
            .get_mut(name)
            .ok_or_else(|| BranchError::BranchNotFound(name.to_string()))?;
        branch.last_accessed = Timestamp::now();
        let branch = branch.clone();

        next.current_branch = name.to_string();
        self.commit_state(next)?;

        info!(branch = name, "switched branch");
        Ok(branch)
    }

    /// Refresh `last_accessed` without switching.
    pub fn touch(&self, name: &str) -> Result<()> {
        let _lock = self.write_lock.lock();
        let mut next = self.state.read().clone();
        next.branches
            .get_mut(name)
            .ok_or_else(|| BranchError::BranchNotFound(name.to_string()))?
            .last_accessed = Timestamp::now();
        self.commit_state(next)
    }

    /// Delete a branch and drop its schema (cannot delete main or current
    /// branch).
    pub fn delete(&self, name: &str) -> Result<()> {
        if name == MAIN_BRANCH {
            return Err(BranchError::Forbidden("cannot delete main branch".into()));
        }

        let _lock = self.write_lock.lock();
        let schema = {
            let state = self.state.read();
            if state.current_branch == name {
                return Err(BranchError::Forbidden(format!(
                    "cannot delete current branch '{name}'"
                )));
            }
            if !state.branches.contains_key(name) {
                return Err(BranchError::BranchNotFound(name.to_string()));
            }
            state.connection.schema_for(name)
        };

        let mut session = self.engine.connect(None)?;
        session.drop_schema(&schema)?;

        let mut next = self.state.read().clone();
        next.branches.remove(name);
        self.commit_state(next)?;

        info!(branch = name, "deleted branch");
        Ok(())
    }

    /// Lineage from `name` back to the root: `[name, parent, grandparent, …]`.
    ///
    /// A parent that is no longer registered ends the walk after being
    /// listed. Self-references and longer cycles end it too.
    pub fn lineage(&self, name: &str) -> Result<Vec<String>> {
        let state = self.state.read();
        if !state.branches.contains_key(name) {
            return Err(BranchError::BranchNotFound(name.to_string()));
        }

        let mut lineage = vec![name.to_string()];
        let mut seen: HashSet<&str> = HashSet::from([name]);
        let mut current = name;

        while let Some(branch) = state.branches.get(current) {
            let Some(parent) = branch.parent.as_deref() else {
                break;
            };
            if parent == current || !seen.insert(parent) {
                warn!(branch = current, parent, "cycle in branch lineage");
                break;
            }
            lineage.push(parent.to_string());
            current = parent;
        }

        Ok(lineage)
    }

    /// Nearest branch that appears in both lineages.
    pub fn common_ancestor(&self, a: &str, b: &str) -> Result<Option<String>> {
        let lineage_a = self.lineage(a)?;
        let lineage_b: HashSet<String> = self.lineage(b)?.into_iter().collect();
        Ok(lineage_a.into_iter().find(|name| lineage_b.contains(name)))
    }
}

/// Copy structure and rows of every table from one schema into another.
fn copy_tables(session: &mut dyn Session, from_schema: &str, to_schema: &str) -> Result<usize> {
    let tables = session.list_tables(from_schema)?;
    for table in &tables {
        let source = TableRef::new(from_schema, table);
        let target = TableRef::new(to_schema, table);
        session.create_table_like(target, source)?;
        let rows = session.copy_rows(target, source)?;
        debug!(table = %table, rows, "copied table");
    }
    Ok(tables.len())
}

fn drop_quietly(session: &mut dyn Session, schema: &str) {
    if let Err(e) = session.drop_schema(schema) {
        warn!(schema, error = %e, "could not drop schema");
    }
}
