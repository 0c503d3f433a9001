//! Migration artifacts on disk.
//!
//! ```text
//! <root>/<branch>/<NNNN>_<name>/up.sql
//!                              /down.sql
//!                              /metadata.json
//! ```

use crate::error::{BranchError, Result};
use crate::types::Migration;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Metadata file name inside a migration directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Which script of a migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn file_name(self) -> &'static str {
        match self {
            Direction::Up => "up.sql",
            Direction::Down => "down.sql",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Direction::Up => "Up Migration",
            Direction::Down => "Down Migration",
        }
    }
}

/// Reads and writes migration scripts and their metadata.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a migration's files.
    pub fn dir_for(&self, migration: &Migration) -> PathBuf {
        self.root.join(&migration.branch).join(migration.dir_name())
    }

    /// Path of one of a migration's scripts.
    pub fn script_path(&self, migration: &Migration, direction: Direction) -> PathBuf {
        self.dir_for(migration).join(direction.file_name())
    }

    fn header(migration: &Migration, direction: Direction) -> String {
        format!(
            "-- Migration: {}\n-- Created at: {}\n-- Branch: {}\n-- {}\n\n",
            migration.name,
            migration.created_at.as_secs(),
            migration.branch,
            direction.label()
        )
    }

    /// Write script templates and metadata for a new migration.
    pub fn create(&self, migration: &Migration) -> Result<PathBuf> {
        let dir = self.dir_for(migration);
        if dir.exists() {
            return Err(BranchError::MigrationExists {
                branch: migration.branch.clone(),
                number: migration.number,
            });
        }
        fs::create_dir_all(&dir)?;

        for direction in [Direction::Up, Direction::Down] {
            fs::write(
                dir.join(direction.file_name()),
                Self::header(migration, direction),
            )?;
        }
        self.write_metadata(migration)?;

        debug!(dir = %dir.display(), "wrote migration artifacts");
        Ok(dir)
    }

    /// Mirror a ledger record into `metadata.json`.
    pub fn write_metadata(&self, migration: &Migration) -> Result<()> {
        let dir = self.dir_for(migration);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_vec_pretty(migration)?;
        fs::write(dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    /// Read `metadata.json` back.
    pub fn read_metadata(&self, migration: &Migration) -> Result<Migration> {
        let path = self.dir_for(migration).join(METADATA_FILE);
        let bytes = fs::read(&path).map_err(|_| {
            BranchError::ArtifactNotFound(path.display().to_string())
        })?;
        serde_json::from_slice(&bytes).map_err(|e| BranchError::Deserialization(e.to_string()))
    }

    /// Read one of a migration's scripts.
    pub fn read_script(&self, migration: &Migration, direction: Direction) -> Result<String> {
        let path = self.script_path(migration, direction);
        if !path.exists() {
            return Err(BranchError::ArtifactNotFound(path.display().to_string()));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Overwrite one of a migration's scripts.
    pub fn write_script(&self, migration: &Migration, direction: Direction, sql: &str) -> Result<()> {
        let path = self.script_path(migration, direction);
        if !self.dir_for(migration).exists() {
            return Err(BranchError::ArtifactNotFound(path.display().to_string()));
        }
        fs::write(path, sql)?;
        Ok(())
    }

    /// Copy a migration's scripts under another branch.
    ///
    /// `copy` is the record as it will appear in the target ledger. Returns
    /// `false` when the source has no artifacts to copy.
    pub fn copy(&self, original: &Migration, copy: &Migration) -> Result<bool> {
        let from = self.dir_for(original);
        if !from.exists() {
            return Ok(false);
        }
        let to = self.dir_for(copy);
        fs::create_dir_all(&to)?;
        for direction in [Direction::Up, Direction::Down] {
            let script = from.join(direction.file_name());
            if script.exists() {
                fs::copy(&script, to.join(direction.file_name()))?;
            }
        }
        self.write_metadata(copy)?;
        Ok(true)
    }
}
