//! Error types for branch, migration and merge operations.

use crate::types::MigrationNumber;
use std::fmt;
use thiserror::Error;

/// Broad classification of a [`BranchError`].
///
/// Callers (CLI, GUI) use this to decide presentation without matching on
/// every variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The relational engine could not be reached.
    Connection,
    /// A referenced branch, migration, table or artifact does not exist.
    NotFound,
    /// A branch or migration with the same key is already registered.
    AlreadyExists,
    /// The operation is never allowed on this target.
    Forbidden,
    /// The request is malformed or invalid for the current state.
    Validation,
    /// A statement failed while executing against the engine.
    Execution,
    /// Local persisted state, artifacts or configuration are unusable.
    Storage,
}

/// Step of a merge at which a failure happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStep {
    ListTables,
    ListColumns,
    CreateTable,
    AddColumn,
    Upsert,
    Commit,
}

impl fmt::Display for MergeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeStep::ListTables => "list_tables",
            MergeStep::ListColumns => "list_columns",
            MergeStep::CreateTable => "create_table",
            MergeStep::AddColumn => "add_column",
            MergeStep::Upsert => "upsert",
            MergeStep::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Main error type.
#[derive(Debug, Error)]
pub enum BranchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Migration {number} not found in branch '{branch}'")]
    MigrationNotFound {
        branch: String,
        number: MigrationNumber,
    },

    #[error("Table not found: {schema}.{table}")]
    TableNotFound { schema: String, table: String },

    #[error("Migration artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Migration {number} already exists in branch '{branch}'")]
    MigrationExists {
        branch: String,
        number: MigrationNumber,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Migration {number} failed in branch '{branch}': {message}")]
    MigrationFailed {
        branch: String,
        number: MigrationNumber,
        message: String,
    },

    #[error("Merge of '{source_branch}' into '{target_branch}' failed at {step} on table '{table}': {message}")]
    MergeFailed {
        source_branch: String,
        target_branch: String,
        table: String,
        step: MergeStep,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid state format: {0}")]
    InvalidFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Workspace is locked by another process")]
    Locked,
}

impl BranchError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BranchError::Connection(_) => ErrorKind::Connection,
            BranchError::BranchNotFound(_)
            | BranchError::MigrationNotFound { .. }
            | BranchError::TableNotFound { .. }
            | BranchError::ArtifactNotFound(_) => ErrorKind::NotFound,
            BranchError::BranchExists(_) | BranchError::MigrationExists { .. } => {
                ErrorKind::AlreadyExists
            }
            BranchError::Forbidden(_) => ErrorKind::Forbidden,
            BranchError::Validation(_) => ErrorKind::Validation,
            BranchError::Execution(_)
            | BranchError::MigrationFailed { .. }
            | BranchError::MergeFailed { .. } => ErrorKind::Execution,
            BranchError::Io(_)
            | BranchError::Serialization(_)
            | BranchError::Deserialization(_)
            | BranchError::Corruption(_)
            | BranchError::InvalidFormat(_)
            | BranchError::InvalidConfig(_)
            | BranchError::Locked => ErrorKind::Storage,
        }
    }
}

impl From<serde_json::Error> for BranchError {
    fn from(e: serde_json::Error) -> Self {
        BranchError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for BranchError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BranchError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BranchError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BranchError::Deserialization(e.to_string())
    }
}

impl From<rusqlite::Error> for BranchError {
    fn from(e: rusqlite::Error) -> Self {
        BranchError::Execution(e.to_string())
    }
}

/// Result type for branch operations.
pub type Result<T> = std::result::Result<T, BranchError>;
