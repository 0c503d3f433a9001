//! Relational engine collaborator.
//!
//! The core never talks to a database directly. It opens a [`Session`]
//! through a [`RelationalEngine`], uses the schema/table primitives below,
//! and lets the session drop at the end of the operation. Multi-statement
//! mutations go through a [`Transaction`] guard that rolls back unless
//! committed.

pub mod sql;
mod sqlite;

pub use sqlite::{SqliteEngine, SqliteSession};

use crate::config::RetryPolicy;
use crate::error::{BranchError, Result};
use crate::types::{Column, TableRef};
use std::thread;
use tracing::{debug, warn};

/// Factory for engine sessions.
///
/// Implementations must be cheap to share; every top-level operation opens
/// its own session and drops it on exit.
pub trait RelationalEngine: Send + Sync {
    /// Open a session.
    ///
    /// `default_schema` is the schema unqualified names in scripts resolve
    /// to (the equivalent of `USE <schema>`). Fails with
    /// [`BranchError::Connection`] when the engine is unreachable.
    fn connect(&self, default_schema: Option<&str>) -> Result<Box<dyn Session>>;
}

/// One connection to the engine.
pub trait Session {
    /// Whether the underlying connection is still usable.
    fn is_connected(&mut self) -> bool;

    /// Re-establish a dropped connection.
    fn reconnect(&mut self) -> Result<()>;

    fn schema_exists(&mut self, schema: &str) -> Result<bool>;

    /// Create an empty schema. Fails if it already exists.
    fn create_schema(&mut self, schema: &str) -> Result<()>;

    /// Drop a schema and everything in it. Missing schemas are ignored.
    fn drop_schema(&mut self, schema: &str) -> Result<()>;

    /// Table names in a schema, sorted.
    fn list_tables(&mut self, schema: &str) -> Result<Vec<String>>;

    /// Columns of a table in declaration order.
    fn list_columns(&mut self, table: TableRef<'_>) -> Result<Vec<Column>>;

    /// Create `target` with the structure (not the rows) of `source`.
    fn create_table_like(&mut self, target: TableRef<'_>, source: TableRef<'_>) -> Result<()>;

    fn add_column(&mut self, table: TableRef<'_>, column: &Column) -> Result<()>;

    /// Insert every row of `source` into `target`. Returns rows inserted.
    fn copy_rows(&mut self, target: TableRef<'_>, source: TableRef<'_>) -> Result<u64>;

    /// Insert every row of `source` into `target` over `columns`, updating
    /// rows whose key already exists. Returns rows affected.
    fn upsert_rows(
        &mut self,
        target: TableRef<'_>,
        source: TableRef<'_>,
        columns: &[String],
    ) -> Result<u64>;

    /// Run an opaque script against `schema`, which must be the session's
    /// default schema.
    fn execute_script(&mut self, schema: &str, script: &str) -> Result<()>;

    fn row_count(&mut self, table: TableRef<'_>) -> Result<u64>;

    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// Transaction scope over a session.
///
/// Dropping the guard without calling [`commit`](Transaction::commit) rolls
/// the transaction back.
pub struct Transaction<'s> {
    session: &'s mut dyn Session,
    finished: bool,
}

impl<'s> Transaction<'s> {
    pub fn begin(session: &'s mut dyn Session) -> Result<Self> {
        session.begin()?;
        Ok(Self {
            session,
            finished: false,
        })
    }

    /// The session the transaction runs on.
    pub fn session(&mut self) -> &mut dyn Session {
        &mut *self.session
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.session.commit()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.session.rollback()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.session.rollback() {
                warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}

/// Make sure the session is usable, reconnecting a bounded number of times.
pub fn ensure_connected(session: &mut dyn Session, policy: &RetryPolicy) -> Result<()> {
    if session.is_connected() {
        return Ok(());
    }

    let mut last_error = String::from("connection dropped");
    for attempt in 1..=policy.reconnect_attempts {
        warn!(attempt, max = policy.reconnect_attempts, "reconnecting to engine");
        match session.reconnect() {
            Ok(()) if session.is_connected() => {
                debug!(attempt, "reconnected");
                return Ok(());
            }
            Ok(()) => {}
            Err(e) => last_error = e.to_string(),
        }
        if attempt < policy.reconnect_attempts {
            thread::sleep(policy.delay());
        }
    }

    Err(BranchError::Connection(format!(
        "gave up after {} reconnect attempts: {last_error}",
        policy.reconnect_attempts
    )))
}
