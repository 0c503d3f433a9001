//! SQLite adapter.
//!
//! Each schema is one database file `<data_dir>/<schema>.db`. A session
//! opens its default schema as SQLite's `main` database and attaches other
//! schemas under their own name the first time they are referenced.
//! SQLite refuses `ATTACH` inside a transaction, so callers touch every
//! schema they need (e.g. by listing its tables) before `begin`.

use super::sql::{self, quote_ident};
use super::{RelationalEngine, Session};
use crate::error::{BranchError, Result};
use crate::types::{Column, TableRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Alias SQLite gives the database a connection was opened on.
const MAIN_ALIAS: &str = "main";

/// Engine backed by SQLite database files in one directory.
#[derive(Clone, Debug)]
pub struct SqliteEngine {
    data_dir: PathBuf,
    busy_timeout: Duration,
}

impl SqliteEngine {
    /// Create an engine over `data_dir`, creating the directory if needed.
    pub fn new(data_dir: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            busy_timeout,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Open a concrete session (the trait method boxes this).
    pub fn open_session(&self, default_schema: Option<&str>) -> Result<SqliteSession> {
        let mut session = SqliteSession {
            data_dir: self.data_dir.clone(),
            busy_timeout: self.busy_timeout,
            default_schema: default_schema.map(str::to_string),
            conn: None,
            attached: HashSet::new(),
            in_transaction: false,
        };
        session.open()?;
        Ok(session)
    }
}

impl RelationalEngine for SqliteEngine {
    fn connect(&self, default_schema: Option<&str>) -> Result<Box<dyn Session>> {
        Ok(Box::new(self.open_session(default_schema)?))
    }
}

/// A SQLite connection with lazily attached schemas.
pub struct SqliteSession {
    data_dir: PathBuf,
    busy_timeout: Duration,
    default_schema: Option<String>,
    conn: Option<Connection>,
    attached: HashSet<String>,
    in_transaction: bool,
}

impl SqliteSession {
    fn schema_path(&self, schema: &str) -> PathBuf {
        self.data_dir.join(format!("{schema}.db"))
    }

    fn open(&mut self) -> Result<()> {
        let conn = match &self.default_schema {
            Some(schema) => {
                let path = self.schema_path(schema);
                if !path.exists() {
                    return Err(BranchError::Connection(format!(
                        "schema '{schema}' does not exist"
                    )));
                }
                Connection::open(&path)
            }
            None => Connection::open_in_memory(),
        }
        .map_err(|e| BranchError::Connection(e.to_string()))?;

        conn.busy_timeout(self.busy_timeout)
            .map_err(|e| BranchError::Connection(e.to_string()))?;

        self.conn = Some(conn);
        self.attached.clear();
        self.in_transaction = false;
        Ok(())
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| BranchError::Connection("session is closed".into()))
    }

    /// Close the connection, e.g. to simulate a dropped link.
    pub fn close(&mut self) {
        self.conn = None;
        self.attached.clear();
        self.in_transaction = false;
    }

    /// Alias under which `schema` is reachable on this connection.
    fn alias(&mut self, schema: &str) -> Result<String> {
        if self.default_schema.as_deref() == Some(schema) {
            return Ok(MAIN_ALIAS.to_string());
        }
        if self.attached.contains(schema) {
            return Ok(schema.to_string());
        }

        let path = self.schema_path(schema);
        if !path.exists() {
            return Err(BranchError::Execution(format!(
                "schema '{schema}' does not exist"
            )));
        }
        if self.in_transaction {
            return Err(BranchError::Execution(format!(
                "schema '{schema}' must be referenced before the transaction starts"
            )));
        }

        let path_str = path.to_string_lossy().into_owned();
        self.conn()?.execute(
            &format!("ATTACH DATABASE ?1 AS {}", quote_ident(schema)),
            params![path_str],
        )?;
        self.attached.insert(schema.to_string());
        debug!(schema, "attached schema");
        Ok(schema.to_string())
    }
}

impl Session for SqliteSession {
    fn is_connected(&mut self) -> bool {
        match &self.conn {
            Some(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            None => false,
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    fn schema_exists(&mut self, schema: &str) -> Result<bool> {
        Ok(self.schema_path(schema).exists())
    }

    fn create_schema(&mut self, schema: &str) -> Result<()> {
        let path = self.schema_path(schema);
        if path.exists() {
            return Err(BranchError::Execution(format!(
                "schema '{schema}' already exists"
            )));
        }
        // Writing the header is what materializes the file.
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA user_version = 1;")?;
        debug!(schema, path = %path.display(), "created schema");
        Ok(())
    }

    fn drop_schema(&mut self, schema: &str) -> Result<()> {
        if self.default_schema.as_deref() == Some(schema) {
            return Err(BranchError::Execution(format!(
                "cannot drop schema '{schema}' while it is the session default"
            )));
        }
        if self.attached.remove(schema) {
            self.conn()?
                .execute_batch(&format!("DETACH DATABASE {}", quote_ident(schema)))?;
        }

        let path = self.schema_path(schema);
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            let file = PathBuf::from(file);
            if file.exists() {
                fs::remove_file(&file)?;
            }
        }
        debug!(schema, "dropped schema");
        Ok(())
    }

    fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        let alias = self.alias(schema)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT name FROM {}.sqlite_master \
             WHERE type = 'table' AND substr(name, 1, 7) <> 'sqlite_' ORDER BY name",
            quote_ident(&alias)
        ))?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    fn list_columns(&mut self, table: TableRef<'_>) -> Result<Vec<Column>> {
        let alias = self.alias(table.schema)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, type FROM pragma_table_info(?1, ?2) ORDER BY cid",
        )?;
        let columns = stmt
            .query_map(params![table.table, alias], |row| {
                Ok(Column::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(BranchError::TableNotFound {
                schema: table.schema.to_string(),
                table: table.table.to_string(),
            });
        }
        Ok(columns)
    }

    fn create_table_like(&mut self, target: TableRef<'_>, source: TableRef<'_>) -> Result<()> {
        let source_alias = self.alias(source.schema)?;
        let target_alias = self.alias(target.schema)?;

        let create_sql: Option<String> = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT sql FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
                    quote_ident(&source_alias)
                ),
                params![source.table],
                |row| row.get(0),
            )
            .optional()?;

        let create_sql = create_sql.ok_or_else(|| BranchError::TableNotFound {
            schema: source.schema.to_string(),
            table: source.table.to_string(),
        })?;

        let statement = sql::retarget_create_table(&create_sql, &target_alias, target.table)?;
        self.conn()?.execute_batch(&statement)?;

        // Indexes created outside the table definition; automatic ones have no SQL.
        let indexes: Vec<(String, String)> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT name, sql FROM {}.sqlite_master \
                 WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
                quote_ident(&source_alias)
            ))?;
            let rows = stmt
                .query_map(params![source.table], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        for (name, create_sql) in &indexes {
            let statement =
                sql::retarget_create_index(create_sql, &target_alias, name, target.table)?;
            self.conn()?.execute_batch(&statement)?;
            debug!(table = target.table, index = %name, "cloned index");
        }
        Ok(())
    }

    fn add_column(&mut self, table: TableRef<'_>, column: &Column) -> Result<()> {
        let alias = self.alias(table.schema)?;
        let statement = sql::add_column(&alias, &table, column)?;
        self.conn()?.execute_batch(&statement)?;
        Ok(())
    }

    fn copy_rows(&mut self, target: TableRef<'_>, source: TableRef<'_>) -> Result<u64> {
        let columns: Vec<String> = self
            .list_columns(source)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let source_alias = self.alias(source.schema)?;
        let target_alias = self.alias(target.schema)?;
        let statement =
            sql::insert_select(&target_alias, &target, &source_alias, &source, &columns)?;
        let rows = self.conn()?.execute(&statement, [])?;
        Ok(rows as u64)
    }

    fn upsert_rows(
        &mut self,
        target: TableRef<'_>,
        source: TableRef<'_>,
        columns: &[String],
    ) -> Result<u64> {
        let source_alias = self.alias(source.schema)?;
        let target_alias = self.alias(target.schema)?;
        let statement =
            sql::upsert_select(&target_alias, &target, &source_alias, &source, columns)?;
        let rows = self.conn()?.execute(&statement, [])?;
        Ok(rows as u64)
    }

    fn execute_script(&mut self, schema: &str, script: &str) -> Result<()> {
        if self.alias(schema)? != MAIN_ALIAS {
            return Err(BranchError::Execution(format!(
                "scripts for schema '{schema}' need a session opened on it"
            )));
        }
        self.conn()?.execute_batch(script)?;
        Ok(())
    }

    fn row_count(&mut self, table: TableRef<'_>) -> Result<u64> {
        let alias = self.alias(table.schema)?;
        let count: i64 = self
            .conn()?
            .query_row(&sql::row_count(&alias, &table), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn()?.execute_batch("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn()?.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> SqliteEngine {
        SqliteEngine::new(dir.path().join("data"), Duration::from_secs(1)).unwrap()
    }

    fn seed(engine: &SqliteEngine, schema: &str, script: &str) {
        let mut session = engine.connect(None).unwrap();
        session.create_schema(schema).unwrap();
        drop(session);
        let mut session = engine.connect(Some(schema)).unwrap();
        session.execute_script(schema, script).unwrap();
    }

    #[test]
    fn test_create_and_drop_schema() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let mut session = engine.connect(None).unwrap();

        assert!(!session.schema_exists("db").unwrap());
        session.create_schema("db").unwrap();
        assert!(session.schema_exists("db").unwrap());
        assert!(session.create_schema("db").is_err());

        session.drop_schema("db").unwrap();
        assert!(!session.schema_exists("db").unwrap());
    }

    #[test]
    fn test_connect_to_missing_schema_is_connection_error() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let result = engine.connect(Some("nope"));
        assert!(matches!(result, Err(BranchError::Connection(_))));
    }

    #[test]
    fn test_list_tables_and_columns() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        seed(
            &engine,
            "db",
            "CREATE TABLE b (id INTEGER PRIMARY KEY, name TEXT); CREATE TABLE a (x INT);",
        );

        let mut session = engine.connect(None).unwrap();
        assert_eq!(session.list_tables("db").unwrap(), vec!["a", "b"]);

        let cols = session.list_columns(TableRef::new("db", "b")).unwrap();
        assert_eq!(
            cols,
            vec![Column::new("id", "INTEGER"), Column::new("name", "TEXT")]
        );

        let missing = session.list_columns(TableRef::new("db", "zzz"));
        assert!(matches!(missing, Err(BranchError::TableNotFound { .. })));
    }

    #[test]
    fn test_list_tables_keeps_sqlite_lookalike_names() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        seed(
            &engine,
            "db",
            "CREATE TABLE sqlite3_x (id INT); CREATE TABLE SQLiteStats (id INT); \
             CREATE TABLE plain (id INTEGER PRIMARY KEY AUTOINCREMENT);",
        );

        // AUTOINCREMENT creates the internal sqlite_sequence table.
        let mut session = engine.connect(None).unwrap();
        assert_eq!(
            session.list_tables("db").unwrap(),
            vec!["SQLiteStats", "plain", "sqlite3_x"]
        );
    }

    #[test]
    fn test_create_like_and_copy_rows() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        seed(
            &engine,
            "src",
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); \
             INSERT INTO t VALUES (1, 'a'), (2, 'b');",
        );
        let mut session = engine.connect(None).unwrap();
        session.create_schema("dst").unwrap();

        session
            .create_table_like(TableRef::new("dst", "t"), TableRef::new("src", "t"))
            .unwrap();
        assert_eq!(session.row_count(TableRef::new("dst", "t")).unwrap(), 0);

        let copied = session
            .copy_rows(TableRef::new("dst", "t"), TableRef::new("src", "t"))
            .unwrap();
        assert_eq!(copied, 2);
        assert_eq!(session.row_count(TableRef::new("dst", "t")).unwrap(), 2);
    }

    #[test]
    fn test_create_like_clones_indexes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        seed(
            &engine,
            "src",
            "CREATE TABLE t (k TEXT NOT NULL, v TEXT); \
             CREATE UNIQUE INDEX t_k ON t(k); \
             CREATE INDEX t_v ON t(v); \
             INSERT INTO t VALUES ('a', '1');",
        );
        let mut session = engine.connect(None).unwrap();
        session.create_schema("dst").unwrap();
        session
            .create_table_like(TableRef::new("dst", "t"), TableRef::new("src", "t"))
            .unwrap();
        session
            .copy_rows(TableRef::new("dst", "t"), TableRef::new("src", "t"))
            .unwrap();
        drop(session);

        let conn = Connection::open(dir.path().join("data/dst.db")).unwrap();
        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(indexes, vec!["t_k", "t_v"]);

        // The key still holds in the copy.
        let duplicate = conn.execute("INSERT INTO t VALUES ('a', '2')", []);
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_upsert_updates_existing_keys() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        seed(
            &engine,
            "src",
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); \
             INSERT INTO t VALUES (1, 'new'), (3, 'c');",
        );
        seed(
            &engine,
            "dst",
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT); \
             INSERT INTO t VALUES (1, 'old'), (2, 'b');",
        );

        let mut session = engine.open_session(Some("dst")).unwrap();
        session
            .upsert_rows(
                TableRef::new("dst", "t"),
                TableRef::new("src", "t"),
                &["id".to_string(), "v".to_string()],
            )
            .unwrap();
        assert_eq!(session.row_count(TableRef::new("dst", "t")).unwrap(), 3);

        let conn = session.conn().unwrap();
        let v: String = conn
            .query_row("SELECT v FROM t WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(v, "new");
    }

    #[test]
    fn test_transaction_rollback_discards_script() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        seed(&engine, "db", "CREATE TABLE t (id INTEGER PRIMARY KEY);");

        let mut session = engine.connect(Some("db")).unwrap();
        session.begin().unwrap();
        session
            .execute_script("db", "INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);")
            .unwrap();
        session.rollback().unwrap();
        assert_eq!(session.row_count(TableRef::new("db", "t")).unwrap(), 0);
    }

    #[test]
    fn test_attach_inside_transaction_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        seed(&engine, "a", "CREATE TABLE t (id INT);");
        seed(&engine, "b", "CREATE TABLE t (id INT);");

        let mut session = engine.connect(Some("a")).unwrap();
        session.begin().unwrap();
        assert!(session.list_tables("b").is_err());
        session.rollback().unwrap();
        assert_eq!(session.list_tables("b").unwrap(), vec!["t"]);
    }

    #[test]
    fn test_reconnect_after_close() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        seed(&engine, "db", "CREATE TABLE t (id INT);");

        let mut session = engine.open_session(Some("db")).unwrap();
        session.close();
        assert!(!session.is_connected());
        session.reconnect().unwrap();
        assert!(session.is_connected());
        assert_eq!(session.list_tables("db").unwrap(), vec!["t"]);
    }
}
