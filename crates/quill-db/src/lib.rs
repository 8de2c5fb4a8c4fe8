//! # quill-db
//!
//! Storage layer for the Quill ledger. A single SQLite database holds
//! balances, the append-only transaction log, revenue splits, payouts,
//! licensing workflows and the tables mirrored from collaborating services.
//!
//! ## Conventions
//!
//! - WAL mode, foreign keys enforced
//! - Timestamps are Unix epoch seconds
//! - Ids are UUIDs stored as TEXT
//! - Fiat amounts are exact decimal strings, never REAL
//! - Schema version stored in `PRAGMA user_version`

pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database unavailable: {0}")]
    Unavailable(String),
}

impl DbError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Unavailable(_) => true,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Whether the error is a UNIQUE/CHECK constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            DbError::Constraint(_) => true,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the Quill database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    Ok(())
}

/// Shared handle to the database, cloned into every component.
///
/// All access is serialized through one connection. Callers must not call
/// back into another component while inside [`Db::with_conn`] or
/// [`Db::with_tx`]; the lock is not reentrant.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open a file-backed database.
    pub fn open(path: &Path) -> Result<Self> {
        open(path).map(Self::new)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        open_memory().map(Self::new)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DbError::Unavailable("connection lock poisoned".into()))
    }

    /// Run read-only or single-statement work against the connection.
    pub fn with_conn<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&Connection) -> std::result::Result<T, E>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside an IMMEDIATE transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. Work that must
    /// persist an audit row and still report a failure should return that
    /// outcome as a value and convert it after this call returns.
    pub fn with_tx<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&rusqlite::Transaction<'_>) -> std::result::Result<T, E>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(DbError::from)?;
        Ok(value)
    }
}

// Column codecs shared by the query modules.

pub(crate) fn to_sql_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| DbError::Corrupt(format!("bad uuid {value:?}: {e}")))
}

pub(crate) fn parse_opt_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

pub(crate) fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|e| DbError::Corrupt(format!("bad decimal {value:?}: {e}")))
}

pub(crate) fn parse_opt_decimal(value: Option<String>) -> Result<Option<Decimal>> {
    value.as_deref().map(parse_decimal).transpose()
}

pub(crate) fn parse_tag<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = quill_types::ParseTagError>,
{
    value
        .parse()
        .map_err(|e: quill_types::ParseTagError| DbError::Corrupt(e.to_string()))
}
