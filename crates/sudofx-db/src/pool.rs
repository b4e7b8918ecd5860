//! Connection pool creation and configuration.

use crate::auth::{self, AuthCheck};
use crate::handle::DbHandle;
use crate::is_lock_error;
use crate::migrations::{latest_version, recorded_version};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sudofx_types::{Credential, DataFolderPath};
use thiserror::Error;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// File name of the database inside the data folder.
    pub database_file: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// How long a checkout waits for a free connection, in milliseconds.
    pub connection_timeout_ms: u64,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            database_file: "sudofx.db".to_string(),
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            connection_timeout_ms: 30_000,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when opening the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The database file does not exist; migrations have not run.
    #[error("database file {path} does not exist")]
    MissingDatabase {
        /// Expected database file.
        path: PathBuf,
    },

    /// The schema is not at the latest version.
    #[error("database schema is at version {found}, expected {latest}; run migrations first")]
    NotMigrated {
        /// Recorded version.
        found: u32,
        /// Latest embedded version.
        latest: u32,
    },

    /// The credential does not match the database.
    #[error("credential rejected: database belongs to user '{expected_username}'")]
    CredentialRejected {
        /// Username recorded in the database.
        expected_username: String,
    },

    /// Another process holds a conflicting lock.
    #[error("database is locked by another process: {0}")]
    Locked(rusqlite::Error),

    /// Any other SQLite failure while checking the database.
    #[error("database check failed: {0}")]
    Sqlite(rusqlite::Error),

    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

impl From<rusqlite::Error> for PoolError {
    fn from(e: rusqlite::Error) -> Self {
        if is_lock_error(&e) {
            Self::Locked(e)
        } else {
            Self::Sqlite(e)
        }
    }
}

/// Applies the per-connection pragmas: busy timeout, WAL journal mode
/// (verified), and foreign key enforcement.
pub(crate) fn configure_connection(
    conn: &Connection,
    settings: &DbRuntimeSettings,
) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;

    // In-memory databases report "memory", which is expected and acceptable.
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!(
                "failed to set WAL journal mode, got: {}",
                journal_mode
            )),
        ));
    }

    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn rejected(message: &str) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_AUTH),
        Some(message.to_string()),
    )
}

/// Runs on every new pooled connection: pragmas first, then the credential
/// must reproduce the stored fingerprint.
fn init_connection(
    conn: &Connection,
    settings: &DbRuntimeSettings,
    credential: &Credential,
) -> rusqlite::Result<()> {
    configure_connection(conn, settings)?;
    match auth::check(conn, credential)? {
        AuthCheck::Verified => Ok(()),
        _ => Err(rejected("database credential rejected")),
    }
}

/// Builds the bounded pool over `path`. No pre-flight checks.
fn build_pool(
    path: &Path,
    credential: &Credential,
    settings: &DbRuntimeSettings,
) -> Result<DbPool, r2d2::Error> {
    // No CREATE flag: a file removed after the pre-flight must not be
    // silently recreated empty.
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let init_settings = settings.clone();
    let init_credential = credential.clone();
    let manager = SqliteConnectionManager::file(path)
        .with_flags(flags)
        .with_init(move |conn| init_connection(conn, &init_settings, &init_credential));

    Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_timeout(Duration::from_millis(settings.connection_timeout_ms))
        .build(manager)
}

/// Checks the file on a direct connection before any pooled connection
/// exists: the schema must be current and the credential must match.
fn preflight(
    path: &Path,
    credential: &Credential,
    settings: &DbRuntimeSettings,
) -> Result<(), PoolError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))?;

    let found = recorded_version(&conn)?;
    let latest = latest_version();
    if found != latest {
        return Err(PoolError::NotMigrated { found, latest });
    }

    match auth::check(&conn, credential)? {
        AuthCheck::Verified => Ok(()),
        AuthCheck::Rejected { expected_username } => {
            Err(PoolError::CredentialRejected { expected_username })
        }
        AuthCheck::Missing => Err(PoolError::NotMigrated { found, latest }),
    }
}

/// Opens the pooled handle to the migrated database in `folder`.
///
/// Must only be called after migrations have succeeded: the file must exist,
/// its schema must be at [`latest_version`], and `credential` must match the
/// fingerprint recorded during migration. Every pooled connection re-checks
/// the credential when it is created.
///
/// # Errors
///
/// Returns `PoolError` if any precondition fails or the pool cannot be
/// built.
pub fn open_pool(
    credential: &Credential,
    folder: &DataFolderPath,
    settings: &DbRuntimeSettings,
) -> Result<DbHandle, PoolError> {
    let path = folder.database_file(&settings.database_file);
    if !path.is_file() {
        return Err(PoolError::MissingDatabase { path });
    }

    preflight(&path, credential, settings)?;

    let pool = build_pool(&path, credential, settings)?;

    tracing::info!(
        path = %path.display(),
        max_size = settings.pool_max_size,
        "database connection pool ready"
    );

    Ok(DbHandle::new(pool, path))
}
