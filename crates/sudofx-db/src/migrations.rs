//! Embedded SQL migration runner.
//!
//! Migrations are SQL files embedded at compile time, each carrying a
//! version number. A run applies every migration newer than the recorded
//! version inside one `BEGIN IMMEDIATE` transaction, so either the whole
//! batch lands or the database stays at its previous version. Applied
//! versions are tracked in `_sudofx_migrations`.

use crate::auth::{self, AuthCheck};
use crate::is_lock_error;
use crate::pool::{configure_connection, DbRuntimeSettings};
use rusqlite::{params, Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::PathBuf;
use sudofx_types::{Credential, DataFolderPath};
use thiserror::Error;

/// A single embedded migration.
pub(crate) struct Migration {
    pub(crate) version: u32,
    pub(crate) name: &'static str,
    pub(crate) sql: &'static str,
}

/// All migrations in version order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "001_players",
        sql: include_str!("migrations/001_players.sql"),
    },
    Migration {
        version: 2,
        name: "002_games",
        sql: include_str!("migrations/002_games.sql"),
    },
    Migration {
        version: 3,
        name: "003_selection_indexes",
        sql: include_str!("migrations/003_selection_indexes.sql"),
    },
];

const TRACKING_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS _sudofx_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The database file could not be opened or created.
    #[error("failed to open database {path}: {source}")]
    Open {
        /// Database file path.
        path: PathBuf,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Another connection holds the write lock.
    #[error("database is locked by another writer: {0}")]
    Locked(rusqlite::Error),

    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),

    /// The database was migrated by a newer build.
    #[error("database schema version {found} is newer than the latest known version {latest}")]
    FutureVersion {
        /// Recorded version.
        found: u32,
        /// Latest embedded version.
        latest: u32,
    },

    /// The credential does not match the one the database was created with.
    #[error("credential rejected: database belongs to user '{expected_username}'")]
    CredentialRejected {
        /// Username recorded in the database.
        expected_username: String,
    },
}

fn failed(name: &str) -> impl FnOnce(rusqlite::Error) -> MigrationError + '_ {
    move |e| {
        if is_lock_error(&e) {
            MigrationError::Locked(e)
        } else {
            MigrationError::ExecutionFailed {
                name: name.to_string(),
                source: e,
            }
        }
    }
}

/// Summary of one migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Recorded version before the run.
    pub from_version: u32,
    /// Recorded version after the run.
    pub to_version: u32,
    /// Number of migrations applied.
    pub applied: usize,
}

/// Version of the newest embedded migration.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Recorded schema version of the database, `0` for a fresh file.
///
/// # Errors
///
/// Returns `MigrationError::StateQuery` if the tracking table cannot be read.
pub fn schema_version(conn: &Connection) -> Result<u32, MigrationError> {
    recorded_version(conn).map_err(MigrationError::StateQuery)
}

pub(crate) fn recorded_version(conn: &Connection) -> rusqlite::Result<u32> {
    let tracked: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_sudofx_migrations')",
        [],
        |row| row.get(0),
    )?;
    if !tracked {
        return Ok(0);
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _sudofx_migrations",
        [],
        |row| row.get(0),
    )
}

/// Opens (creating if absent) the database file in `folder` and applies all
/// pending migrations, authenticating with `credential`.
///
/// # Errors
///
/// Returns `MigrationError::Locked` if another writer holds the database,
/// `MigrationError::CredentialRejected` if the credential does not match,
/// and the other variants for open, query, or execution failures. On any
/// error the recorded version is unchanged.
pub fn apply_migrations(
    credential: &Credential,
    folder: &DataFolderPath,
    settings: &DbRuntimeSettings,
) -> Result<MigrationReport, MigrationError> {
    let path = folder.database_file(&settings.database_file);

    let conn = Connection::open_with_flags(
        &path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )
    .map_err(|source| MigrationError::Open {
        path: path.clone(),
        source,
    })?;

    configure_connection(&conn, settings).map_err(failed("_connection_setup"))?;

    let report = run_migrations(&conn, credential)?;
    if report.applied > 0 {
        tracing::info!(
            path = %path.display(),
            from = report.from_version,
            to = report.to_version,
            count = report.applied,
            "applied database migrations"
        );
    } else {
        tracing::info!(
            path = %path.display(),
            version = report.to_version,
            "database schema is up to date"
        );
    }
    Ok(report)
}

/// Runs all pending migrations against the given connection.
///
/// # Errors
///
/// See [`apply_migrations`].
pub fn run_migrations(
    conn: &Connection,
    credential: &Credential,
) -> Result<MigrationReport, MigrationError> {
    run_migrations_from_list(conn, credential, MIGRATIONS)
}

pub(crate) fn run_migrations_from_list(
    conn: &Connection,
    credential: &Credential,
    migrations: &[Migration],
) -> Result<MigrationReport, MigrationError> {
    // Taking the write lock up front makes a concurrent writer fail here,
    // before anything is read or changed.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(failed("_begin"))?;

    tx.execute_batch(TRACKING_TABLE_DDL)
        .map_err(failed("_sudofx_migrations_bootstrap"))?;

    let from_version = schema_version(&tx)?;
    let latest = migrations.last().map_or(0, |m| m.version);
    if from_version > latest {
        return Err(MigrationError::FutureVersion {
            found: from_version,
            latest,
        });
    }

    match auth::record_or_verify(&tx, credential).map_err(failed("_credential"))? {
        AuthCheck::Verified => {}
        AuthCheck::Rejected { expected_username } => {
            return Err(MigrationError::CredentialRejected { expected_username })
        }
        AuthCheck::Missing => {
            return Err(MigrationError::StateQuery(rusqlite::Error::QueryReturnedNoRows))
        }
    }

    let mut applied = 0;
    let mut to_version = from_version;

    for migration in migrations {
        if migration.version <= from_version {
            tracing::debug!(
                migration = migration.name,
                "migration already applied, skipping"
            );
            continue;
        }

        tracing::info!(migration = migration.name, version = migration.version, "applying migration");

        tx.execute_batch(migration.sql)
            .map_err(failed(migration.name))?;

        tx.execute(
            "INSERT INTO _sudofx_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )
        .map_err(failed(migration.name))?;

        applied += 1;
        to_version = migration.version;
    }

    tx.commit().map_err(failed("_commit"))?;

    Ok(MigrationReport {
        from_version,
        to_version,
        applied,
    })
}
