//! Database layer for the SudoFX desktop application.
//!
//! Provides the embedded SQL migrations, the credential check that stands in
//! for database user accounts, and the pooled [`DbHandle`] the rest of the
//! application shares.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a local file, no server process. WAL lets the
//!   pool serve readers while one writer is active.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Manual commit**: callers never get an auto-committing connection from
//!   the handle. A [`Session`] opens a transaction on checkout and rolls back
//!   unless it is committed.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so the schema cannot drift from the code that uses it.

mod auth;
mod handle;
mod migrations;
mod pool;
mod schema;

pub use handle::{DbHandle, HandleError, Session};
pub use migrations::{
    apply_migrations, latest_version, run_migrations, schema_version, MigrationError,
    MigrationReport,
};
pub use pool::{open_pool, DbPool, DbRuntimeSettings, PoolError};
pub use schema::ENTITIES;

/// Returns `true` when `e` means another connection holds a conflicting lock.
pub(crate) fn is_lock_error(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}
