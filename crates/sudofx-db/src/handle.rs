//! The shared, pooled database handle and its manual-commit sessions.

use crate::pool::DbPool;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while using an open [`DbHandle`].
#[derive(Debug, Error)]
pub enum HandleError {
    /// No connection could be checked out of the pool in time.
    #[error("failed to check out a database connection: {0}")]
    Checkout(#[from] r2d2::Error),

    /// Starting, committing, or rolling back a transaction failed.
    #[error("transaction control failed: {0}")]
    Transaction(#[from] rusqlite::Error),
}

struct HandleInner {
    pool: DbPool,
    db_path: PathBuf,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        // Clean close: fold the WAL back into the main file so the database
        // is a single consistent file once the pool is gone. Sessions hold a
        // handle clone, so every connection is idle by now.
        match self.pool.try_get() {
            Some(conn) => {
                if let Err(e) =
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE); PRAGMA optimize;")
                {
                    tracing::warn!(path = %self.db_path.display(), "shutdown checkpoint failed: {e}");
                } else {
                    tracing::info!(path = %self.db_path.display(), "database closed cleanly");
                }
            }
            None => {
                tracing::warn!(path = %self.db_path.display(), "no idle connection for shutdown checkpoint, skipping");
            }
        }
    }
}

/// Process-wide handle to the pooled database.
///
/// Clones share one pool. The shutdown hook runs when the last clone is
/// dropped, and every open [`Session`] counts as a clone. Connections are only handed out inside a [`Session`], so callers
/// always control commits explicitly.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbHandle")
            .field("db_path", &self.inner.db_path)
            .field("max_size", &self.inner.pool.max_size())
            .finish()
    }
}

impl DbHandle {
    pub(crate) fn new(pool: DbPool, db_path: PathBuf) -> Self {
        Self {
            inner: Arc::new(HandleInner { pool, db_path }),
        }
    }

    /// Path of the database file.
    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    /// Upper bound on pooled connections.
    pub fn max_size(&self) -> u32 {
        self.inner.pool.max_size()
    }

    /// Checks out a connection and opens a deferred transaction on it.
    ///
    /// # Errors
    ///
    /// Returns `HandleError` if no connection is available within the pool
    /// timeout or the transaction cannot be started.
    pub fn begin(&self) -> Result<Session, HandleError> {
        let conn = self.inner.pool.get()?;
        // A connection whose earlier rollback failed may still be inside a
        // transaction; clear it before reuse.
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Session {
            conn: Some(conn),
            _handle: self.clone(),
        })
    }

    /// Runs `f` inside a session, committing if it returns `Ok` and rolling
    /// back otherwise.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or a `HandleError` converted into `E`
    /// if the session cannot be opened or committed.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<HandleError>,
    {
        let session = self.begin()?;
        match f(&*session) {
            Ok(value) => {
                session.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = session.rollback() {
                    tracing::warn!("rollback after failed transaction also failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    /// Releases this clone, running the shutdown hook if it was the last.
    ///
    /// Returns `true` when the hook ran. With sessions still open it returns
    /// `false` and the hook runs when the last of them is released.
    pub fn shutdown(self) -> bool {
        Arc::into_inner(self.inner).is_some()
    }
}

/// A pooled connection with an open transaction.
///
/// Dropping a session without calling [`Session::commit`] rolls it back.
pub struct Session {
    // Returned to the pool before `_handle` is released, so the shutdown
    // hook can always check it out.
    conn: Option<PooledConnection<SqliteConnectionManager>>,
    _handle: DbHandle,
}

impl Session {
    /// Commits the transaction and returns the connection to the pool.
    ///
    /// # Errors
    ///
    /// Returns `HandleError::Transaction` if the commit fails; the
    /// transaction is then rolled back when the session drops.
    pub fn commit(mut self) -> Result<(), HandleError> {
        if let Some(conn) = self.conn.as_ref() {
            conn.execute_batch("COMMIT")?;
        }
        self.conn = None;
        Ok(())
    }

    /// Rolls back the transaction and returns the connection to the pool.
    ///
    /// # Errors
    ///
    /// Returns `HandleError::Transaction` if the rollback fails.
    pub fn rollback(mut self) -> Result<(), HandleError> {
        match self.conn.take() {
            Some(conn) => conn.execute_batch("ROLLBACK").map_err(HandleError::from),
            None => Ok(()),
        }
    }
}

impl Deref for Session {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("session connection is only taken by commit or rollback"),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!("rolling back abandoned session failed: {e}");
                } else {
                    tracing::debug!("rolled back uncommitted session");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{apply_migrations, open_pool, DbRuntimeSettings};
    use sudofx_types::{Credential, DataFolderPath};

    fn open(dir: &Path) -> DbHandle {
        open_with(dir, &DbRuntimeSettings::default())
    }

    fn open_with(dir: &Path, settings: &DbRuntimeSettings) -> DbHandle {
        let credential = Credential::new("sudofx_test", "handle-password");
        let folder = DataFolderPath::new(dir);
        apply_migrations(&credential, &folder, settings).expect("migrations should succeed");
        open_pool(&credential, &folder, settings).expect("pool should open")
    }

    fn wal_len(dir: &Path) -> u64 {
        std::fs::metadata(dir.join("sudofx.db-wal"))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn language_count(handle: &DbHandle) -> i64 {
        let session = handle.begin().expect("should begin");
        session
            .query_row("SELECT COUNT(*) FROM player_language", [], |row| row.get(0))
            .expect("should count languages")
    }

    #[test]
    fn session_is_not_auto_commit() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let handle = open(dir.path());
        let session = handle.begin().expect("should begin");
        assert!(!session.is_autocommit(), "sessions must run inside a transaction");
    }

    #[test]
    fn committed_session_persists() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let handle = open(dir.path());

        let session = handle.begin().expect("should begin");
        session
            .execute("INSERT INTO player_language (iso) VALUES ('de')", [])
            .expect("should insert");
        session.commit().expect("should commit");

        assert_eq!(language_count(&handle), 3);
    }

    #[test]
    fn dropped_session_rolls_back() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let handle = open(dir.path());

        {
            let session = handle.begin().expect("should begin");
            session
                .execute("INSERT INTO player_language (iso) VALUES ('de')", [])
                .expect("should insert");
        }

        assert_eq!(language_count(&handle), 2, "uncommitted insert must vanish");
    }

    #[test]
    fn with_transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let handle = open(dir.path());

        let result: Result<(), HandleError> = handle.with_transaction(|conn| {
            conn.execute("INSERT INTO player_language (iso) VALUES ('de')", [])?;
            conn.execute("INSERT INTO player_language (iso) VALUES ('toolong')", [])?;
            Ok(())
        });
        assert!(result.is_err(), "check constraint should fail the closure");
        assert_eq!(language_count(&handle), 2);

        handle
            .with_transaction(|conn| {
                conn.execute("INSERT INTO player_language (iso) VALUES ('it')", [])
                    .map_err(HandleError::from)
            })
            .expect("valid insert should commit");
        assert_eq!(language_count(&handle), 3);
    }

    #[test]
    fn clones_share_one_pool_across_threads() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let handle = open(dir.path());
        let isos = ["de", "it", "es", "pt"];

        std::thread::scope(|scope| {
            for iso in isos {
                let handle = handle.clone();
                scope.spawn(move || {
                    handle
                        .with_transaction(|conn| {
                            conn.execute("INSERT INTO player_language (iso) VALUES (?1)", [iso])
                                .map_err(HandleError::from)
                        })
                        .expect("insert should commit");
                });
            }
        });

        assert_eq!(language_count(&handle), 2 + isos.len() as i64);
    }

    #[test]
    fn last_clone_runs_shutdown_hook() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let handle = open(dir.path());

        handle
            .with_transaction(|conn| {
                conn.execute("INSERT INTO player_language (iso) VALUES ('de')", [])
                    .map_err(HandleError::from)
            })
            .expect("insert should commit");

        let other = handle.clone();
        assert!(!handle.shutdown(), "a live clone keeps the pool open");
        assert!(other.shutdown(), "the last clone runs the hook");

        assert_eq!(wal_len(dir.path()), 0, "WAL must be checkpointed on shutdown");

        let conn = Connection::open(dir.path().join("sudofx.db")).expect("should reopen");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM player_language", [], |row| row.get(0))
            .expect("should count languages");
        assert_eq!(count, 3, "committed data must survive shutdown");
    }

    #[test]
    fn open_session_defers_shutdown_without_blocking() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let settings = DbRuntimeSettings {
            pool_max_size: 1,
            connection_timeout_ms: 3_000,
            ..DbRuntimeSettings::default()
        };
        let handle = open_with(dir.path(), &settings);

        handle
            .with_transaction(|conn| {
                conn.execute("INSERT INTO player_language (iso) VALUES ('de')", [])
                    .map_err(HandleError::from)
            })
            .expect("insert should commit");

        let session = handle.begin().expect("should begin");
        let started = std::time::Instant::now();
        assert!(!handle.shutdown(), "an open session keeps the pool alive");
        assert!(
            started.elapsed() < std::time::Duration::from_secs(1),
            "shutdown must not wait for the checked-out connection"
        );

        let count: i64 = session
            .query_row("SELECT COUNT(*) FROM player_language", [], |row| row.get(0))
            .expect("session should still work");
        assert_eq!(count, 3);
        drop(session);

        assert_eq!(wal_len(dir.path()), 0, "releasing the last session runs the hook");
    }
}
