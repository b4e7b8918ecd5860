//! Error types for the bootstrap pipeline.

use crate::folder::FolderError;
use crate::orchestrator::BootstrapState;
use std::path::PathBuf;
use sudofx_db::{MigrationError, PoolError};
use sudofx_keystore::KeystoreError;

/// Why the credential stage failed.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The credential store could not provide a credential.
    #[error(transparent)]
    Store(#[from] KeystoreError),

    /// The credential backend writes its secret inside the data folder.
    #[error("credential file {path} must not live inside the data folder")]
    InsideDataFolder {
        /// Configured credential file.
        path: PathBuf,
    },
}

/// Fatal bootstrap failures. Each variant names the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// No credential could be read or created.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(#[source] CredentialError),

    /// The data folder could not be resolved, created, or written.
    #[error("data folder unavailable: {0}")]
    FolderUnavailable(#[from] FolderError),

    /// Applying migrations failed; the schema is at its previous version.
    #[error("database migration failed: {0}")]
    MigrationFailed(#[source] MigrationError),

    /// Another process holds the database.
    #[error("database locked: {0}")]
    DatabaseLocked(#[source] MigrationError),

    /// The pooled handle could not be opened.
    #[error("database connection failed: {0}")]
    ConnectionFailed(#[from] PoolError),

    /// The orchestrator was already run.
    #[error("bootstrap already ran and ended in state {0}")]
    AlreadyRun(BootstrapState),
}

impl From<CredentialError> for BootstrapError {
    fn from(e: CredentialError) -> Self {
        Self::CredentialUnavailable(e)
    }
}

impl From<KeystoreError> for BootstrapError {
    fn from(e: KeystoreError) -> Self {
        Self::CredentialUnavailable(CredentialError::Store(e))
    }
}

impl From<MigrationError> for BootstrapError {
    fn from(e: MigrationError) -> Self {
        match e {
            MigrationError::Locked(_) => Self::DatabaseLocked(e),
            other => Self::MigrationFailed(other),
        }
    }
}
