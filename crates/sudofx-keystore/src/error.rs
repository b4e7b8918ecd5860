//! Error types for credential storage.

use std::path::PathBuf;

/// Failures reported by a [`crate::SecretBackend`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend exists but cannot be reached right now (no keyring
    /// daemon, locked keychain, sandbox without storage access).
    #[error("secret backend unavailable: {0}")]
    Unavailable(String),

    /// Reading or writing the credential file failed.
    #[error("credential file {path} is not accessible: {source}")]
    Io {
        /// File that could not be read or written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The stored record exists but cannot be decoded.
    #[error("stored credential is corrupted: {0}")]
    Corrupt(String),

    /// Any other keyring failure.
    #[error("keyring operation failed: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Failures of [`crate::CredentialStore::ensure_credential`].
#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    /// The backend could not be read or written.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The stored credential has an empty username or password.
    #[error("stored credential in {backend} is incomplete")]
    Incomplete {
        /// Backend description.
        backend: String,
    },

    /// A freshly written credential did not read back identically.
    #[error("credential written to {backend} did not read back unchanged")]
    WriteVerification {
        /// Backend description.
        backend: String,
    },
}
