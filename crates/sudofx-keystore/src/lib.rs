//! Credential storage for the SudoFX embedded database.
//!
//! The database is protected by a username/password pair that must survive
//! restarts but must never sit in plaintext next to the database file. This
//! crate generates that pair on first run and persists it through a
//! [`SecretBackend`]: the OS keyring, a protected JSON file kept outside the
//! data folder, or a fallback chain of both.

mod backend;
mod error;
mod store;

pub use backend::{FallbackBackend, FileBackend, KeyringBackend, MemoryBackend, SecretBackend};
pub use error::{BackendError, KeystoreError};
pub use store::{generate_credential, CredentialStore};

/// Keyring service name under which the credential is stored.
pub const KEYRING_SERVICE: &str = "fr.softsf.sudofx";

/// Keyring account name for the database credential.
pub const KEYRING_DB_CREDENTIAL: &str = "database-credential";
