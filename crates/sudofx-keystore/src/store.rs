//! First-run provisioning and retrieval of the database credential.

use crate::backend::SecretBackend;
use crate::error::KeystoreError;
use rand::distributions::{Alphanumeric, Uniform};
use rand::prelude::*;
use rand::rngs::OsRng;
use std::path::PathBuf;
use sudofx_types::Credential;

const CROCKFORD: &[u8] = b"0123456789abcdefghjkmnpqrstvwxyz";
const USERNAME_SUFFIX_LEN: usize = 10;
const PASSWORD_LEN: usize = 32;

/// Generates a fresh credential from the OS random source.
///
/// The username is `<prefix>_` followed by ten lower-case Crockford base32
/// characters; the password is 32 alphanumeric characters.
pub fn generate_credential(prefix: &str) -> Credential {
    let mut rng = OsRng;
    let dist = Uniform::from(0..CROCKFORD.len());

    let mut username = String::with_capacity(prefix.len() + 1 + USERNAME_SUFFIX_LEN);
    username.push_str(prefix);
    username.push('_');
    for _ in 0..USERNAME_SUFFIX_LEN {
        username.push(CROCKFORD[dist.sample(&mut rng)] as char);
    }

    let password: String = rng
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect();

    Credential { username, password }
}

/// Owns the credential for one installation.
pub struct CredentialStore {
    backend: Box<dyn SecretBackend>,
    username_prefix: String,
}

impl CredentialStore {
    /// Creates a store persisting through `backend`, generating usernames
    /// that start with `username_prefix`.
    pub fn new(backend: Box<dyn SecretBackend>, username_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            username_prefix: username_prefix.into(),
        }
    }

    /// File the backend writes the secret to, if it writes one.
    pub fn secret_location(&self) -> Option<PathBuf> {
        self.backend.location()
    }

    /// Description of the backing store.
    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Returns the stored credential, creating and persisting one on the
    /// first call for this installation.
    ///
    /// # Errors
    ///
    /// Returns `KeystoreError` if the backend cannot be read or written, if
    /// the stored record is incomplete, or if a new credential does not
    /// read back unchanged.
    pub fn ensure_credential(&self) -> Result<Credential, KeystoreError> {
        if let Some(existing) = self.backend.load()? {
            if !existing.is_complete() {
                return Err(KeystoreError::Incomplete {
                    backend: self.backend.describe(),
                });
            }
            tracing::debug!(backend = %self.backend.describe(), "reusing stored credential");
            return Ok(existing);
        }

        let credential = generate_credential(&self.username_prefix);
        self.backend.store(&credential)?;

        match self.backend.load()? {
            Some(stored) if stored == credential => {}
            _ => {
                return Err(KeystoreError::WriteVerification {
                    backend: self.backend.describe(),
                })
            }
        }

        tracing::info!(
            backend = %self.backend.describe(),
            username = %credential.username,
            "provisioned new database credential"
        );
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::BackendError;
    use std::sync::Arc;

    #[test]
    fn generated_credentials_have_expected_shape() {
        let credential = generate_credential("sudofx");
        assert!(credential.username.starts_with("sudofx_"));
        assert_eq!(credential.username.len(), "sudofx_".len() + USERNAME_SUFFIX_LEN);
        assert_eq!(credential.password.len(), PASSWORD_LEN);
        assert!(credential.password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn generated_credentials_differ() {
        assert_ne!(generate_credential("sudofx"), generate_credential("sudofx"));
    }

    #[test]
    fn ensure_credential_is_stable() {
        let backend = Arc::new(MemoryBackend::new());
        let store = CredentialStore::new(Box::new(Arc::clone(&backend)), "sudofx");

        let first = store.ensure_credential().expect("first call should succeed");
        let second = store.ensure_credential().expect("second call should succeed");

        assert_eq!(first, second);
        assert_eq!(backend.store_count(), 1, "only the first call writes");
    }

    #[test]
    fn ensure_credential_rejects_incomplete_record() {
        let backend = MemoryBackend::with_credential(Credential::new("sudofx_x", ""));
        let store = CredentialStore::new(Box::new(backend), "sudofx");

        let err = store.ensure_credential().expect_err("empty password must fail");
        assert!(matches!(err, KeystoreError::Incomplete { .. }), "got {err:?}");
    }

    #[test]
    fn ensure_credential_surfaces_unavailable_backend() {
        let store = CredentialStore::new(Box::new(MemoryBackend::unavailable()), "sudofx");
        let err = store.ensure_credential().expect_err("unavailable backend must fail");
        assert!(
            matches!(err, KeystoreError::Backend(BackendError::Unavailable(_))),
            "got {err:?}"
        );
    }
}
