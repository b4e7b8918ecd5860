//! Persistence backends for the database credential.

use crate::error::BackendError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use sudofx_types::Credential;

/// Somewhere a [`Credential`] can be kept between runs.
pub trait SecretBackend: Send + Sync {
    /// Reads the stored credential, or `Ok(None)` if nothing is stored yet.
    fn load(&self) -> Result<Option<Credential>, BackendError>;

    /// Persists `credential`, replacing any previous value.
    fn store(&self, credential: &Credential) -> Result<(), BackendError>;

    /// Filesystem location of the secret, for backends that write files.
    fn location(&self) -> Option<PathBuf> {
        None
    }

    /// Human-readable name used in logs and error messages.
    fn describe(&self) -> String;
}

impl<T: SecretBackend + ?Sized> SecretBackend for Arc<T> {
    fn load(&self) -> Result<Option<Credential>, BackendError> {
        (**self).load()
    }

    fn store(&self, credential: &Credential) -> Result<(), BackendError> {
        (**self).store(credential)
    }

    fn location(&self) -> Option<PathBuf> {
        (**self).location()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

fn decode(raw: &str) -> Result<Credential, BackendError> {
    serde_json::from_str(raw).map_err(|e| BackendError::Corrupt(e.to_string()))
}

fn encode(credential: &Credential) -> Result<String, BackendError> {
    serde_json::to_string(credential).map_err(|e| BackendError::Corrupt(e.to_string()))
}

// ── OS keyring ──

/// Stores the credential as one JSON entry in the OS keyring.
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
    account: String,
}

impl KeyringBackend {
    /// Creates a backend keyed by `service` / `account`.
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, BackendError> {
        keyring::Entry::new(&self.service, &self.account).map_err(map_keyring_error)
    }
}

fn map_keyring_error(e: keyring::Error) -> BackendError {
    match e {
        keyring::Error::PlatformFailure(ref msg) => {
            BackendError::Unavailable(format!("OS keyring platform failure: {msg}"))
        }
        keyring::Error::NoStorageAccess(ref msg) => {
            BackendError::Unavailable(format!("OS keyring not accessible: {msg}"))
        }
        other => BackendError::Keyring(other),
    }
}

impl SecretBackend for KeyringBackend {
    fn load(&self) -> Result<Option<Credential>, BackendError> {
        match self.entry()?.get_password() {
            Ok(raw) => decode(&raw).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(e)),
        }
    }

    fn store(&self, credential: &Credential) -> Result<(), BackendError> {
        let raw = encode(credential)?;
        self.entry()?
            .set_password(&raw)
            .map_err(map_keyring_error)
    }

    fn describe(&self) -> String {
        format!("keyring {}/{}", self.service, self.account)
    }
}

// ── Protected file ──

/// Stores the credential as JSON in a file readable only by the owner.
///
/// The file must live outside the data folder; the bootstrap refuses a
/// location inside it.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Creates a backend writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> BackendError {
        BackendError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SecretBackend for FileBackend {
    fn load(&self) -> Result<Option<Credential>, BackendError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => decode(&raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn store(&self, credential: &Credential) -> Result<(), BackendError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let raw = encode(credential)?;
        let tmp = self.path.with_extension("tmp");

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp).map_err(|e| self.io_error(e))?;
        file.write_all(raw.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| self.io_error(e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

// ── Fallback chain ──

/// Uses `primary` while it is reachable and `secondary` otherwise.
///
/// A credential written to the secondary during a primary outage is still
/// found after the primary comes back, because an empty primary defers to
/// the secondary on load.
pub struct FallbackBackend {
    primary: Box<dyn SecretBackend>,
    secondary: Box<dyn SecretBackend>,
}

impl FallbackBackend {
    /// Chains two backends.
    pub fn new(primary: Box<dyn SecretBackend>, secondary: Box<dyn SecretBackend>) -> Self {
        Self { primary, secondary }
    }
}

impl SecretBackend for FallbackBackend {
    fn load(&self) -> Result<Option<Credential>, BackendError> {
        match self.primary.load() {
            Ok(Some(credential)) => Ok(Some(credential)),
            Ok(None) => self.secondary.load(),
            Err(BackendError::Unavailable(msg)) => {
                tracing::warn!(
                    backend = %self.primary.describe(),
                    fallback = %self.secondary.describe(),
                    "{msg}, reading credential from fallback"
                );
                self.secondary.load()
            }
            Err(e) => Err(e),
        }
    }

    fn store(&self, credential: &Credential) -> Result<(), BackendError> {
        match self.primary.store(credential) {
            Ok(()) => Ok(()),
            Err(BackendError::Unavailable(msg)) => {
                tracing::warn!(
                    backend = %self.primary.describe(),
                    fallback = %self.secondary.describe(),
                    "{msg}, storing credential in fallback"
                );
                self.secondary.store(credential)
            }
            Err(e) => Err(e),
        }
    }

    fn location(&self) -> Option<PathBuf> {
        self.secondary.location()
    }

    fn describe(&self) -> String {
        format!(
            "{} (fallback: {})",
            self.primary.describe(),
            self.secondary.describe()
        )
    }
}

// ── In-memory ──

/// Process-local backend, mostly for tests and embedders that manage the
/// secret themselves.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<Credential>>,
    unavailable: bool,
    loads: AtomicUsize,
    stores: AtomicUsize,
}

impl MemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend already holding `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
            ..Self::default()
        }
    }

    /// A backend that reports itself unreachable on every call.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Number of `load` calls made so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `store` calls made so far.
    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Credential>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SecretBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Credential>, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(BackendError::Unavailable("memory backend disabled".into()));
        }
        Ok(self.slot().clone())
    }

    fn store(&self, credential: &Credential) -> Result<(), BackendError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(BackendError::Unavailable("memory backend disabled".into()));
        }
        *self.slot() = Some(credential.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Credential {
        Credential::new("sudofx_user", "correct-horse-battery")
    }

    #[test]
    fn file_backend_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let backend = FileBackend::new(dir.path().join("credential.json"));
        assert!(backend.load().expect("load should succeed").is_none());
    }

    #[test]
    fn file_backend_persists_and_creates_parent() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("nested").join("credential.json");
        let backend = FileBackend::new(&path);

        backend.store(&sample()).expect("store should succeed");
        assert!(path.exists(), "credential file should be written");
        assert!(
            !path.with_extension("tmp").exists(),
            "temp file should be renamed away"
        );

        let reopened = FileBackend::new(&path);
        assert_eq!(reopened.load().expect("load should succeed"), Some(sample()));
    }

    #[cfg(unix)]
    #[test]
    fn file_backend_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("credential.json");
        FileBackend::new(&path)
            .store(&sample())
            .expect("store should succeed");

        let mode = fs::metadata(&path)
            .expect("should stat credential file")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600, "credential file must be owner-only");
    }

    #[test]
    fn file_backend_reports_corruption() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("credential.json");
        fs::write(&path, "{ not json").expect("should write garbage");

        let err = FileBackend::new(&path)
            .load()
            .expect_err("garbage should not decode");
        assert!(matches!(err, BackendError::Corrupt(_)), "got {err:?}");
    }

    #[test]
    fn fallback_uses_secondary_when_primary_unavailable() {
        let secondary = Arc::new(MemoryBackend::new());
        let chain = FallbackBackend::new(
            Box::new(MemoryBackend::unavailable()),
            Box::new(Arc::clone(&secondary)),
        );

        chain.store(&sample()).expect("store should fall back");
        assert_eq!(secondary.store_count(), 1);
        assert_eq!(chain.load().expect("load should fall back"), Some(sample()));
    }

    #[test]
    fn fallback_reads_secondary_when_primary_is_empty() {
        let chain = FallbackBackend::new(
            Box::new(MemoryBackend::new()),
            Box::new(MemoryBackend::with_credential(sample())),
        );
        assert_eq!(chain.load().expect("load should succeed"), Some(sample()));
    }

    #[test]
    fn fallback_prefers_primary() {
        let primary = Arc::new(MemoryBackend::new());
        let secondary = Arc::new(MemoryBackend::new());
        let chain = FallbackBackend::new(
            Box::new(Arc::clone(&primary)),
            Box::new(Arc::clone(&secondary)),
        );

        chain.store(&sample()).expect("store should succeed");
        assert_eq!(primary.store_count(), 1);
        assert_eq!(secondary.store_count(), 0);
    }

    #[test]
    fn fallback_propagates_non_availability_errors() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("credential.json");
        fs::write(&path, "garbage").expect("should write garbage");

        let chain = FallbackBackend::new(
            Box::new(FileBackend::new(&path)),
            Box::new(MemoryBackend::with_credential(sample())),
        );
        let err = chain.load().expect_err("corruption must not be masked");
        assert!(matches!(err, BackendError::Corrupt(_)));
    }
}
