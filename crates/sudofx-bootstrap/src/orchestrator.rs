//! The bootstrap state machine.
//!
//! Stages run strictly in order and each one consumes what the previous one
//! produced:
//!
//! ```text
//! Idle -> LoggingReady -> CredentialReady -> MigrationDone -> PoolReady
//!   \__________\_______________\_________________\-----------> Failed
//! ```
//!
//! The first error moves the machine to `Failed`, skips every later stage,
//! and is returned unchanged. Nothing is retried.

use crate::config::{Config, ConfigError};
use crate::error::{BootstrapError, CredentialError};
use crate::folder::FolderResolver;
use crate::logging::{StartupAnnouncer, TracingAnnouncer};
use crate::mapping::MappingSettings;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use sudofx_db::{apply_migrations, open_pool, DbHandle, DbRuntimeSettings, MigrationReport};
use sudofx_keystore::CredentialStore;
use sudofx_types::DataFolderPath;

/// Where the bootstrap currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapState {
    /// Nothing has run yet.
    Idle,
    /// Logging is set up and the startup banner was written.
    LoggingReady,
    /// The data folder exists and the credential is available.
    CredentialReady,
    /// The schema is at the latest version.
    MigrationDone,
    /// The pooled handle is open. Terminal.
    PoolReady,
    /// A stage failed. Terminal.
    Failed,
}

impl BootstrapState {
    /// The state a successful stage leads to, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::LoggingReady),
            Self::LoggingReady => Some(Self::CredentialReady),
            Self::CredentialReady => Some(Self::MigrationDone),
            Self::MigrationDone => Some(Self::PoolReady),
            Self::PoolReady | Self::Failed => None,
        }
    }

    /// `PoolReady` and `Failed` end the machine.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PoolReady | Self::Failed)
    }

    /// Whether the machine may move from `self` to `to`.
    pub fn can_transition(self, to: Self) -> bool {
        match to {
            Self::Failed => !self.is_terminal(),
            _ => self.next() == Some(to),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::LoggingReady => "logging_ready",
            Self::CredentialReady => "credential_ready",
            Self::MigrationDone => "migration_done",
            Self::PoolReady => "pool_ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The result of a successful bootstrap: the only thing the application
/// layer ever sees.
#[derive(Debug)]
pub struct Bootstrapped {
    /// The shared pooled handle.
    pub handle: DbHandle,
    /// The resolved data folder.
    pub folder: DataFolderPath,
    /// What the migration stage did.
    pub migrations: MigrationReport,
    /// Settings for the mapping/session layer.
    pub mapping: MappingSettings,
}

/// Runs the startup pipeline once.
pub struct Bootstrap {
    announcer: Box<dyn StartupAnnouncer>,
    folders: Box<dyn FolderResolver>,
    credentials: CredentialStore,
    settings: DbRuntimeSettings,
    mapping: MappingSettings,
    state: BootstrapState,
}

impl Bootstrap {
    /// Assembles an idle orchestrator from its collaborators.
    pub fn new(
        announcer: Box<dyn StartupAnnouncer>,
        folders: Box<dyn FolderResolver>,
        credentials: CredentialStore,
        settings: DbRuntimeSettings,
        mapping: MappingSettings,
    ) -> Self {
        Self {
            announcer,
            folders,
            credentials,
            settings,
            mapping,
            state: BootstrapState::Idle,
        }
    }

    /// Builds the production wiring described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the credential store cannot be configured.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Box::new(TracingAnnouncer::new(&config.app.name, config.logging.clone())),
            config.folder_resolver(),
            config.credential_store()?,
            config.runtime_settings(),
            MappingSettings::default(),
        ))
    }

    /// Current state.
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Runs every stage in order.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage; the orchestrator is
    /// then `Failed`. Returns `BootstrapError::AlreadyRun` if called again.
    pub fn run(&mut self) -> Result<Bootstrapped, BootstrapError> {
        if self.state != BootstrapState::Idle {
            return Err(BootstrapError::AlreadyRun(self.state));
        }

        match self.run_stages() {
            Ok(ready) => Ok(ready),
            Err(e) => {
                let failed_in = self.state.next().unwrap_or(self.state);
                self.transition(BootstrapState::Failed);
                tracing::error!(stage = %failed_in, "bootstrap aborted: {e}");
                Err(e)
            }
        }
    }

    fn run_stages(&mut self) -> Result<Bootstrapped, BootstrapError> {
        self.announcer.announce_startup();
        self.transition(BootstrapState::LoggingReady);

        let folder = self.folders.resolve_data_folder()?;
        if let Some(location) = self.credentials.secret_location() {
            if secret_inside(&folder, &location) {
                return Err(CredentialError::InsideDataFolder { path: location }.into());
            }
        }
        let credential = self.credentials.ensure_credential()?;
        tracing::info!(
            folder = %folder,
            backend = %self.credentials.describe(),
            "credential ready"
        );
        self.transition(BootstrapState::CredentialReady);

        let migrations = apply_migrations(&credential, &folder, &self.settings)?;
        self.transition(BootstrapState::MigrationDone);

        let handle = open_pool(&credential, &folder, &self.settings)?;
        self.transition(BootstrapState::PoolReady);

        Ok(Bootstrapped {
            handle,
            folder,
            migrations,
            mapping: self.mapping.clone(),
        })
    }

    fn transition(&mut self, to: BootstrapState) {
        debug_assert!(
            self.state.can_transition(to),
            "illegal bootstrap transition {} -> {}",
            self.state,
            to
        );
        tracing::debug!(from = %self.state, to = %to, "bootstrap transition");
        self.state = to;
    }
}

/// Whether `location` resolves to somewhere inside `folder`.
fn secret_inside(folder: &DataFolderPath, location: &Path) -> bool {
    folder.contains(&resolve_lenient(location))
}

/// Resolves `path` like `canonicalize`, but tolerates missing trailing
/// components: the nearest existing ancestor is canonicalized and the rest
/// is re-appended lexically. Relative paths are taken against the current
/// directory.
fn resolve_lenient(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    let base = loop {
        if let Ok(canonical) = existing.canonicalize() {
            break canonical;
        }
        match (existing.parent(), existing.components().next_back()) {
            (Some(parent), Some(last)) => {
                missing.push(last);
                existing = parent;
            }
            _ => break PathBuf::new(),
        }
    };

    missing.into_iter().rev().fold(base, |mut resolved, part| {
        match part {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => resolved.push(other.as_os_str()),
        }
        resolved
    })
}
