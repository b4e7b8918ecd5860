//! Data folder resolution.

use std::fs;
use std::path::{Path, PathBuf};
use sudofx_types::DataFolderPath;
use thiserror::Error;

const PROBE_FILE: &str = ".sudofx-write-probe";

/// Errors that can occur while resolving the data folder.
#[derive(Debug, Error)]
pub enum FolderError {
    /// The OS reports no per-user data directory.
    #[error("the operating system reports no user data directory")]
    NoDataDir,

    /// The folder could not be created or resolved.
    #[error("failed to create data folder {path}: {source}")]
    Create {
        /// Folder that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The path exists but is not a directory.
    #[error("data folder {path} is not a directory")]
    NotADirectory {
        /// Offending path.
        path: PathBuf,
    },

    /// The folder exists but cannot be written to.
    #[error("data folder {path} is not writable: {source}")]
    NotWritable {
        /// Folder that rejected the probe write.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Supplies the directory that holds the database file.
pub trait FolderResolver: Send + Sync {
    /// Resolves the folder, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns `FolderError` if the folder cannot be created or written.
    fn resolve_data_folder(&self) -> Result<DataFolderPath, FolderError>;
}

/// The platform-specific data directory for `app_dir`:
/// - Windows: `%APPDATA%\<app_dir>`
/// - macOS: `~/Library/Application Support/<app_dir>`
/// - Linux: `~/.local/share/<app_dir>`
///
/// # Errors
///
/// Returns `FolderError::NoDataDir` if the OS has no such directory.
pub fn os_data_folder(app_dir: &str) -> Result<PathBuf, FolderError> {
    dirs::data_dir()
        .map(|dir| dir.join(app_dir))
        .ok_or(FolderError::NoDataDir)
}

/// Creates `path` if needed, resolves it to an absolute path, and proves it
/// is writable.
fn prepare(path: &Path) -> Result<DataFolderPath, FolderError> {
    if path.exists() && !path.is_dir() {
        return Err(FolderError::NotADirectory {
            path: path.to_path_buf(),
        });
    }

    fs::create_dir_all(path).map_err(|source| FolderError::Create {
        path: path.to_path_buf(),
        source,
    })?;

    let absolute = path.canonicalize().map_err(|source| FolderError::Create {
        path: path.to_path_buf(),
        source,
    })?;

    let probe = absolute.join(PROBE_FILE);
    fs::write(&probe, b"ok")
        .and_then(|()| fs::remove_file(&probe))
        .map_err(|source| FolderError::NotWritable {
            path: absolute.clone(),
            source,
        })?;

    tracing::debug!(path = %absolute.display(), "data folder ready");
    Ok(DataFolderPath::new(absolute))
}

/// Resolves to `<OS data dir>/<app_dir>`.
#[derive(Debug, Clone)]
pub struct OsFolderResolver {
    app_dir: String,
}

impl OsFolderResolver {
    /// Creates a resolver for the application folder named `app_dir`.
    pub fn new(app_dir: impl Into<String>) -> Self {
        Self {
            app_dir: app_dir.into(),
        }
    }
}

impl FolderResolver for OsFolderResolver {
    fn resolve_data_folder(&self) -> Result<DataFolderPath, FolderError> {
        prepare(&os_data_folder(&self.app_dir)?)
    }
}

/// Resolves to a configured directory.
#[derive(Debug, Clone)]
pub struct FixedFolderResolver {
    path: PathBuf,
}

impl FixedFolderResolver {
    /// Creates a resolver that always returns `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FolderResolver for FixedFolderResolver {
    fn resolve_data_folder(&self) -> Result<DataFolderPath, FolderError> {
        prepare(&self.path)
    }
}
