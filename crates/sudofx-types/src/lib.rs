//! Shared value types for the SudoFX storage layer.
//!
//! Every crate in the workspace exchanges credentials, folder paths, and
//! entity descriptors through the types defined here, so `sudofx-keystore`
//! and `sudofx-db` never need to depend on each other.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Username/password pair protecting the embedded database.
///
/// The password is never printed: the `Debug` impl redacts it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Database user name.
    pub username: String,
    /// Database password.
    pub password: String,
}

impl Credential {
    /// Builds a credential from its two parts.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns `true` when both the username and password are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Absolute path of the directory that holds the database file.
///
/// Resolved once during bootstrap and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataFolderPath(PathBuf);

impl DataFolderPath {
    /// Wraps an already-resolved absolute directory path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The directory itself.
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Path of a file named `file_name` inside this folder.
    pub fn database_file(&self, file_name: &str) -> PathBuf {
        self.0.join(file_name)
    }

    /// Returns `true` if `path` lies inside this folder.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.0)
    }
}

impl AsRef<Path> for DataFolderPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for DataFolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A mapped entity handed to the mapping layer instead of package scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityDescriptor {
    /// Entity type name as the mapping layer knows it.
    pub name: &'static str,
    /// Backing table created by the migrations.
    pub table: &'static str,
}
