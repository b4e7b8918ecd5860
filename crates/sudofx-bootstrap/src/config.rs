//! Bootstrap configuration loading from file and environment variables.

use crate::folder::{FixedFolderResolver, FolderResolver, OsFolderResolver};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use sudofx_db::DbRuntimeSettings;
use sudofx_keystore::{
    CredentialStore, FallbackBackend, FileBackend, KeyringBackend, SecretBackend,
    KEYRING_DB_CREDENTIAL, KEYRING_SERVICE,
};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Application identity.
    #[serde(default)]
    pub app: AppConfig,

    /// Where the data folder lives.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Credential persistence settings.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application identity used for folder names and log output.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Display name, also the data folder name under the OS data directory.
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Prefix for generated database usernames.
    #[serde(default = "default_username_prefix")]
    pub username_prefix: String,
}

/// Data folder location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Explicit data folder. When unset the OS data directory is used.
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database file name inside the data folder.
    #[serde(default = "default_db_file")]
    pub file: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Pool checkout timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

/// Which backend keeps the database credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackendKind {
    /// OS keyring only.
    Keyring,
    /// Protected file only.
    File,
    /// OS keyring, falling back to the protected file when the keyring is
    /// unreachable.
    #[default]
    Auto,
}

impl std::str::FromStr for CredentialBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown credential backend '{other}'")),
        }
    }
}

/// Credential persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: CredentialBackendKind,

    /// Credential file for the `file` and `auto` backends. Defaults to
    /// `<OS config dir>/<app name>/credential.json`.
    #[serde(default)]
    pub file: Option<String>,

    /// Keyring service name.
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,

    /// Keyring account name.
    #[serde(default = "default_keyring_account")]
    pub keyring_account: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "sudofx_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_app_name() -> String {
    "SudoFX".to_string()
}

fn default_username_prefix() -> String {
    "sudofx".to_string()
}

fn default_db_file() -> String {
    DbRuntimeSettings::default().database_file
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_connection_timeout_ms() -> u64 {
    DbRuntimeSettings::default().connection_timeout_ms
}

fn default_keyring_service() -> String {
    KEYRING_SERVICE.to_string()
}

fn default_keyring_account() -> String {
    KEYRING_DB_CREDENTIAL.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            username_prefix: default_username_prefix(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file: default_db_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            backend: CredentialBackendKind::default(),
            file: None,
            keyring_service: default_keyring_service(),
            keyring_account: default_keyring_account(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or malformed.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// No credential file was configured and the OS has no config directory.
    #[error("no credential file location: set credentials.file or SUDOFX_CREDENTIAL_FILE")]
    NoCredentialLocation,
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `SUDOFX_DATA_DIR` overrides `storage.data_dir`
/// - `SUDOFX_DB_FILE` overrides `database.file`
/// - `SUDOFX_POOL_MAX_SIZE` overrides `database.pool_max_size`
/// - `SUDOFX_BUSY_TIMEOUT_MS` overrides `database.busy_timeout_ms`
/// - `SUDOFX_CREDENTIAL_BACKEND` overrides `credentials.backend`
/// - `SUDOFX_CREDENTIAL_FILE` overrides `credentials.file`
/// - `SUDOFX_LOG_LEVEL` overrides `logging.level`
/// - `SUDOFX_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting values are invalid.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Applies `SUDOFX_*` overrides read through `lookup`.
pub(crate) fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("SUDOFX_DATA_DIR").filter(|v| !v.trim().is_empty()) {
        config.storage.data_dir = Some(dir);
    }
    if let Some(file) = lookup("SUDOFX_DB_FILE") {
        config.database.file = file;
    }
    if let Some(size) = lookup("SUDOFX_POOL_MAX_SIZE") {
        config.database.pool_max_size = size
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("SUDOFX_POOL_MAX_SIZE '{size}' is not a number")))?;
    }
    if let Some(ms) = lookup("SUDOFX_BUSY_TIMEOUT_MS") {
        config.database.busy_timeout_ms = ms
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("SUDOFX_BUSY_TIMEOUT_MS '{ms}' is not a number")))?;
    }
    if let Some(backend) = lookup("SUDOFX_CREDENTIAL_BACKEND") {
        config.credentials.backend = backend.parse().map_err(ConfigError::Invalid)?;
    }
    if let Some(file) = lookup("SUDOFX_CREDENTIAL_FILE").filter(|v| !v.trim().is_empty()) {
        config.credentials.file = Some(file);
    }
    if let Some(level) = lookup("SUDOFX_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("SUDOFX_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    Ok(())
}

impl Config {
    /// Rejects values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.pool_max_size == 0 {
            return Err(ConfigError::Invalid(
                "database.pool_max_size must be at least 1".to_string(),
            ));
        }
        let file = Path::new(&self.database.file);
        let mut components = file.components();
        let plain_name = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !plain_name {
            return Err(ConfigError::Invalid(format!(
                "database.file '{}' must be a plain file name",
                self.database.file
            )));
        }
        if self.app.name.trim().is_empty() {
            return Err(ConfigError::Invalid("app.name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Database tunables for the migration runner and the pool.
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            database_file: self.database.file.clone(),
            busy_timeout_ms: self.database.busy_timeout_ms,
            pool_max_size: self.database.pool_max_size,
            connection_timeout_ms: self.database.connection_timeout_ms,
        }
    }

    /// The data folder resolver selected by `storage.data_dir`.
    pub fn folder_resolver(&self) -> Box<dyn FolderResolver> {
        match &self.storage.data_dir {
            Some(dir) => Box::new(FixedFolderResolver::new(dir)),
            None => Box::new(OsFolderResolver::new(&self.app.name)),
        }
    }

    fn credential_file(&self) -> Result<PathBuf, ConfigError> {
        match &self.credentials.file {
            Some(file) => Ok(PathBuf::from(file)),
            None => dirs::config_dir()
                .map(|dir| dir.join(&self.app.name).join("credential.json"))
                .ok_or(ConfigError::NoCredentialLocation),
        }
    }

    /// The credential store selected by `credentials.backend`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoCredentialLocation` if a file backend is
    /// needed and no location can be determined.
    pub fn credential_store(&self) -> Result<CredentialStore, ConfigError> {
        let keyring = || {
            KeyringBackend::new(
                &self.credentials.keyring_service,
                &self.credentials.keyring_account,
            )
        };

        let backend: Box<dyn SecretBackend> = match self.credentials.backend {
            CredentialBackendKind::Keyring => Box::new(keyring()),
            CredentialBackendKind::File => Box::new(FileBackend::new(self.credential_file()?)),
            CredentialBackendKind::Auto => Box::new(FallbackBackend::new(
                Box::new(keyring()),
                Box::new(FileBackend::new(self.credential_file()?)),
            )),
        };

        Ok(CredentialStore::new(backend, &self.app.username_prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.app.name, "SudoFX");
        assert_eq!(config.database.file, "sudofx.db");
        assert_eq!(config.database.pool_max_size, 8);
        assert_eq!(config.credentials.backend, CredentialBackendKind::Auto);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = load_config(Some(&dir.path().join("absent.toml")))
            .expect("missing config should fall back to defaults");
        assert_eq!(config.database.file, "sudofx.db");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
[database]
pool_max_size = 2

[credentials]
backend = "file"
file = "/etc/sudofx/credential.json"
"#,
        )
        .expect("config should parse");

        assert_eq!(config.database.pool_max_size, 2);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.credentials.backend, CredentialBackendKind::File);
        assert_eq!(
            config.credentials.file.as_deref(),
            Some("/etc/sudofx/credential.json")
        );
        assert_eq!(config.credentials.keyring_service, KEYRING_SERVICE);
    }

    #[test]
    fn unknown_backend_fails_to_parse() {
        let err = toml::from_str::<Config>("[credentials]\nbackend = \"vault\"\n")
            .expect_err("unknown backend should not parse");
        assert!(err.to_string().contains("vault"));
    }

    #[test]
    fn environment_overrides_apply() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            overrides(&[
                ("SUDOFX_DATA_DIR", "/tmp/sudofx-data"),
                ("SUDOFX_POOL_MAX_SIZE", "4"),
                ("SUDOFX_CREDENTIAL_BACKEND", "FILE"),
                ("SUDOFX_LOG_JSON", "1"),
            ]),
        )
        .expect("overrides should apply");

        assert_eq!(config.storage.data_dir.as_deref(), Some("/tmp/sudofx-data"));
        assert_eq!(config.database.pool_max_size, 4);
        assert_eq!(config.credentials.backend, CredentialBackendKind::File);
        assert!(config.logging.json);
    }

    #[test]
    fn malformed_numeric_override_is_rejected() {
        let mut config = Config::default();
        let err = apply_overrides(&mut config, overrides(&[("SUDOFX_POOL_MAX_SIZE", "many")]))
            .expect_err("non-numeric pool size must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_pool_size_is_invalid() {
        let mut config = Config::default();
        config.database.pool_max_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn database_file_must_be_a_plain_name() {
        for bad in ["", ".", "..", "./", "../escape.db", "nested/sudofx.db", "/abs/sudofx.db"] {
            let mut config = Config::default();
            config.database.file = bad.to_string();
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn runtime_settings_mirror_database_section() {
        let mut config = Config::default();
        config.database.file = "custom.db".to_string();
        config.database.pool_max_size = 3;

        let settings = config.runtime_settings();
        assert_eq!(settings.database_file, "custom.db");
        assert_eq!(settings.pool_max_size, 3);
        assert_eq!(settings.busy_timeout_ms, 5_000);
    }

    #[test]
    fn file_backend_uses_configured_location() {
        let mut config = Config::default();
        config.credentials.backend = CredentialBackendKind::File;
        config.credentials.file = Some("/etc/sudofx/credential.json".to_string());

        let store = config.credential_store().expect("store should build");
        assert_eq!(
            store.secret_location(),
            Some(PathBuf::from("/etc/sudofx/credential.json"))
        );
    }
}
