//! SudoFX storage bootstrap binary.
//!
//! Runs the startup pipeline once: logging, data folder, credential,
//! migrations, pooled handle. Exits non-zero on the first failure so the
//! application never starts against a half-initialized store.

use std::path::PathBuf;
use std::process::ExitCode;

use sudofx_bootstrap::config::{self, Config};
use sudofx_bootstrap::Bootstrap;

fn resolve_config_path() -> (Option<PathBuf>, &'static str) {
    if let Ok(path) = std::env::var("SUDOFX_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(PathBuf::from(path)), "env-var");
        }
    }

    match dirs::config_dir() {
        Some(dir) => (Some(dir.join("SudoFX").join("config.toml")), "os-config-dir"),
        None => (None, "default"),
    }
}

fn load() -> Result<(Config, Option<PathBuf>, &'static str), config::ConfigError> {
    let (path, source) = resolve_config_path();
    let config = config::load_config(path.as_deref())?;
    Ok((config, path, source))
}

fn main() -> ExitCode {
    // Tracing is not installed until the first bootstrap stage, so errors
    // before that go to stderr directly.
    let (config, config_path, config_source) = match load() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("sudofx: failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut bootstrap = match Bootstrap::from_config(&config) {
        Ok(bootstrap) => bootstrap,
        Err(e) => {
            eprintln!("sudofx: invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let ready = match bootstrap.run() {
        Ok(ready) => ready,
        Err(e) => {
            tracing::error!(state = %bootstrap.state(), "startup aborted: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shown_path = config_path
        .as_deref()
        .map_or_else(|| "<none>".to_string(), |p| p.display().to_string());
    tracing::info!(
        source = config_source,
        path = %shown_path,
        "resolved startup configuration path"
    );
    tracing::info!(
        folder = %ready.folder,
        database = %ready.handle.db_path().display(),
        schema_version = ready.migrations.to_version,
        applied = ready.migrations.applied,
        entities = ready.mapping.entities.len(),
        namespace = %ready.mapping.namespace_hint,
        "storage ready"
    );
    for (key, value) in ready.mapping.flags.as_properties() {
        tracing::debug!(key, value = %value, "mapping session flag");
    }

    ready.handle.shutdown();
    tracing::info!("sudofx storage bootstrap finished");
    ExitCode::SUCCESS
}
