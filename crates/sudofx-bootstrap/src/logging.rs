//! Logging collaborator: subscriber setup and the startup banner.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// The first stage of the bootstrap: make logging available and announce
/// that the application is starting.
pub trait StartupAnnouncer: Send + Sync {
    /// Called exactly once, before any other stage.
    fn announce_startup(&self);
}

/// Installs the global `tracing` subscriber described by `config`.
///
/// An invalid filter falls back to `info`. If a subscriber is already
/// installed (tests, embedding applications) this is a no-op.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed, keeping it");
    }
}

/// Default announcer: installs the subscriber and logs the entry message.
#[derive(Debug, Clone)]
pub struct TracingAnnouncer {
    app_name: String,
    logging: LoggingConfig,
}

impl TracingAnnouncer {
    /// Creates an announcer for `app_name` using `logging`.
    pub fn new(app_name: impl Into<String>, logging: LoggingConfig) -> Self {
        Self {
            app_name: app_name.into(),
            logging,
        }
    }
}

impl StartupAnnouncer for TracingAnnouncer {
    fn announce_startup(&self) {
        init_tracing(&self.logging);
        tracing::info!(
            app = %self.app_name,
            version = env!("CARGO_PKG_VERSION"),
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            "starting application"
        );
    }
}
