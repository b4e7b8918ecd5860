//! Startup pipeline for the SudoFX embedded database.
//!
//! Before any application logic runs, [`Bootstrap::run`] announces startup,
//! resolves the data folder, makes sure a database credential exists, brings
//! the schema up to date, and opens the pooled [`sudofx_db::DbHandle`]. Each
//! stage needs what the previous one produced, so the stages form a strict
//! chain and the first failure aborts the whole startup.
//!
//! ```rust,ignore
//! let config = sudofx_bootstrap::config::load_config(None)?;
//! let ready = sudofx_bootstrap::Bootstrap::from_config(&config)?.run()?;
//! ready.handle.with_transaction(|conn| { /* ... */ Ok::<_, HandleError>(()) })?;
//! ```

pub mod config;
pub mod error;
pub mod folder;
pub mod logging;
pub mod mapping;
pub mod orchestrator;

pub use error::{BootstrapError, CredentialError};
pub use orchestrator::{Bootstrap, BootstrapState, Bootstrapped};
