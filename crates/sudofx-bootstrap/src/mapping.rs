//! Settings handed to the mapping/session layer together with the handle.
//!
//! This crate does not interpret any of these values; it only carries them
//! from configuration to whoever builds sessions on top of the pool.

use serde::Serialize;
use sudofx_types::EntityDescriptor;

/// Session behavior flags for the mapping layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionFlags {
    /// Pretty-print generated SQL.
    pub format_sql: bool,
    /// Annotate generated SQL with comments.
    pub use_sql_comments: bool,
    /// Log generated SQL.
    pub show_sql: bool,
    /// Keep sessions open for the whole view rendering.
    pub open_in_view: bool,
    /// Commit every statement automatically.
    pub auto_commit: bool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            format_sql: true,
            use_sql_comments: true,
            show_sql: true,
            open_in_view: false,
            auto_commit: false,
        }
    }
}

impl SessionFlags {
    /// The flags as key/value properties, keyed by the property names
    /// Hibernate, Spring JPA, and Hikari use for them.
    pub fn as_properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("hibernate.format_sql", self.format_sql.to_string()),
            ("hibernate.use_sql_comments", self.use_sql_comments.to_string()),
            ("hibernate.show_sql", self.show_sql.to_string()),
            ("spring.jpa.open-in-view", self.open_in_view.to_string()),
            ("spring.datasource.hikari.auto-commit", self.auto_commit.to_string()),
        ]
    }
}

/// Everything the mapping layer needs besides the connection handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingSettings {
    /// Namespace the entity types live in.
    pub namespace_hint: String,
    /// Explicit entity list.
    pub entities: Vec<EntityDescriptor>,
    /// Session flags, passed through unchanged.
    pub flags: SessionFlags,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            namespace_hint: "sudofx::model".to_string(),
            entities: sudofx_db::ENTITIES.to_vec(),
            flags: SessionFlags::default(),
        }
    }
}
