//! Entities backed by the migrated schema.

use sudofx_types::EntityDescriptor;

/// Every mapped entity and its table, in dependency order.
pub const ENTITIES: &[EntityDescriptor] = &[
    EntityDescriptor {
        name: "PlayerLanguage",
        table: "player_language",
    },
    EntityDescriptor {
        name: "Background",
        table: "background",
    },
    EntityDescriptor {
        name: "Menu",
        table: "menu",
    },
    EntityDescriptor {
        name: "Player",
        table: "player",
    },
    EntityDescriptor {
        name: "GameLevel",
        table: "game_level",
    },
    EntityDescriptor {
        name: "Grid",
        table: "grid",
    },
    EntityDescriptor {
        name: "Game",
        table: "game",
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use rusqlite::Connection;
    use sudofx_types::Credential;

    #[test]
    fn every_entity_has_a_migrated_table() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&conn, &Credential::new("sudofx_test", "pw"))
            .expect("migrations should succeed");

        for entity in ENTITIES {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                    [entity.table],
                    |row| row.get(0),
                )
                .expect("should query sqlite_master");
            assert!(exists, "{} table '{}' is missing", entity.name, entity.table);
        }
    }
}
