//! Credential fingerprint stored inside the database.
//!
//! SQLite has no user accounts, so the database records a salted SHA-256
//! digest of the credential the first time it is migrated. Every later
//! migration run and every pooled connection must present a credential that
//! reproduces the digest. The password itself is never written here.

use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use sudofx_types::Credential;

pub(crate) const CREDENTIAL_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS _sudofx_credential (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    username TEXT NOT NULL,
    salt TEXT NOT NULL,
    digest TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Outcome of comparing a credential against the stored fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthCheck {
    /// The credential reproduces the stored digest.
    Verified,
    /// A fingerprint exists and does not match.
    Rejected {
        /// Username recorded when the database was created.
        expected_username: String,
    },
    /// The database has no fingerprint yet.
    Missing,
}

fn fingerprint(salt: &str, credential: &Credential) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(credential.username.as_bytes());
    hasher.update(b":");
    hasher.update(credential.password.as_bytes());
    hex::encode(hasher.finalize())
}

fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )
}

/// Compares `credential` with the stored fingerprint without writing.
pub(crate) fn check(conn: &Connection, credential: &Credential) -> rusqlite::Result<AuthCheck> {
    if !table_exists(conn, "_sudofx_credential")? {
        return Ok(AuthCheck::Missing);
    }

    let stored: Option<(String, String, String)> = conn
        .query_row(
            "SELECT username, salt, digest FROM _sudofx_credential WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    Ok(match stored {
        None => AuthCheck::Missing,
        Some((username, salt, digest)) => {
            if fingerprint(&salt, credential) == digest {
                AuthCheck::Verified
            } else {
                AuthCheck::Rejected {
                    expected_username: username,
                }
            }
        }
    })
}

/// Verifies `credential`, recording it as the database's fingerprint when
/// none exists yet. Must run inside the caller's transaction.
pub(crate) fn record_or_verify(
    conn: &Connection,
    credential: &Credential,
) -> rusqlite::Result<AuthCheck> {
    conn.execute_batch(CREDENTIAL_TABLE_DDL)?;

    match check(conn, credential)? {
        AuthCheck::Missing => {
            let mut salt = [0u8; 16];
            OsRng.fill_bytes(&mut salt);
            let salt = hex::encode(salt);
            conn.execute(
                "INSERT INTO _sudofx_credential (id, username, salt, digest) VALUES (1, ?1, ?2, ?3)",
                params![credential.username, salt, fingerprint(&salt, credential)],
            )?;
            tracing::info!(username = %credential.username, "recorded database credential fingerprint");
            Ok(AuthCheck::Verified)
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_credential_is_recorded_then_verified() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let credential = Credential::new("sudofx_a", "pw-one");

        assert_eq!(check(&conn, &credential).expect("check"), AuthCheck::Missing);
        assert_eq!(
            record_or_verify(&conn, &credential).expect("record"),
            AuthCheck::Verified
        );
        assert_eq!(check(&conn, &credential).expect("check"), AuthCheck::Verified);
    }

    #[test]
    fn different_password_is_rejected() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        record_or_verify(&conn, &Credential::new("sudofx_a", "pw-one")).expect("record");

        let outcome = record_or_verify(&conn, &Credential::new("sudofx_a", "pw-two"))
            .expect("verify should run");
        assert_eq!(
            outcome,
            AuthCheck::Rejected {
                expected_username: "sudofx_a".to_string()
            }
        );
    }

    #[test]
    fn password_is_not_stored() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        record_or_verify(&conn, &Credential::new("sudofx_a", "very-secret-pw")).expect("record");

        let leaked: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM _sudofx_credential
                 WHERE username LIKE '%very-secret-pw%'
                    OR salt LIKE '%very-secret-pw%'
                    OR digest LIKE '%very-secret-pw%')",
                [],
                |row| row.get(0),
            )
            .expect("should query credential table");
        assert!(!leaked, "password must not be stored in the database");
    }

    #[test]
    fn salts_differ_between_databases() {
        let credential = Credential::new("sudofx_a", "pw");
        let salt_of = |conn: &Connection| -> String {
            conn.query_row("SELECT salt FROM _sudofx_credential", [], |row| row.get(0))
                .expect("should read salt")
        };

        let a = Connection::open_in_memory().expect("should open in-memory db");
        let b = Connection::open_in_memory().expect("should open in-memory db");
        record_or_verify(&a, &credential).expect("record");
        record_or_verify(&b, &credential).expect("record");
        assert_ne!(salt_of(&a), salt_of(&b));
    }
}
