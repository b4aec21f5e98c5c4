//! Out-of-band store access
//!
//! The service never returns verification or reset tokens over HTTP. The
//! bridge reads them straight from the service's SQLite file so a scenario can
//! follow the link a user would have received by email.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::common::config::TokenTable;
use crate::common::{Error, Result};

/// Lookup of a single pending token by account id
pub trait TokenSource: Send + Sync {
    /// Return the token stored for `key`, or [`Error::MissingExternalState`]
    fn fetch_token(&self, table: &TokenTable, key: i64) -> Result<String>;
}

/// Reads tokens from the service's SQLite store
///
/// Every lookup opens a read-only connection and closes it before returning,
/// so nothing is cached across scenarios and the service keeps sole write
/// access to its file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenSource for SqliteStore {
    fn fetch_token(&self, table: &TokenTable, key: i64) -> Result<String> {
        let sql = lookup_sql(table)?;

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let token: Option<String> = conn
            .query_row(&sql, [key], |row| row.get(0))
            .optional()?;

        tracing::debug!(
            table = %table.table,
            key,
            found = token.is_some(),
            "Store lookup"
        );

        token.ok_or_else(|| Error::MissingExternalState {
            table: table.table.clone(),
            key,
        })
    }
}

/// Build the lookup statement. Names come from configuration and cannot be
/// bound as parameters, so they are restricted to plain identifiers.
fn lookup_sql(table: &TokenTable) -> Result<String> {
    for name in [&table.table, &table.key_column, &table.token_column] {
        check_identifier(name)?;
    }
    Ok(format!(
        "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
        table.token_column, table.table, table.key_column
    ))
}

fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verification() -> TokenTable {
        TokenTable::new("verifications", "user_id", "verification_token")
    }

    fn seeded_store(dir: &Path) -> SqliteStore {
        let path = dir.join("store.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE verifications (user_id INTEGER, verification_token TEXT);
            INSERT INTO verifications VALUES (1, 'token-for-one');
            "#,
        )
        .unwrap();
        SqliteStore::new(path)
    }

    #[test]
    fn test_fetch_existing_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let token = store.fetch_token(&verification(), 1).unwrap();
        assert_eq!(token, "token-for-one");
    }

    #[test]
    fn test_missing_row_is_missing_external_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let err = store.fetch_token(&verification(), 2).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingExternalState { ref table, key: 2 } if table == "verifications"
        ));
    }

    #[test]
    fn test_missing_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("absent.sqlite"));

        assert!(matches!(
            store.fetch_token(&verification(), 1),
            Err(Error::Store(_))
        ));
    }

    #[test]
    fn test_store_stays_writable_after_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());
        store.fetch_token(&verification(), 1).unwrap();

        let conn = Connection::open(store.path()).unwrap();
        conn.execute("DELETE FROM verifications WHERE user_id = 1", [])
            .unwrap();

        assert!(matches!(
            store.fetch_token(&verification(), 1),
            Err(Error::MissingExternalState { .. })
        ));
    }

    #[test]
    fn test_rejects_non_identifier_names() {
        let table = TokenTable::new("verifications; DROP TABLE users", "user_id", "token");
        assert!(matches!(
            lookup_sql(&table),
            Err(Error::InvalidIdentifier(_))
        ));
        assert!(check_identifier("").is_err());
        assert!(check_identifier("1table").is_err());
        assert!(check_identifier("_pending_resets2").is_ok());
    }
}
