//! SQLite-backed [`SqlConnection`] for subquery filters.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, Result as SqliteResult};

use crate::query::repository::{ExternalError, SqlConnection};

/// Runs subquery filters against a SQLite database.
pub struct SqliteSqlConnection {
    conn: Connection,
}

impl SqliteSqlConnection {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Runs a batch of statements, e.g. to create and populate lookup tables.
    pub fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        self.conn.execute_batch(sql)
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn first_column(&self, sql: &str) -> SqliteResult<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            // NULL never equals an attribute value, so it is dropped here.
            let value = match row.get_ref(0)? {
                ValueRef::Null => continue,
                ValueRef::Integer(i) => i.to_string(),
                ValueRef::Real(f) => f.to_string(),
                ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
                ValueRef::Blob(blob) => String::from_utf8_lossy(blob).into_owned(),
            };
            values.push(value);
        }
        Ok(values)
    }
}

impl SqlConnection for SqliteSqlConnection {
    fn query_single_column(&self, sql: &str) -> Result<Vec<String>, ExternalError> {
        self.first_column(sql)
            .map_err(|err| ExternalError::new(err.to_string()))
    }
}
