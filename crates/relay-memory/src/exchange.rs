use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use crate::error::MemoryError;
use crate::types::{Exchange, ExchangeTag};

/// Append-only log of request/response pairs.
///
/// Thread-safe: wraps one SQLite connection in a Mutex. Rows are only ever
/// inserted; nothing here updates or deletes them.
pub struct ExchangeLog {
    db: Mutex<Connection>,
}

impl ExchangeLog {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// In-memory log with the schema applied. Used by tests and dry runs.
    pub fn in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        crate::db::init_db(&conn)?;
        Ok(Self::new(conn))
    }

    /// Append one exchange and return its row id.
    pub fn record(
        &self,
        tag: ExchangeTag,
        user: &str,
        request: &str,
        response: &str,
    ) -> Result<i64, MemoryError> {
        let db = self.db.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO exchanges (tag, user, request, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![tag.as_str(), user, request, response, now],
        )?;
        let id = db.last_insert_rowid();
        debug!(id, tag = %tag, user, "exchange recorded");
        Ok(id)
    }

    /// The `limit` most recent exchanges for `tag` and `user`, newest first.
    pub fn recent(
        &self,
        tag: ExchangeTag,
        user: &str,
        limit: usize,
    ) -> Result<Vec<Exchange>, MemoryError> {
        let db = self.db.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let mut stmt = db.prepare(
            "SELECT id, tag, user, request, response, created_at
             FROM exchanges
             WHERE tag = ?1 AND user = ?2
             ORDER BY id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![tag.as_str(), user, limit as i64],
            row_to_exchange,
        )?;
        let exchanges = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(exchanges)
    }

    /// Total number of rows, all tags included.
    pub fn count(&self) -> Result<i64, MemoryError> {
        let db = self.db.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let n = db.query_row("SELECT COUNT(*) FROM exchanges", [], |row| row.get(0))?;
        Ok(n)
    }
}

fn row_to_exchange(row: &rusqlite::Row<'_>) -> rusqlite::Result<Exchange> {
    Ok(Exchange {
        id: row.get(0)?,
        tag: row.get(1)?,
        user: row.get(2)?,
        request: row.get(3)?,
        response: row.get(4)?,
        created_at: row.get(5)?,
    })
}
