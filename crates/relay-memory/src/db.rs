use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Result};

/// Wait this long for a competing writer before failing with SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Open (or create) the exchange database at `path` with WAL journaling.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise exchange tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_exchanges_table(conn)
}

fn create_exchanges_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS exchanges (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            tag         TEXT NOT NULL,
            user        TEXT NOT NULL,
            request     TEXT NOT NULL,
            response    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_exchanges_tag_user
            ON exchanges(tag, user, id DESC);",
    )
}
