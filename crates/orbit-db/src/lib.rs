pub mod migrations;
pub mod models;
pub mod queries;
pub mod store;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use store::{ChatStore, NewChat, NewMessage};

/// SQLite-backed store. Opened once at process start and closed at shutdown;
/// every call after `close` fails.
pub struct Database {
    conn: Mutex<Option<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let db = Self::init(conn)?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let conn = guard.as_ref().ok_or_else(|| anyhow!("database closed"))?;
        f(conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let conn = guard.as_mut().ok_or_else(|| anyhow!("database closed"))?;
        f(conn)
    }

    /// Flush and release the connection. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| anyhow!("failed to close database: {}", e))?;
            info!("Database closed");
        }
        Ok(())
    }
}
