use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::{KeyValueStore, StoreError};

/// SQLite-backed store: one `kv` table, one row per key.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) `questkeep.sqlite` inside `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::open_file(&dir.join("questkeep.sqlite"))
    }

    pub fn open_file(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).map_err(unavailable)?;
        // Pragmas tuned for a server process sharing the file with other writers
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(unavailable)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(unavailable)?;
        // Busy timeout (default 5000ms; override with QUESTKEEP_SQLITE_BUSY_MS)
        let busy_ms: u64 = std::env::var("QUESTKEEP_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))
            .map_err(unavailable)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL,
              updated TEXT NOT NULL
            );
            "#,
        )
        .map_err(unavailable)
    }

    fn conn(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(&self.db_path)?;
        let busy_ms: u64 = std::env::var("QUESTKEEP_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn get_blocking(&self, key: &str) -> Result<String, StoreError> {
        let conn = self.conn().map_err(|e| StoreError::read(key, e))?;
        let value: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key=? LIMIT 1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| StoreError::read(key, e))?;
        Ok(value.unwrap_or_default())
    }

    pub fn set_blocking(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn().map_err(|e| StoreError::write(key, e))?;
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        conn.execute(
            "INSERT INTO kv(key,value,updated) VALUES(?,?,?) \
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated=excluded.updated",
            params![key, value, now],
        )
        .map_err(|e| StoreError::write(key, e))?;
        Ok(())
    }

    /// Keys starting with `prefix`, ascending.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn().map_err(|e| StoreError::read(prefix, e))?;
        let mut stmt = conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, ?) = ? ORDER BY key ASC")
            .map_err(|e| StoreError::read(prefix, e))?;
        let mut rows = stmt
            .query(params![prefix.chars().count() as i64, prefix])
            .map_err(|e| StoreError::read(prefix, e))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| StoreError::read(prefix, e))? {
            out.push(row.get(0).map_err(|e| StoreError::read(prefix, e))?);
        }
        Ok(out)
    }
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

// rusqlite work is offloaded from the async executor.
#[async_trait::async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<String, StoreError> {
        let store = self.clone();
        let k = key.to_string();
        tokio::task::spawn_blocking(move || store.get_blocking(&k))
            .await
            .map_err(|e| StoreError::read(key, format!("join error: {}", e)))?
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let store = self.clone();
        let k = key.to_string();
        let v = value.to_string();
        tokio::task::spawn_blocking(move || store.set_blocking(&k, &v))
            .await
            .map_err(|e| StoreError::write(key, format!("join error: {}", e)))?
    }
}
