//! Key-value persistence for the selection pool.
//!
//! The pool serializes its state into a single value; backends only need to
//! load, save and remove strings by key. SQLite is used for real deployments,
//! the in-memory backend for tests.

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

/// Abstract persistence interface.
#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn load(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Opens the SQLite store at `path`, creating parent directories.
pub fn pool_store_from_path(path: impl AsRef<Path>) -> anyhow::Result<Arc<dyn PoolStore>> {
    Ok(Arc::new(SqlitePoolStore::new(path)?))
}

#[derive(Debug, Default)]
pub struct MemoryPoolStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PoolStore for MemoryPoolStore {
    async fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

pub struct SqlitePoolStore {
    conn: Arc<StdMutex<rusqlite::Connection>>,
}

impl SqlitePoolStore {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = rusqlite::Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS feed_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
        })
    }

    fn conn(&self) -> Arc<StdMutex<rusqlite::Connection>> {
        self.conn.clone()
    }
}

#[async_trait]
impl PoolStore for SqlitePoolStore {
    async fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn();
        let key = key.to_string();
        spawn_blocking(move || -> anyhow::Result<Option<String>> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let value = conn
                .query_row(
                    "SELECT value FROM feed_state WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await?
    }

    async fn save(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let conn = self.conn();
        let key = key.to_string();
        let value = value.to_string();
        spawn_blocking(move || -> anyhow::Result<()> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute(
                "INSERT INTO feed_state (key, value, updated_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at_ms = excluded.updated_at_ms",
                rusqlite::params![key, value, chrono::Utc::now().timestamp_millis()],
            )?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let conn = self.conn();
        let key = key.to_string();
        spawn_blocking(move || -> anyhow::Result<()> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute("DELETE FROM feed_state WHERE key = ?1", [key])?;
            Ok(())
        })
        .await??;
        Ok(())
    }
}
