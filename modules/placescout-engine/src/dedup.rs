//! Cross-worker deduplication: atomic "insert if absent" over a key set.
//!
//! Two implementations — an in-memory set for single runs, and a SQLite
//! table for dedup that survives restarts. Both fail open: a storage error
//! reports the key as unseen rather than over-filtering results.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::warn;

#[async_trait]
pub trait Deduper: Send + Sync {
    /// Returns true when the key was unseen (and is now recorded). An empty
    /// key is always unseen and never stored.
    async fn add_if_absent(&self, key: &str) -> bool;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryDeduper {
    seen: Mutex<HashSet<String>>,
}

impl InMemoryDeduper {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Deduper for InMemoryDeduper {
    async fn add_if_absent(&self, key: &str) -> bool {
        if key.is_empty() {
            return true;
        }
        self.seen.lock().expect("dedup lock poisoned").insert(key.to_string())
    }
}

// ---------------------------------------------------------------------------
// Persistent (SQLite)
// ---------------------------------------------------------------------------

/// Single-writer embedded store. Writes are serialized under a process-level
/// mutex; conflicts resolve via INSERT OR IGNORE with rows-affected == 1
/// meaning inserted.
pub struct SqliteDeduper {
    pool: SqlitePool,
    write_lock: tokio::sync::Mutex<()>,
}

impl SqliteDeduper {
    /// Open (or create) the database at `path` and ensure the table exists.
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool, write_lock: tokio::sync::Mutex::new(()) })
    }

    /// In-memory database, for tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool, write_lock: tokio::sync::Mutex::new(()) })
    }

    async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dedup_keys (
                key TEXT PRIMARY KEY,
                created_at INT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Deduper for SqliteDeduper {
    async fn add_if_absent(&self, key: &str) -> bool {
        if key.is_empty() {
            return true;
        }

        let _guard = self.write_lock.lock().await;

        let result = sqlx::query("INSERT OR IGNORE INTO dedup_keys(key, created_at) VALUES(?, ?)")
            .bind(key)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await;

        match result {
            Ok(r) => r.rows_affected() == 1,
            Err(e) => {
                // Fail open so a transient store failure never filters results.
                warn!(error = %e, "dedup insert failed, treating key as unseen");
                true
            }
        }
    }
}
