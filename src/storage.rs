use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use std::path::Path;

// Keys of the three independently persisted records
pub const THREADS_KEY: &str = "findex-chat-threads";
pub const ACTIVE_THREAD_KEY: &str = "findex-active-thread";
pub const SETTINGS_KEY: &str = "findex-settings";

const MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS kv_records (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL -- JSON document
);
";

/// Durable string-keyed storage backing the thread and settings stores.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Reads a JSON record. A missing key yields `None`.
pub async fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse stored record '{}'", key))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Reads a JSON record for a store that must start regardless. Read and
/// parse failures are logged and treated as a missing record.
pub async fn load_record<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    match load_json(store, key).await {
        Ok(value) => value,
        Err(e) => {
            log::error!("Ignoring unreadable record '{}', using defaults: {:?}", key, e);
            None
        }
    }
}

pub async fn save_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)
        .with_context(|| format!("Failed to serialize record '{}'", key))?;
    store.set(key, &raw).await
}

/// Writes a record, logging instead of returning failures. In-memory state is
/// already updated by the time this runs.
pub async fn persist_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) {
    if let Err(e) = save_json(store, key, value).await {
        log::error!("Failed to persist '{}': {:?}", key, e);
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file at `db_path` and runs migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {}", db_url);

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(&db_url)
                .await
                .context("Failed to create database")?;
        }

        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database; a single connection so every query sees the same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        log::info!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run database migrations")?;
        log::info!("Database migrations completed.");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        log::debug!("Reading record '{}'", key);
        sqlx::query_scalar::<_, String>("SELECT value FROM kv_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read record '{}'", key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        log::debug!("Writing record '{}' ({} bytes)", key, value.len());
        sqlx::query(
            r#"
            INSERT INTO kv_records (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write record '{}'", key))?;
        Ok(())
    }
}
