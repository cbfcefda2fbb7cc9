use std::path::Path;

use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Durable key-value store backing the document caches. Entries are add-only
/// in normal operation; the single-statement upsert keeps each key atomic
/// under concurrent writers.
#[derive(Debug, Clone)]
pub struct KvStore {
    pool: SqlitePool,
}

impl KvStore {
    pub async fn open(path: &str) -> Result<Self> {
        ensure_parent_dir(path)?;
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open cache database at '{path}'"))?;

        sqlx::query("CREATE TABLE IF NOT EXISTS entries (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&pool)
            .await
            .with_context(|| format!("failed to run cache migration for '{path}'"))?;

        Ok(Self { pool })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM entries WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("cache read failed")?;
        Ok(row.map(|row| row.get::<String, _>(0)))
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO entries (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("cache write failed")?;
        Ok(())
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM entries")
            .execute(&self.pool)
            .await
            .context("cache clear failed")?;
        Ok(result.rows_affected())
    }
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create directory for cache database: {}",
                parent.display()
            )
        })?;
    }
    Ok(())
}
