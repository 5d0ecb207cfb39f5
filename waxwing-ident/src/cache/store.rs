//! SQLite persistence for the fingerprint cache
//!
//! Durable layer under the in-memory cache. Crash-safety is intentionally
//! weak: stale reads are acceptable, corruption must not propagate. Every
//! failure here is reported as an error for the caller to downgrade to a
//! warning; the pipeline never blocks on this store.

use crate::cache::CacheEntry;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use tracing::warn;
use waxwing_common::Result;

/// Durable key-value store for resolutions
#[derive(Debug, Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    /// Open (and create if missing) the store at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS identifications (
                fingerprint TEXT PRIMARY KEY,
                resolution TEXT NOT NULL,
                adapter_versions TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// In-memory store, used by tests
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePool::connect(":memory:").await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS identifications (
                fingerprint TEXT PRIMARY KEY,
                resolution TEXT NOT NULL,
                adapter_versions TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Load every readable entry
    ///
    /// Rows that fail to deserialize are skipped with a warning so one
    /// corrupt row never poisons the rest of the cache.
    pub async fn load_all(&self) -> Result<Vec<(String, CacheEntry)>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT fingerprint, resolution, adapter_versions, created_at FROM identifications",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (fingerprint, resolution_json, adapter_versions, created_at) in rows {
            let resolution = match serde_json::from_str(&resolution_json) {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        fingerprint = %fingerprint,
                        error = %e,
                        "skipping unreadable cache row"
                    );
                    continue;
                }
            };
            let created_at = created_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now());

            entries.push((
                fingerprint,
                CacheEntry {
                    resolution,
                    adapter_versions,
                    created_at,
                },
            ));
        }
        Ok(entries)
    }

    /// Insert or overwrite an entry (last write wins)
    pub async fn upsert(&self, fingerprint: &str, entry: &CacheEntry) -> Result<()> {
        let resolution_json = serde_json::to_string(&entry.resolution)
            .map_err(|e| waxwing_common::Error::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO identifications (fingerprint, resolution, adapter_versions, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (fingerprint) DO UPDATE SET
                resolution = excluded.resolution,
                adapter_versions = excluded.adapter_versions,
                created_at = excluded.created_at
            "#,
        )
        .bind(fingerprint)
        .bind(resolution_json)
        .bind(&entry.adapter_versions)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove an entry; absent keys are not an error
    pub async fn delete(&self, fingerprint: &str) -> Result<()> {
        sqlx::query("DELETE FROM identifications WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
