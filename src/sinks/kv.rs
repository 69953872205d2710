//! Key-value sink backed by the SQLite `scenes` table.
//!
//! Stores the raw catalog record (not the normalized document) as JSON,
//! one row per scene id. `reindex` reads it back page by page.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::SinkWriter;
use crate::config::KvSinkConfig;
use crate::db;
use crate::migrate;
use crate::models::CatalogRecord;

/// One stored item.
#[derive(Debug, Clone)]
pub struct StoredScene {
    pub scene_id: String,
    pub record: CatalogRecord,
}

pub struct KvSink {
    pool: SqlitePool,
}

impl KvSink {
    /// Connect and make sure the schema exists.
    pub async fn open(config: &KvSinkConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn upsert(&self, scene_id: &str, record: &CatalogRecord) -> Result<()> {
        let body = serde_json::to_string(record)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO scenes (scene_id, body, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(scene_id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(scene_id)
        .bind(&body)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert scene {}", scene_id))?;
        Ok(())
    }

    pub async fn get(&self, scene_id: &str) -> Result<Option<StoredScene>> {
        let row = sqlx::query("SELECT scene_id, body FROM scenes WHERE scene_id = ?")
            .bind(scene_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode_row(&r)).transpose()
    }

    /// Up to `limit` items with `scene_id` greater than `after`, in key order.
    pub async fn page_after(&self, after: Option<&str>, limit: i64) -> Result<Vec<StoredScene>> {
        let rows = sqlx::query(
            "SELECT scene_id, body FROM scenes WHERE scene_id > ? ORDER BY scene_id LIMIT ?",
        )
        .bind(after.unwrap_or(""))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scenes")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredScene> {
    let scene_id: String = row.get("scene_id");
    let body: String = row.get("body");
    let record = serde_json::from_str(&body)
        .with_context(|| format!("Stored body for {} is not valid JSON", scene_id))?;
    Ok(StoredScene { scene_id, record })
}

#[async_trait]
impl SinkWriter for KvSink {
    fn name(&self) -> &str {
        "db"
    }

    async fn write(&self, _destination: &str, record: &CatalogRecord) -> Result<()> {
        let scene_id = record.scene_id().context("record has no sceneID")?;
        self.upsert(&scene_id, record).await
    }
}
