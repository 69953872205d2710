use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::KvSinkConfig;
use crate::db;

/// Create the scene store schema. Idempotent.
pub async fn run_migrations(config: &KvSinkConfig) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // One row per scene: the full record as JSON, last write wins.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scenes (
            scene_id TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scenes_updated_at ON scenes(updated_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
