use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::SinkWriter;
use crate::models::{CatalogRecord, SceneDocument};

/// Writes `<destination>/<scene_id>.json` on the local filesystem.
pub struct DiskSink;

impl DiskSink {
    pub fn file_path(destination: &str, scene_id: &str) -> PathBuf {
        Path::new(destination).join(format!("{}.json", scene_id))
    }
}

#[async_trait]
impl SinkWriter for DiskSink {
    fn name(&self) -> &str {
        "disk"
    }

    async fn write(&self, destination: &str, record: &CatalogRecord) -> Result<()> {
        let doc = SceneDocument::from_record(record).context("record has no sceneID")?;
        if !is_plain_file_stem(&doc.scene_id) {
            bail!("scene id '{}' is not usable as a file name", doc.scene_id);
        }

        tokio::fs::create_dir_all(destination)
            .await
            .with_context(|| format!("Failed to create directory {}", destination))?;

        let path = Self::file_path(destination, &doc.scene_id);
        let body = serde_json::to_vec(&doc)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// No separators or NULs, so `<id>.json` stays inside the destination.
fn is_plain_file_stem(scene_id: &str) -> bool {
    !scene_id.is_empty() && !scene_id.contains(['/', '\\', '\0'])
}
