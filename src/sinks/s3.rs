use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{join_key, strip_destination, SinkWriter};
use crate::models::{CatalogRecord, SceneDocument};
use crate::s3::S3Client;

/// Writes each [`SceneDocument`] as a public-read JSON object.
pub struct S3Sink {
    client: S3Client,
}

impl S3Sink {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    pub fn object_key(destination: &str, scene_id: &str) -> String {
        join_key(strip_destination(destination), &format!("{}.json", scene_id))
    }
}

#[async_trait]
impl SinkWriter for S3Sink {
    fn name(&self) -> &str {
        "s3"
    }

    async fn write(&self, destination: &str, record: &CatalogRecord) -> Result<()> {
        let doc = SceneDocument::from_record(record).context("record has no sceneID")?;
        let key = Self::object_key(destination, &doc.scene_id);
        let body = serde_json::to_vec(&doc)?;

        self.client
            .put_object(&key, body, "application/json", true)
            .await?;
        tracing::debug!(scene_id = %doc.scene_id, bucket = self.client.bucket(), key = %key, "object written");
        Ok(())
    }
}
