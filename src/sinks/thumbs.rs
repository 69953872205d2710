//! Thumbnail sink.
//!
//! Makes sure `<scene_id>.jpg` exists in the thumbnail bucket, copying it
//! from the record's `browseURL` when it does not, then stores the record,
//! enriched with the thumbnail's public URL, through the key-value sink.
//!
//! A failed copy is logged and does not fail the write: the record is still
//! enriched and stored, pointing at the URL the thumbnail will have once a
//! later run succeeds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{KvSink, SinkWriter};
use crate::models::{CatalogRecord, FieldValue};
use crate::s3::S3Client;

pub struct ThumbsSink {
    http: reqwest::Client,
    bucket: S3Client,
    kv: Arc<KvSink>,
}

impl ThumbsSink {
    pub fn new(bucket: S3Client, kv: Arc<KvSink>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, bucket, kv })
    }

    async fn exists(&self, url: &str) -> Result<bool> {
        let resp = self.http.head(url).send().await?;
        Ok(resp.status() == reqwest::StatusCode::OK)
    }

    async fn copy_from(&self, source: &str, key: &str) -> Result<()> {
        let resp = self
            .http
            .get(source)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", source))?
            .error_for_status()?;
        let bytes = resp.bytes().await?;
        self.bucket
            .put_object(key, bytes.to_vec(), "image/jpeg", true)
            .await
    }

    /// Upload the thumbnail if missing. Returns its public URL.
    async fn ensure_thumbnail(&self, scene_id: &str, record: &CatalogRecord) -> String {
        let key = format!("{}.jpg", scene_id);
        let url = self.bucket.public_url(&key);

        match self.exists(&url).await {
            Ok(true) => {
                debug!(scene_id, "thumbnail already present");
                return url;
            }
            Ok(false) => {}
            Err(e) => warn!(scene_id, error = %e, "thumbnail check failed"),
        }

        match record.get_str("browseURL") {
            Some(source) => {
                if let Err(e) = self.copy_from(source, &key).await {
                    warn!(scene_id, error = %e, "thumbnail upload failed");
                }
            }
            None => warn!(scene_id, "record has no browseURL, thumbnail not uploaded"),
        }
        url
    }
}

#[async_trait]
impl SinkWriter for ThumbsSink {
    fn name(&self) -> &str {
        "thumbs"
    }

    async fn write(&self, destination: &str, record: &CatalogRecord) -> Result<()> {
        let scene_id = record.scene_id().context("record has no sceneID")?;
        let url = self.ensure_thumbnail(&scene_id, record).await;

        // The shared record stays untouched; later sinks see the catalog values.
        let mut enriched = record.clone();
        enriched.set("thumbnail", FieldValue::Text(url));
        self.kv.write(destination, &enriched).await
    }
}
