//! Search-index sink.
//!
//! Talks to an Elasticsearch-compatible HTTP API. Documents are upserted at
//! `PUT <url>/<index>/_doc/<scene_id>`. A 400 response means the index
//! rejected the document shape (usually the footprint polygon); the write is
//! retried once with `data_geometry` set to null, so the scene is still
//! searchable by its other fields.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

use super::SinkWriter;
use crate::config::IndexSinkConfig;
use crate::error::IndexError;
use crate::models::{CatalogRecord, SceneDocument};
use crate::s3::uri_encode;

pub struct IndexSink {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

/// Result of one `_bulk` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub indexed: usize,
    pub failed: usize,
}

impl IndexSink {
    pub fn new(config: &IndexSinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
        })
    }

    /// The scene id is percent-encoded so it stays a single path segment.
    pub fn document_url(&self, scene_id: &str) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, uri_encode(scene_id))
    }

    pub async fn put_document(&self, doc: &SceneDocument) -> Result<(), IndexError> {
        if doc.scene_id == "." || doc.scene_id == ".." {
            return Err(IndexError::InvalidId(doc.scene_id.clone()));
        }
        let resp = self
            .client
            .put(self.document_url(&doc.scene_id))
            .json(doc)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        let message = error_reason(&body);
        if status == reqwest::StatusCode::BAD_REQUEST {
            Err(IndexError::Validation {
                scene_id: doc.scene_id.clone(),
                message,
            })
        } else {
            Err(IndexError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Index a batch through the `_bulk` API.
    ///
    /// A transport or HTTP failure fails the whole batch; per-item
    /// rejections are logged and counted.
    pub async fn bulk_index(&self, docs: &[SceneDocument]) -> Result<BulkOutcome> {
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let mut body = String::new();
        for doc in docs {
            let action = serde_json::json!({
                "index": { "_index": self.index, "_id": doc.scene_id }
            });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(doc)?);
            body.push('\n');
        }

        let resp = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(IndexError::from)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(IndexError::Status {
                status: status.as_u16(),
                message: error_reason(&text),
            }
            .into());
        }

        let json: serde_json::Value = resp.json().await.context("Invalid _bulk response")?;
        let mut failed = 0;
        if json["errors"].as_bool().unwrap_or(false) {
            for item in json["items"].as_array().into_iter().flatten() {
                let op = &item["index"];
                if !op["error"].is_null() {
                    failed += 1;
                    warn!(
                        scene_id = op["_id"].as_str().unwrap_or_default(),
                        error = %op["error"],
                        "bulk item rejected"
                    );
                }
            }
        }

        Ok(BulkOutcome {
            indexed: docs.len().saturating_sub(failed),
            failed,
        })
    }
}

/// Pull `error.reason` (or `error.type`) out of an error body, falling back
/// to the raw text.
fn error_reason(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let err = &json["error"];
        if let Some(reason) = err["reason"].as_str().or_else(|| err["type"].as_str()) {
            return reason.to_string();
        }
        if let Some(s) = err.as_str() {
            return s.to_string();
        }
    }
    body.chars().take(500).collect()
}

#[async_trait]
impl SinkWriter for IndexSink {
    fn name(&self) -> &str {
        "es"
    }

    async fn write(&self, _destination: &str, record: &CatalogRecord) -> Result<()> {
        let doc = SceneDocument::from_record(record).context("record has no sceneID")?;

        match self.put_document(&doc).await {
            Ok(()) => Ok(()),
            Err(IndexError::Validation { scene_id, message }) => {
                warn!(%scene_id, %message, "index rejected document, retrying without geometry");
                self.put_document(&doc.without_geometry()).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_url_trims_trailing_slash() {
        let sink = IndexSink::new(&IndexSinkConfig {
            url: "http://localhost:9200/".to_string(),
            ..IndexSinkConfig::default()
        })
        .unwrap();
        assert_eq!(
            sink.document_url("LC8"),
            "http://localhost:9200/sat-api/_doc/LC8"
        );
    }

    #[test]
    fn document_url_keeps_scene_id_in_one_segment() {
        let sink = IndexSink::new(&IndexSinkConfig::default()).unwrap();
        let url = sink.document_url("../../_all/x y");
        assert!(
            url.ends_with("/sat-api/_doc/..%2F..%2F_all%2Fx%20y"),
            "url: {}",
            url
        );
    }

    #[tokio::test]
    async fn dot_ids_are_rejected_before_sending() {
        // Nothing listens here; a request would fail with a transport error.
        let sink = IndexSink::new(&IndexSinkConfig {
            url: "http://127.0.0.1:1".to_string(),
            ..IndexSinkConfig::default()
        })
        .unwrap();
        let record: CatalogRecord = [(
            "sceneID".to_string(),
            crate::models::FieldValue::Text("..".to_string()),
        )]
        .into_iter()
        .collect();
        let doc = SceneDocument::from_record(&record).unwrap();

        let err = sink.put_document(&doc).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidId(ref id) if id == ".."));
    }

    #[test]
    fn error_reason_prefers_structured_reason() {
        let body = r#"{"error":{"type":"mapper_parsing_exception","reason":"failed to parse field [data_geometry]"},"status":400}"#;
        assert_eq!(error_reason(body), "failed to parse field [data_geometry]");
        assert_eq!(
            error_reason(r#"{"error":{"type":"illegal_argument_exception"}}"#),
            "illegal_argument_exception"
        );
        assert_eq!(error_reason("gateway timeout"), "gateway timeout");
    }
}
