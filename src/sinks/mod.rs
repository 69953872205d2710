//! Storage sinks.
//!
//! Every sink implements [`SinkWriter`]: persist one record, given the
//! task's destination hint. The set of sinks is closed ([`SinkKind`]) and
//! resolved once, before the catalog is opened, so a bad sink name or a
//! missing credential fails the run before any network activity.
//!
//! | Kind | Store | Key |
//! |------|-------|-----|
//! | `s3` | S3 bucket, public-read JSON | `<destination>/<scene_id>.json` |
//! | `es` | search index document | `scene_id` |
//! | `db` | SQLite `scenes` table | `scene_id` |
//! | `disk` | local JSON file | `<destination>/<scene_id>.json` |
//! | `thumbs` | thumbnail bucket, then `db` | `<scene_id>.jpg` |
//!
//! All writes are upserts keyed by scene id, so re-ingesting a scene
//! overwrites it.

pub mod disk;
pub mod index;
pub mod kv;
pub mod s3;
pub mod thumbs;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Config;
use crate::models::CatalogRecord;
use crate::s3::S3Client;

pub use disk::DiskSink;
pub use index::IndexSink;
pub use kv::KvSink;
pub use s3::S3Sink;
pub use thumbs::ThumbsSink;

/// Persists one catalog record to one backing store.
///
/// Implementations receive a shared record and must not mutate it; a sink
/// that enriches the record works on its own copy.
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Short identifier used in logs and failure reports.
    fn name(&self) -> &str;

    async fn write(&self, destination: &str, record: &CatalogRecord) -> Result<()>;
}

/// The closed set of sinks selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum SinkKind {
    S3,
    Es,
    Disk,
    Thumbs,
    Db,
}

impl SinkKind {
    pub const ALL: [SinkKind; 5] = [
        SinkKind::S3,
        SinkKind::Es,
        SinkKind::Disk,
        SinkKind::Thumbs,
        SinkKind::Db,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::S3 => "s3",
            SinkKind::Es => "es",
            SinkKind::Disk => "disk",
            SinkKind::Thumbs => "thumbs",
            SinkKind::Db => "db",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match SinkKind::ALL.iter().find(|k| k.as_str() == s.trim()) {
            Some(kind) => Ok(*kind),
            None => bail!(
                "Unknown sink '{}'. Expected one of: {}",
                s,
                SinkKind::ALL
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

/// Instantiate the requested sinks in order. Duplicates are collapsed.
///
/// `db` and `thumbs` share one SQLite pool.
pub async fn build_sinks(kinds: &[SinkKind], config: &Config) -> Result<Vec<Arc<dyn SinkWriter>>> {
    let mut seen = Vec::new();
    let mut kv: Option<Arc<KvSink>> = None;
    let mut sinks: Vec<Arc<dyn SinkWriter>> = Vec::new();

    for kind in kinds {
        if seen.contains(kind) {
            continue;
        }
        seen.push(*kind);

        let sink: Arc<dyn SinkWriter> = match kind {
            SinkKind::S3 => Arc::new(S3Sink::new(S3Client::from_env(&config.sinks.s3)?)),
            SinkKind::Es => Arc::new(IndexSink::new(&config.sinks.index)?),
            SinkKind::Disk => Arc::new(DiskSink),
            SinkKind::Db => shared_kv(&mut kv, config).await?,
            SinkKind::Thumbs => {
                let bucket = S3Client::from_env(&config.sinks.thumbs.as_bucket())?;
                let store = shared_kv(&mut kv, config).await?;
                Arc::new(ThumbsSink::new(bucket, store)?)
            }
        };
        sinks.push(sink);
    }

    Ok(sinks)
}

async fn shared_kv(slot: &mut Option<Arc<KvSink>>, config: &Config) -> Result<Arc<KvSink>> {
    if let Some(kv) = slot {
        return Ok(kv.clone());
    }
    let kv = Arc::new(KvSink::open(&config.sinks.kv).await?);
    *slot = Some(kv.clone());
    Ok(kv)
}

/// Turn a destination hint into an object-key prefix: one leading `.` and
/// then one leading `/` are removed.
pub fn strip_destination(destination: &str) -> &str {
    let d = destination.strip_prefix('.').unwrap_or(destination);
    d.strip_prefix('/').unwrap_or(d)
}

/// `<prefix>/<name>`, or just `<name>` when the prefix is empty.
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}
