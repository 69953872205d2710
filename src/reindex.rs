//! Rebuild the search index from the key-value store.
//!
//! Pages through every stored scene in key order and pushes each page to the
//! index with one `_bulk` request. A failed request aborts the run; the
//! pages before it stay indexed, and rerunning is safe because documents are
//! keyed by scene id.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::models::SceneDocument;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::sinks::{IndexSink, KvSink};

pub const DEFAULT_BATCH_SIZE: i64 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub read: u64,
    pub indexed: u64,
    pub failed: u64,
}

pub async fn run_reindex(
    config: &Config,
    batch_size: i64,
    progress: &dyn SyncProgressReporter,
) -> Result<ReindexReport> {
    let kv = KvSink::open(&config.sinks.kv).await?;
    let index = IndexSink::new(&config.sinks.index)?;
    let report = reindex(&kv, &index, batch_size, progress).await?;

    println!("reindex");
    println!("  read: {}", report.read);
    println!("  indexed: {}", report.indexed);
    println!("  rejected: {}", report.failed);
    println!("ok");

    kv.pool().close().await;
    Ok(report)
}

pub async fn reindex(
    kv: &KvSink,
    index: &IndexSink,
    batch_size: i64,
    progress: &dyn SyncProgressReporter,
) -> Result<ReindexReport> {
    if batch_size < 1 {
        bail!("batch size must be >= 1");
    }

    let total = kv.count().await? as u64;
    let mut report = ReindexReport::default();
    let mut after: Option<String> = None;

    loop {
        let page = kv.page_after(after.as_deref(), batch_size).await?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.scene_id.clone());
        report.read += page.len() as u64;

        let docs: Vec<SceneDocument> = page
            .iter()
            .filter_map(|stored| {
                let doc = SceneDocument::from_record(&stored.record);
                if doc.is_none() {
                    warn!(scene_id = %stored.scene_id, "stored record has no sceneID, skipping");
                }
                doc
            })
            .collect();

        let outcome = index
            .bulk_index(&docs)
            .await
            .with_context(|| format!("Bulk request failed after {} items", report.indexed))?;
        report.indexed += outcome.indexed as u64;
        report.failed += outcome.failed as u64;

        progress.report(SyncProgressEvent::Reindexing {
            n: report.read,
            total,
        });
    }

    info!(read = report.read, indexed = report.indexed, "reindex finished");
    Ok(report)
}
