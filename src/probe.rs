//! Last-synced probe.
//!
//! Sinks that lay objects out under `<year>/<month>/<day>/` (the S3 bucket
//! and the disk folder) can answer "what is the newest day we have?". The
//! probe walks backward one calendar day at a time from `today` and returns
//! the first day whose prefix holds anything, giving up once it passes the
//! floor year.
//!
//! This is a linear scan. In normal operation the last synced day is a few
//! steps back, so a handful of one-key listings beats anything cleverer.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use std::path::PathBuf;
use tracing::debug;

use crate::sinks::{join_key, strip_destination};

/// Answers whether any object exists under a key prefix.
#[async_trait]
pub trait PrefixLister: Send + Sync {
    async fn has_objects(&self, prefix: &str) -> Result<bool>;
}

/// `<year>/<month>/<day>/`, unpadded.
///
/// The trailing slash keeps `2016/3/1/` from matching `2016/3/12/`.
pub fn day_prefix(date: NaiveDate) -> String {
    format!("{}/{}/{}/", date.year(), date.month(), date.day())
}

pub async fn find_last_synced(
    lister: &dyn PrefixLister,
    today: NaiveDate,
    floor_year: i32,
) -> Result<Option<NaiveDate>> {
    let mut day = today;
    while day.year() >= floor_year {
        let prefix = day_prefix(day);
        debug!(prefix = %prefix, "checking");
        if lister.has_objects(&prefix).await? {
            return Ok(Some(day));
        }
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    Ok(None)
}

/// Looks for day prefixes under the destination folder, where the `s3` sink
/// puts them (`meta/2016/3/4/` for folder `meta`, `2016/3/4/` for `.`).
pub struct RootedLister<L> {
    inner: L,
    root: String,
}

impl<L: PrefixLister> RootedLister<L> {
    pub fn new(inner: L, folder: &str) -> Self {
        Self {
            inner,
            root: strip_destination(folder).to_string(),
        }
    }
}

#[async_trait]
impl<L: PrefixLister> PrefixLister for RootedLister<L> {
    async fn has_objects(&self, prefix: &str) -> Result<bool> {
        self.inner.has_objects(&join_key(&self.root, prefix)).await
    }
}

/// Prefix lister over a local directory tree (the disk sink's layout).
pub struct LocalDirLister {
    root: PathBuf,
}

impl LocalDirLister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl PrefixLister for LocalDirLister {
    async fn has_objects(&self, prefix: &str) -> Result<bool> {
        let dir = self.root.join(prefix.trim_end_matches('/'));
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(entries.next_entry().await?.is_some())
    }
}
