//! Catalog acquisition.
//!
//! Both modes hand the pipeline the same [`CatalogLines`] reader: the first
//! line is the header, every following line is one record.
//!
//! - **stream** reads the HTTP body chunk by chunk and never stores it.
//!   Each chunk must arrive within `chunk_timeout`; a stall or a dropped
//!   connection fails the reader, while tasks already dispatched from earlier
//!   lines are left to finish.
//! - **download** keeps a copy under `cache_dir`. A copy younger than
//!   `max_age` is reused without touching the network; otherwise the whole
//!   catalog is fetched to a `.part` file and renamed into place before any
//!   line is read, so a failed download never yields partial input.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tracing::{debug, info};

use crate::config::CatalogConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Stream,
    Download,
}

/// Opens the catalog in either [`FetchMode`].
pub struct SourceFetcher {
    client: reqwest::Client,
    url: String,
    cache_dir: PathBuf,
    max_age: Duration,
    chunk_timeout: Duration,
}

impl SourceFetcher {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(
                config
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| format!("scene-sync/{}", env!("CARGO_PKG_VERSION"))),
            )
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            cache_dir: config.cache_dir.clone(),
            max_age: Duration::from_secs(config.max_age_hours * 3600),
            chunk_timeout: Duration::from_secs(config.chunk_timeout_secs),
        })
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Local path of the cached catalog, named after the last URL segment.
    pub fn cache_path(&self) -> PathBuf {
        let name = self
            .url
            .split(['?', '#'])
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|s| !s.is_empty())
            .unwrap_or("catalog.csv");
        self.cache_dir.join(name)
    }

    pub async fn open(&self, mode: FetchMode) -> Result<CatalogLines> {
        match mode {
            FetchMode::Stream => self.open_stream().await,
            FetchMode::Download => self.open_download().await,
        }
    }

    async fn open_stream(&self) -> Result<CatalogLines> {
        info!(url = %self.url, "streaming catalog");
        let response = self.get_catalog().await?;
        Ok(CatalogLines {
            inner: LineSource::Http {
                response,
                buf: Vec::new(),
                done: false,
                chunk_timeout: self.chunk_timeout,
            },
        })
    }

    async fn open_download(&self) -> Result<CatalogLines> {
        let path = self.cache_path();
        if is_fresh(&path, self.max_age) {
            info!(path = %path.display(), "reusing cached catalog");
        } else {
            self.download_to(&path).await?;
        }
        CatalogLines::from_file(&path).await
    }

    async fn get_catalog(&self) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch catalog from {}", self.url))?;

        if !resp.status().is_success() {
            bail!("Catalog request failed (HTTP {}): {}", resp.status(), self.url);
        }
        Ok(resp)
    }

    async fn download_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create cache dir {}", parent.display()))?;
        }
        info!(url = %self.url, path = %path.display(), "downloading catalog");

        let mut resp = self.get_catalog().await?;
        let part = path.with_extension("part");
        let mut file = tokio::fs::File::create(&part)
            .await
            .with_context(|| format!("Failed to create {}", part.display()))?;

        let mut written = 0u64;
        loop {
            let chunk = tokio::time::timeout(self.chunk_timeout, resp.chunk())
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "Catalog download stalled: no data for {}s",
                        self.chunk_timeout.as_secs()
                    )
                })?
                .context("Catalog download interrupted")?;
            match chunk {
                Some(bytes) => {
                    file.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                None => break,
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part, path)
            .await
            .with_context(|| format!("Failed to move catalog into {}", path.display()))?;
        debug!(bytes = written, "catalog saved");
        Ok(())
    }
}

/// Whether `path` exists and was modified less than `max_age` ago.
pub fn is_fresh(path: &Path, max_age: Duration) -> bool {
    let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) else {
        return false;
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age < max_age,
        // mtime in the future
        Err(_) => true,
    }
}

/// Line reader over a streamed response, a cached file, or an in-memory list.
pub struct CatalogLines {
    inner: LineSource,
}

enum LineSource {
    Http {
        response: reqwest::Response,
        buf: Vec<u8>,
        done: bool,
        chunk_timeout: Duration,
    },
    File(Lines<BufReader<tokio::fs::File>>),
    Memory(std::vec::IntoIter<String>),
}

impl CatalogLines {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open catalog {}", path.display()))?;
        Ok(Self {
            inner: LineSource::File(BufReader::new(file).lines()),
        })
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        Self {
            inner: LineSource::Memory(lines.into_iter()),
        }
    }

    /// Next line without its terminator, or `None` at end of input.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        match &mut self.inner {
            LineSource::Memory(iter) => Ok(iter.next()),
            LineSource::File(lines) => {
                let line = lines.next_line().await.context("Failed to read catalog")?;
                Ok(line.map(strip_cr))
            }
            LineSource::Http {
                response,
                buf,
                done,
                chunk_timeout,
            } => loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    return Ok(Some(decode_line(&line[..line.len() - 1])));
                }
                if *done {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let line = std::mem::take(buf);
                    return Ok(Some(decode_line(&line)));
                }
                let chunk = tokio::time::timeout(*chunk_timeout, response.chunk())
                    .await
                    .map_err(|_| {
                        anyhow::anyhow!(
                            "Catalog stream stalled: no data for {}s",
                            chunk_timeout.as_secs()
                        )
                    })?
                    .context("Catalog stream interrupted")?;
                match chunk {
                    Some(bytes) => buf.extend_from_slice(&bytes),
                    None => *done = true,
                }
            },
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    strip_cr(String::from_utf8_lossy(bytes).into_owned())
}

fn strip_cr(mut line: String) -> String {
    if line.ends_with('\r') {
        line.pop();
    }
    line
}
