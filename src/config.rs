//! TOML configuration.
//!
//! Every section is optional; a missing file falls back to
//! [`Config::minimal`] so the tool runs from flags alone.
//!
//! ```toml
//! [catalog]
//! url = "https://landsat.usgs.gov/landsat/metadata_service/bulk_metadata_files/LANDSAT_8.csv"
//! cache_dir = "./data/catalog"
//! max_age_hours = 6
//!
//! [dispatch]
//! concurrency = 20
//!
//! [sinks.s3]
//! bucket = "landsat8-meta"
//! region = "us-east-1"
//!
//! [sinks.index]
//! url = "http://localhost:9200"
//! index = "sat-api"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CATALOG_URL: &str =
    "https://landsat.usgs.gov/landsat/metadata_service/bulk_metadata_files/LANDSAT_8.csv";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_url")]
    pub url: String,
    /// Where `download` mode keeps the catalog copy.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// A cached catalog younger than this is reused without a network call.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    /// Longest wait for the next chunk of a streamed catalog.
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
            cache_dir: default_cache_dir(),
            max_age_hours: default_max_age_hours(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            user_agent: None,
        }
    }
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}
fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("scene-sync")
}
fn default_max_age_hours() -> u64 {
    6
}
fn default_chunk_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Days back from today when no window is given.
    #[serde(default = "default_days")]
    pub default_days: u32,
    /// Pending-task high-water mark; defaults to twice the concurrency.
    #[serde(default)]
    pub queue_depth: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            default_days: default_days(),
            queue_depth: None,
        }
    }
}

impl DispatchConfig {
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth
            .unwrap_or_else(|| self.concurrency.max(1).saturating_mul(2))
            .max(1)
    }
}

/// Upper bound for `dispatch.concurrency`.
pub const MAX_CONCURRENCY: usize = 1024;
/// Upper bound for `dispatch.queue_depth`.
pub const MAX_QUEUE_DEPTH: usize = 65_536;

fn default_concurrency() -> usize {
    20
}
fn default_days() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SinksConfig {
    #[serde(default)]
    pub s3: S3SinkConfig,
    #[serde(default)]
    pub index: IndexSinkConfig,
    #[serde(default)]
    pub kv: KvSinkConfig,
    #[serde(default)]
    pub disk: DiskSinkConfig,
    #[serde(default)]
    pub thumbs: ThumbsSinkConfig,
}

/// Bucket coordinates shared by the metadata and thumbnail buckets.
#[derive(Debug, Deserialize, Clone)]
pub struct S3SinkConfig {
    #[serde(default = "default_meta_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for S3SinkConfig {
    fn default() -> Self {
        Self {
            bucket: default_meta_bucket(),
            region: default_region(),
            endpoint_url: None,
        }
    }
}

fn default_meta_bucket() -> String {
    std::env::var("BUCKETNAME").unwrap_or_else(|_| "landsat8-meta".to_string())
}
fn default_thumbs_bucket() -> String {
    std::env::var("THUMBS_BUCKETNAME").unwrap_or_else(|_| "ad-thumbnails".to_string())
}
fn default_region() -> String {
    std::env::var("AWS_DEFAULT_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexSinkConfig {
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_index_name")]
    pub index: String,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexSinkConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            index: default_index_name(),
            timeout_secs: default_index_timeout_secs(),
        }
    }
}

fn default_index_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_index_name() -> String {
    "sat-api".to_string()
}
fn default_index_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct KvSinkConfig {
    #[serde(default = "default_kv_path")]
    pub path: PathBuf,
}

impl Default for KvSinkConfig {
    fn default() -> Self {
        Self {
            path: default_kv_path(),
        }
    }
}

fn default_kv_path() -> PathBuf {
    PathBuf::from("./data/scenes.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiskSinkConfig {
    /// Root under which `<year>/<month>/<day>/` destinations are created.
    #[serde(default = "default_folder")]
    pub folder: String,
}

impl Default for DiskSinkConfig {
    fn default() -> Self {
        Self {
            folder: default_folder(),
        }
    }
}

fn default_folder() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThumbsSinkConfig {
    #[serde(default = "default_thumbs_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for ThumbsSinkConfig {
    fn default() -> Self {
        Self {
            bucket: default_thumbs_bucket(),
            region: default_region(),
            endpoint_url: None,
        }
    }
}

impl ThumbsSinkConfig {
    pub fn as_bucket(&self) -> S3SinkConfig {
        S3SinkConfig {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProbeConfig {
    /// The probe gives up once it walks past this year.
    #[serde(default = "default_floor_year")]
    pub floor_year: i32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            floor_year: default_floor_year(),
        }
    }
}

fn default_floor_year() -> i32 {
    2015
}

impl Config {
    /// All defaults; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

/// Load the config file, or defaults when `path` does not exist.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.catalog.url.trim().is_empty() {
        bail!("catalog.url must not be empty");
    }
    if config.catalog.max_age_hours == 0 {
        bail!("catalog.max_age_hours must be > 0");
    }
    if config.catalog.chunk_timeout_secs == 0 {
        bail!("catalog.chunk_timeout_secs must be > 0");
    }
    if config.dispatch.concurrency > MAX_CONCURRENCY {
        bail!(
            "dispatch.concurrency must be <= {} (got {})",
            MAX_CONCURRENCY,
            config.dispatch.concurrency
        );
    }
    match config.dispatch.queue_depth {
        Some(0) => bail!("dispatch.queue_depth must be >= 1"),
        Some(n) if n > MAX_QUEUE_DEPTH => {
            bail!("dispatch.queue_depth must be <= {} (got {})", MAX_QUEUE_DEPTH, n)
        }
        _ => {}
    }
    if config.sinks.index.index.trim().is_empty() {
        bail!("sinks.index.index must not be empty");
    }
    Ok(())
}
