//! # scene-sync CLI
//!
//! ## Usage
//!
//! ```bash
//! scene-sync --config ./config/scene-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scene-sync init` | Create the scene store schema |
//! | `scene-sync sync <SINK>...` | Read the catalog and write the window to sinks |
//! | `scene-sync last-synced` | Print the newest day present in the bucket |
//! | `scene-sync reindex` | Push every stored scene to the search index |
//!
//! Sinks: `s3`, `es`, `disk`, `thumbs`, `db`.
//!
//! ## Examples
//!
//! ```bash
//! # Last three days to the bucket and the index
//! scene-sync sync s3 es
//!
//! # A fixed window to local files, from a cached download
//! scene-sync sync disk --start 2015-01-01 --end 2015-01-31 --download --folder ./meta
//!
//! # Resume from whatever the bucket already has
//! scene-sync sync s3 es db --since-last-sync -v
//! ```

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scene_sync::config::{self, Config};
use scene_sync::dispatch::StopHandle;
use scene_sync::ingest::{self, SyncOptions};
use scene_sync::migrate;
use scene_sync::parse::{format_date, parse_date};
use scene_sync::probe::{self, LocalDirLister, PrefixLister, RootedLister};
use scene_sync::progress::ProgressMode;
use scene_sync::reindex;
use scene_sync::s3::S3Client;
use scene_sync::sinks::{self, SinkKind};
use scene_sync::source::FetchMode;

/// Sync the Landsat 8 scene catalog into S3, a search index, a SQLite
/// scene store, or local files.
#[derive(Parser)]
#[command(name = "scene-sync", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is absent.
    #[arg(long, global = true, default_value = "./config/scene-sync.toml")]
    config: PathBuf,

    /// Log at info level (default: errors only). `RUST_LOG` overrides.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the scene store schema. Idempotent.
    Init,

    /// Read the catalog and write every scene in the window to the sinks.
    ///
    /// Without `--start`/`--end` the window covers the last few days
    /// (`dispatch.default_days`).
    Sync {
        /// Sinks to write to, applied in this order for every scene.
        #[arg(required = true, value_enum)]
        sinks: Vec<SinkKind>,

        /// First acquisition date to include (YYYY-MM-DD).
        #[arg(long, value_parser = parse_cli_date)]
        start: Option<NaiveDate>,

        /// Last acquisition date to include (YYYY-MM-DD).
        #[arg(long, value_parser = parse_cli_date)]
        end: Option<NaiveDate>,

        /// Start from the newest day already in the bucket (or the disk
        /// folder when `s3` is not selected).
        #[arg(long, conflicts_with_all = ["start", "end"])]
        since_last_sync: bool,

        /// Download the catalog to a local cache instead of streaming it.
        #[arg(long)]
        download: bool,

        /// Where `--download` keeps the catalog.
        #[arg(long)]
        download_folder: Option<PathBuf>,

        /// Root of the `<year>/<month>/<day>` destination layout.
        #[arg(long)]
        folder: Option<String>,

        /// Worker count. 1 runs sinks sequentially in catalog order.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Search index base URL.
        #[arg(long)]
        index_url: Option<String>,

        /// Progress on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Print the newest `<year>/<month>/<day>` present in the bucket.
    LastSynced {
        /// Probe the disk folder instead of the S3 bucket.
        #[arg(long)]
        disk: bool,

        /// Destination folder. Bucket keys are probed under the same prefix.
        #[arg(long)]
        folder: Option<String>,
    },

    /// Push every scene in the scene store to the search index.
    Reindex {
        /// Scenes per `_bulk` request.
        #[arg(long, default_value_t = reindex::DEFAULT_BATCH_SIZE)]
        batch_size: i64,

        #[arg(long)]
        index_url: Option<String>,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

fn parse_cli_date(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("'{}' is not a YYYY-MM-DD date", s))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "error" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg = config::load_or_default(&cli.config)?;
    let today = chrono::Local::now().date_naive();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg.sinks.kv).await?;
            println!(
                "Scene store initialized at {}",
                cfg.sinks.kv.path.display()
            );
        }
        Commands::Sync {
            sinks: kinds,
            start,
            end,
            since_last_sync,
            download,
            download_folder,
            folder,
            concurrency,
            index_url,
            progress,
        } => {
            if let Some(dir) = download_folder {
                cfg.catalog.cache_dir = dir;
            }
            if let Some(folder) = folder {
                cfg.sinks.disk.folder = folder;
            }
            if let Some(n) = concurrency {
                cfg.dispatch.concurrency = n;
            }
            if let Some(url) = index_url {
                cfg.sinks.index.url = url;
            }
            config::validate(&cfg)?;

            // Credentials and local stores are checked before any network I/O.
            let writers = sinks::build_sinks(&kinds, &cfg).await?;

            let last_synced = if since_last_sync {
                let found = probe_last_synced(&cfg, kinds.contains(&SinkKind::S3), today).await?;
                match found {
                    Some(day) => info!(day = %format_date(day), "resuming from last synced day"),
                    None => info!("no synced day found, using default window"),
                }
                found
            } else {
                None
            };

            let window = ingest::resolve_window(
                start,
                end,
                last_synced,
                today,
                cfg.dispatch.default_days,
            );
            let mut options = SyncOptions::from_config(&cfg, window);
            if download {
                options.mode = FetchMode::Download;
            }

            let stop = StopHandle::new();
            let stop_on_signal = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, finishing in-flight scenes");
                    stop_on_signal.stop();
                }
            });

            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let report = ingest::run_sync(&cfg, writers, &options, reporter.as_ref(), &stop).await?;
            report.print();
        }
        Commands::LastSynced { disk, folder } => {
            if let Some(folder) = folder {
                cfg.sinks.disk.folder = folder;
            }
            match probe_last_synced(&cfg, !disk, today).await? {
                Some(day) => println!("{}", format_date(day)),
                None => println!("not found"),
            }
        }
        Commands::Reindex {
            batch_size,
            index_url,
            progress,
        } => {
            if let Some(url) = index_url {
                cfg.sinks.index.url = url;
            }
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            reindex::run_reindex(&cfg, batch_size, reporter.as_ref()).await?;
        }
    }

    Ok(())
}

async fn probe_last_synced(
    cfg: &Config,
    use_bucket: bool,
    today: NaiveDate,
) -> Result<Option<NaiveDate>> {
    let lister: Box<dyn PrefixLister> = if use_bucket {
        Box::new(RootedLister::new(
            S3Client::from_env(&cfg.sinks.s3)?,
            &cfg.sinks.disk.folder,
        ))
    } else {
        Box::new(LocalDirLister::new(&cfg.sinks.disk.folder))
    };
    probe::find_last_synced(lister.as_ref(), today, cfg.probe.floor_year).await
}
