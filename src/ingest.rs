//! Sync pipeline orchestration.
//!
//! ```text
//! SourceFetcher ─▶ parse_row ─▶ decide ─▶ DispatchPool ─▶ sinks
//!   (lines)        (drop bad)   (window)   (bounded)
//! ```
//!
//! The header must parse or the run aborts before anything is dispatched.
//! Bad rows are dropped with a warning. The first row older than the window
//! start ends the read. Sink failures never fail the run; they are counted
//! in the [`SyncReport`].

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatch::{DispatchPool, SinkFailure, StopHandle};
use crate::filter::{decide, DateWindow, Decision};
use crate::models::DispatchTask;
use crate::parse::{format_date, parse_header, parse_row};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::sinks::SinkWriter;
use crate::source::{CatalogLines, FetchMode, SourceFetcher};

const PROGRESS_EVERY: u64 = 10_000;

/// Per-run settings, resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub window: DateWindow,
    pub mode: FetchMode,
    /// Root of every destination hint.
    pub folder: String,
    pub concurrency: usize,
    pub queue_depth: usize,
}

impl SyncOptions {
    pub fn from_config(config: &Config, window: DateWindow) -> Self {
        Self {
            window,
            mode: FetchMode::Stream,
            folder: config.sinks.disk.folder.clone(),
            concurrency: config.dispatch.concurrency,
            queue_depth: config.dispatch.effective_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Data lines read, header excluded.
    pub lines_read: u64,
    pub included: u64,
    pub skipped: u64,
    /// Rows without a usable `sceneID` or `acquisitionDate`.
    pub dropped: u64,
    /// The read ended at the first row older than the window.
    pub stopped_early: bool,
    /// The stop switch ended the read.
    pub interrupted: bool,
    pub completed: usize,
    pub failures: Vec<SinkFailure>,
}

impl SyncReport {
    pub fn failures_by_sink(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for f in &self.failures {
            *counts.entry(f.sink.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn print(&self) {
        println!("sync");
        println!("  lines read: {}", self.lines_read);
        println!("  included: {}", self.included);
        println!("  skipped (after window end): {}", self.skipped);
        println!("  dropped (unparseable): {}", self.dropped);
        println!("  dispatched: {}", self.completed);
        if self.stopped_early {
            println!("  stopped at window start");
        }
        if self.interrupted {
            println!("  interrupted");
        }
        if self.failures.is_empty() {
            println!("  sink failures: 0");
        } else {
            println!("  sink failures: {}", self.failures.len());
            for (sink, n) in self.failures_by_sink() {
                println!("    {}: {}", sink, n);
            }
            for f in &self.failures {
                println!("    {} [{}] {}", f.scene_id, f.sink, f.reason);
            }
        }
        println!("ok");
    }
}

/// Pick the run's window.
///
/// Explicit bounds win. Otherwise the window opens at the last synced day
/// when one is known, else `default_days` before `today`.
pub fn resolve_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    last_synced: Option<NaiveDate>,
    today: NaiveDate,
    default_days: u32,
) -> DateWindow {
    if start.is_some() || end.is_some() {
        return DateWindow::new(start, end);
    }
    match last_synced {
        Some(day) => DateWindow::new(Some(day), None),
        None => DateWindow::recent(today, default_days),
    }
}

/// `<folder>/<year>/<month>/<day>`, unpadded, matching the probe layout.
pub fn destination_for(folder: &str, date: NaiveDate) -> String {
    Path::new(folder)
        .join(format!("{}/{}/{}", date.year(), date.month(), date.day()))
        .to_string_lossy()
        .into_owned()
}

/// Fetch the catalog and run it through the pipeline.
pub async fn run_sync(
    config: &Config,
    sinks: Vec<Arc<dyn SinkWriter>>,
    options: &SyncOptions,
    progress: &dyn SyncProgressReporter,
    stop: &StopHandle,
) -> Result<SyncReport> {
    let fetcher = SourceFetcher::new(&config.catalog)?;
    progress.report(SyncProgressEvent::Fetching {
        url: config.catalog.url.clone(),
        mode: match options.mode {
            FetchMode::Stream => "stream".to_string(),
            FetchMode::Download => "download".to_string(),
        },
    });
    let lines = fetcher
        .open(options.mode)
        .await
        .context("Failed to obtain catalog")?;

    run_pipeline(lines, sinks, options, progress, stop).await
}

/// Run an already opened catalog through parse, filter and dispatch.
pub async fn run_pipeline(
    mut lines: CatalogLines,
    sinks: Vec<Arc<dyn SinkWriter>>,
    options: &SyncOptions,
    progress: &dyn SyncProgressReporter,
    stop: &StopHandle,
) -> Result<SyncReport> {
    let header_line = lines
        .next_line()
        .await?
        .context("Catalog is empty: no header row")?;
    let header = parse_header(&header_line).context("Malformed catalog header")?;

    info!(
        start = ?options.window.start.map(format_date),
        end = ?options.window.end.map(format_date),
        concurrency = options.concurrency,
        sinks = sinks.len(),
        "sync starting"
    );
    if options.window.is_unbounded() {
        warn!("no date window, reading the whole catalog");
    }

    let mut pool = DispatchPool::new(sinks, options.concurrency, options.queue_depth);
    let mut report = SyncReport::default();
    let mut read_error = None;

    loop {
        if stop.is_stopped() {
            info!("stop requested, draining in-flight tasks");
            report.interrupted = true;
            break;
        }

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        report.lines_read += 1;
        if report.lines_read % PROGRESS_EVERY == 0 {
            progress.report(SyncProgressEvent::Reading {
                lines: report.lines_read,
                included: report.included,
            });
        }

        let row = match parse_row(&header, &line) {
            Ok(row) => row,
            Err(e) => {
                warn!(line = report.lines_read, error = %e, "dropping row");
                report.dropped += 1;
                continue;
            }
        };

        match decide(row.acquisition_date, &options.window) {
            Decision::Stop => {
                info!(scene_id = %row.scene_id, date = %row.acquisition_date, "reached window start");
                report.stopped_early = true;
                break;
            }
            Decision::Skip => report.skipped += 1,
            Decision::Include => {
                report.included += 1;
                let task = DispatchTask {
                    destination: destination_for(&options.folder, row.acquisition_date),
                    scene_id: row.scene_id,
                    acquisition_date: row.acquisition_date,
                    record: Arc::new(row.record),
                };
                pool.submit(task).await;
            }
        }
    }

    // Tasks dispatched before a read failure still finish.
    let dispatch = pool.finish().await;
    report.completed = dispatch.completed;
    report.failures = dispatch.failures;

    progress.report(SyncProgressEvent::Reading {
        lines: report.lines_read,
        included: report.included,
    });

    if let Some(e) = read_error {
        return Err(e.context(format!(
            "Catalog read failed after {} lines ({} records dispatched)",
            report.lines_read, report.completed
        )));
    }

    info!(
        lines = report.lines_read,
        included = report.included,
        failures = report.failures.len(),
        "sync finished"
    );
    Ok(report)
}
