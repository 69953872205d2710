//! Sync and reindex progress reporting.
//!
//! Emitted on **stderr** so stdout stays parseable for scripts. The reporter
//! is injected into the pipeline rather than looked up globally.

use serde_json::{json, Value};
use std::io::Write;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Catalog is being opened (`mode` is `stream` or `download`).
    Fetching { url: String, mode: String },
    /// Catalog lines read so far and how many passed the window.
    Reading { lines: u64, included: u64 },
    /// Reindex: n items pushed out of total.
    Reindexing { n: u64, total: u64 },
}

impl SyncProgressEvent {
    /// One line for a terminal, e.g. `sync  reading  12,345 lines  67 included`.
    pub fn human(&self) -> String {
        match self {
            Self::Fetching { url, mode } => format!("sync  fetching ({})  {}", mode, url),
            Self::Reading { lines, included } => format!(
                "sync  reading  {} lines  {} included",
                group_thousands(*lines),
                group_thousands(*included)
            ),
            Self::Reindexing { n, total } => format!(
                "reindex  {} / {} items",
                group_thousands(*n),
                group_thousands(*total)
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut obj = match self {
            Self::Fetching { url, mode } => json!({ "phase": "fetching", "mode": mode, "url": url }),
            Self::Reading { lines, included } => {
                json!({ "phase": "reading", "lines": lines, "included": included })
            }
            Self::Reindexing { n, total } => json!({ "phase": "reindexing", "n": n, "total": total }),
        };
        obj["event"] = json!("progress");
        obj
    }
}

pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly lines on stderr.
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", event.human());
        let _ = err.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", event.to_json());
        let _ = err.flush();
    }
}

pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `--progress` values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
