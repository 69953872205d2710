//! Bounded, failure-isolated fan-out of records to sinks.
//!
//! Each filtered-in record becomes one [`DispatchTask`]. A task runs every
//! configured sink against its record, in the configured order, inside one
//! tokio task; sinks for the same record never run in parallel.
//!
//! ```text
//!  submit() ──▶ [queue permits: queue_depth] ──▶ JoinSet
//!                                                  │
//!                     [worker permits: concurrency] ▼
//!                                     sink₁ → sink₂ → … → sinkₙ
//! ```
//!
//! - At most `concurrency` tasks execute sinks at once.
//! - At most `queue_depth` tasks exist (waiting or running). `submit` waits
//!   for a slot, so the catalog reader never runs far ahead of the sinks.
//! - A sink error is logged with the scene id and sink name, recorded as a
//!   [`SinkFailure`], and the remaining sinks for that record still run.
//!   A panicking sink is caught and recorded the same way.
//! - With `concurrency <= 1` tasks run inline in `submit`, strictly in
//!   catalog order.
//!
//! [`finish`](DispatchPool::finish) waits for every submitted task.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::models::DispatchTask;
use crate::sinks::SinkWriter;

/// One failed `(record, sink)` write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    pub scene_id: String,
    pub sink: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Tasks that ran to completion, with or without sink failures.
    pub completed: usize,
    pub failures: Vec<SinkFailure>,
}

/// Caller-level "stop accepting new work" switch.
///
/// Once set, the ingest loop stops pulling lines; tasks already submitted
/// are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type Sinks = Arc<[Arc<dyn SinkWriter>]>;

pub struct DispatchPool {
    sinks: Sinks,
    concurrency: usize,
    slots: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    tasks: JoinSet<Vec<SinkFailure>>,
    report: DispatchReport,
}

impl DispatchPool {
    /// `queue_depth` is raised to at least `concurrency`. Both are capped at
    /// [`Semaphore::MAX_PERMITS`].
    pub fn new(sinks: Vec<Arc<dyn SinkWriter>>, concurrency: usize, queue_depth: usize) -> Self {
        let concurrency = concurrency.clamp(1, Semaphore::MAX_PERMITS);
        let queue_depth = queue_depth.clamp(concurrency, Semaphore::MAX_PERMITS);
        Self {
            sinks: sinks.into(),
            concurrency,
            slots: Arc::new(Semaphore::new(queue_depth)),
            workers: Arc::new(Semaphore::new(concurrency)),
            tasks: JoinSet::new(),
            report: DispatchReport::default(),
        }
    }

    pub fn is_sequential(&self) -> bool {
        self.concurrency == 1
    }

    /// Enqueue one task, waiting while the queue is full.
    pub async fn submit(&mut self, task: DispatchTask) {
        if self.is_sequential() {
            let failures = run_task(&self.sinks, &task).await;
            self.record(failures);
            return;
        }

        while let Some(joined) = self.tasks.try_join_next() {
            self.collect(joined);
        }

        // Only closed when the pool is dropped, which cannot happen while
        // `self` is borrowed.
        let Ok(slot) = self.slots.clone().acquire_owned().await else {
            return;
        };
        let workers = self.workers.clone();
        let sinks = self.sinks.clone();

        self.tasks.spawn(async move {
            let _slot = slot;
            let Ok(_worker) = workers.acquire_owned().await else {
                return Vec::new();
            };
            run_task(&sinks, &task).await
        });
    }

    /// Wait for every submitted task and return the totals.
    pub async fn finish(mut self) -> DispatchReport {
        while let Some(joined) = self.tasks.join_next().await {
            self.collect(joined);
        }
        self.report
    }

    fn collect(&mut self, joined: Result<Vec<SinkFailure>, tokio::task::JoinError>) {
        match joined {
            Ok(failures) => self.record(failures),
            Err(e) => error!(error = %e, "dispatch task aborted"),
        }
    }

    fn record(&mut self, failures: Vec<SinkFailure>) {
        self.report.completed += 1;
        self.report.failures.extend(failures);
    }
}

/// Run every sink for one record, in order, isolating failures.
async fn run_task(sinks: &[Arc<dyn SinkWriter>], task: &DispatchTask) -> Vec<SinkFailure> {
    let mut failures = Vec::new();
    for sink in sinks {
        let outcome = AssertUnwindSafe(sink.write(&task.destination, &task.record))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow!("sink panicked: {}", panic_message(&*panic))));
        match outcome {
            Ok(()) => debug!(scene_id = %task.scene_id, sink = sink.name(), "written"),
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(scene_id = %task.scene_id, sink = sink.name(), error = %reason, "sink write failed");
                failures.push(SinkFailure {
                    scene_id: task.scene_id.clone(),
                    sink: sink.name().to_string(),
                    reason,
                });
            }
        }
    }
    failures
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
