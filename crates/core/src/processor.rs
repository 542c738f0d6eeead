use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;

use crate::{
    batch::Batch, error::ProcessError, latency::LatencyLog, source::Query, stats::Stat,
    stats::StatPool,
};

/// Run-wide stop flag raised by the first fatal error.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-worker view of the run's shared resources, handed to `init`.
#[derive(Clone)]
pub struct WorkerContext {
    /// Worker number in `0..workers`.
    pub index: usize,
    pub abort: AbortSignal,
    pub latency_log: Option<Arc<LatencyLog>>,
    pub stats: Arc<StatPool>,
    /// Echo query responses to stderr as indented JSON.
    pub print_responses: bool,
}

impl WorkerContext {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            abort: AbortSignal::default(),
            latency_log: None,
            stats: Arc::new(StatPool::default()),
            print_responses: false,
        }
    }
}

/// Outcome of one `process_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchReport {
    /// Round trip of the accepted attempt; zero for dry runs.
    pub latency: Duration,
    pub metrics: u64,
    pub rows: u64,
    /// Rejections before the batch was accepted.
    pub retries: u32,
}

impl BatchReport {
    pub fn dry_run(batch: &Batch) -> Self {
        Self {
            latency: Duration::ZERO,
            metrics: batch.metrics(),
            rows: batch.rows(),
            retries: 0,
        }
    }
}

/// Write path of a backend, one instance per worker.
pub trait LoadProcessor: Send {
    /// Called once before the worker receives any batch.
    fn init(&mut self, ctx: &WorkerContext) -> Result<()>;

    /// Send `batch`, or only count it when `do_load` is false.
    fn process_batch(&mut self, batch: Batch, do_load: bool) -> Result<BatchReport, ProcessError>;

    /// Called once after the worker's channel is drained.
    fn close(&mut self, _do_load: bool) {}
}

/// Read path of a backend, one instance per worker.
pub trait QueryProcessor: Send {
    fn init(&mut self, ctx: &WorkerContext) -> Result<()>;

    /// Run one query; a rejected query is an error, never retried.
    fn process_query(&mut self, query: &Query, is_warm: bool) -> Result<Vec<Stat>, ProcessError>;
}

/// Endpoint a worker binds to: `urls[worker % urls.len()]`.
pub fn select_endpoint(urls: &[String], worker: usize) -> Option<&str> {
    if urls.is_empty() {
        return None;
    }
    Some(urls[worker % urls.len()].as_str())
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
