use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Error, Result, bail};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};

use crate::{
    batch::{Batch, BatchFactory},
    config::RunnerConfig,
    error::ProcessError,
    indexer::PointIndexer,
    latency::LatencyLog,
    processor::{AbortSignal, BatchReport, LoadProcessor, QueryProcessor, WorkerContext},
    source::{DataSource, Query, QuerySource},
    stats::{LatencyStats, LatencySummary, Stat, StatPool, StatsCollector},
    target::{Benchmark, DbCreator},
};

/// Totals of a completed load run.
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub workers: usize,
    pub batches: u64,
    pub rows: u64,
    pub metrics: u64,
    /// Rejected attempts that were retried.
    pub retries: u64,
    pub elapsed: Duration,
    pub batch_latency: LatencySummary,
}

impl LoadSummary {
    pub fn row_rate(&self) -> f64 {
        per_second(self.rows, self.elapsed)
    }

    pub fn metric_rate(&self) -> f64 {
        per_second(self.metrics, self.elapsed)
    }
}

/// Totals of a completed query run.
#[derive(Debug, Clone)]
pub struct QuerySummary {
    pub workers: usize,
    /// Queries taken off the input, prewarm runs not counted twice.
    pub executed: u64,
    /// Stats that survived burn-in and warm-up filtering.
    pub recorded: u64,
    pub elapsed: Duration,
    /// Overall latency first, then per label.
    pub latencies: Vec<(String, LatencySummary)>,
}

impl QuerySummary {
    pub fn query_rate(&self) -> f64 {
        per_second(self.executed, self.elapsed)
    }

    pub fn overall(&self) -> LatencySummary {
        self.latencies
            .first()
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }
}

fn per_second(n: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { n as f64 / secs } else { 0.0 }
}

/// Counters shared between load workers and the progress reporter.
#[derive(Default)]
struct Progress {
    rows: AtomicU64,
    metrics: AtomicU64,
}

impl Progress {
    fn record(&self, report: &BatchReport) {
        self.rows.fetch_add(report.rows, Ordering::Relaxed);
        self.metrics.fetch_add(report.metrics, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct WorkerTotals {
    batches: u64,
    rows: u64,
    metrics: u64,
    retries: u64,
    latency: LatencyStats,
}

impl WorkerTotals {
    fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.rows += report.rows;
        self.metrics += report.metrics;
        self.retries += u64::from(report.retries);
        // Dry runs report zero latency; keep them out of the histogram.
        if !report.latency.is_zero() {
            self.latency.record(report.latency);
        }
    }

    fn merge(&mut self, other: WorkerTotals) -> Result<()> {
        self.batches += other.batches;
        self.rows += other.rows;
        self.metrics += other.metrics;
        self.retries += other.retries;
        self.latency.merge(&other.latency)
    }
}

/// Owns the worker pool for one run.
pub struct BenchmarkRunner {
    config: RunnerConfig,
}

impl BenchmarkRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Load the benchmark's data source into the backend.
    ///
    /// Blocks until the input is exhausted (or `limit` is hit) and every
    /// dispatched batch completed. The first fatal worker error stops the run
    /// and is returned; no summary is produced for a failed run.
    pub fn run_load(&self, bench: &dyn Benchmark) -> Result<LoadSummary> {
        let cfg = &self.config;
        cfg.validate()?;

        if cfg.do_load && cfg.do_create_db {
            prepare_db(bench.db_creator(), &cfg.db_name)?;
        }

        let latency_log = open_latency_log(cfg)?;
        let abort = AbortSignal::default();
        let stats = Arc::new(StatPool::new(1));

        let mut processors = Vec::with_capacity(cfg.workers);
        for index in 0..cfg.workers {
            let mut processor = bench.processor();
            processor
                .init(&self.worker_context(index, &abort, &latency_log, &stats))
                .with_context(|| format!("failed to initialize load worker {index}"))?;
            processors.push(processor);
        }

        let mut source = bench.data_source()?;
        let factory = bench.batch_factory();
        let indexer = bench.point_indexer(cfg.workers);
        let progress = Progress::default();

        info!(
            "loading from {} with {} workers, batch size {}, {} dispatch{}",
            cfg.input(),
            cfg.workers,
            cfg.batch_size,
            if cfg.hash_workers { "partitioned" } else { "shared" },
            if cfg.do_load { "" } else { " (dry run)" },
        );

        let start = Instant::now();

        let totals = thread::scope(|s| -> Result<WorkerTotals> {
            let (routes, receivers) =
                dispatch_channels(cfg.workers, cfg.hash_workers, cfg.channel_capacity);

            let handles: Vec<_> = processors
                .into_iter()
                .zip(receivers)
                .enumerate()
                .map(|(index, (processor, rx))| {
                    let abort = abort.clone();
                    let progress = &progress;
                    s.spawn(move || load_worker(index, rx, processor, cfg.do_load, &abort, progress))
                })
                .collect();

            let (stop_tx, stop_rx) = channel::bounded::<()>(0);
            let reporter = cfg.reporting_period().map(|period| {
                let progress = &progress;
                s.spawn(move || report_progress(period, stop_rx, progress, start))
            });

            let scanned = scan(
                source.as_mut(),
                indexer.as_ref(),
                &factory,
                &routes,
                cfg,
                &abort,
            );
            if scanned.is_err() {
                abort.raise();
            }

            // Closing the routes lets workers drain and exit.
            drop(routes);

            let mut totals = WorkerTotals::default();
            let mut first_err: Option<Error> = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(worker)) => totals.merge(worker)?,
                    Ok(Err(e)) => {
                        first_err.get_or_insert(e);
                    }
                    Err(_) => {
                        first_err.get_or_insert(Error::msg("load worker panicked"));
                    }
                }
            }

            drop(stop_tx);
            if let Some(reporter) = reporter {
                let _ = reporter.join();
            }

            if let Some(e) = first_err {
                return Err(e);
            }
            let read = scanned?;
            debug!("reader finished after {read} records");

            Ok(totals)
        })?;

        let elapsed = start.elapsed();

        if let Some(log) = &latency_log {
            log.flush().context("failed to flush latencies file")?;
        }

        let summary = LoadSummary {
            workers: cfg.workers,
            batches: totals.batches,
            rows: totals.rows,
            metrics: totals.metrics,
            retries: totals.retries,
            elapsed,
            batch_latency: totals.latency.summary(),
        };

        info!(
            "loaded {} metrics in {:.3}sec with {} workers (mean rate {:.2} metrics/sec)",
            summary.metrics,
            elapsed.as_secs_f64(),
            summary.workers,
            summary.metric_rate()
        );
        info!(
            "loaded {} rows in {:.3}sec with {} workers (mean rate {:.2} rows/sec)",
            summary.rows,
            elapsed.as_secs_f64(),
            summary.workers,
            summary.row_rate()
        );

        Ok(summary)
    }

    /// Run every query from `source` on a pool of processors built by
    /// `make_processor`.
    ///
    /// Workers share one queue. A rejected query stops the run.
    pub fn run_queries<F>(
        &self,
        source: &mut dyn QuerySource,
        mut make_processor: F,
    ) -> Result<QuerySummary>
    where
        F: FnMut() -> Result<Box<dyn QueryProcessor>>,
    {
        let cfg = &self.config;
        cfg.validate()?;

        let latency_log = open_latency_log(cfg)?;
        let abort = AbortSignal::default();
        let pool = Arc::new(StatPool::default());

        let mut processors = Vec::with_capacity(cfg.workers);
        for index in 0..cfg.workers {
            let mut processor = make_processor()?;
            processor
                .init(&self.worker_context(index, &abort, &latency_log, &pool))
                .with_context(|| format!("failed to initialize query worker {index}"))?;
            processors.push(processor);
        }

        info!(
            "running queries from {} with {} workers{}",
            cfg.input(),
            cfg.workers,
            if cfg.prewarm_queries {
                ", prewarming each query"
            } else {
                ""
            },
        );

        let start = Instant::now();

        let (collector, executed) = thread::scope(|s| -> Result<(StatsCollector, u64)> {
            let (query_tx, query_rx) = channel::bounded::<Query>(cfg.channel_capacity);
            let (stat_tx, stat_rx) = channel::unbounded::<Stat>();

            let collector = {
                let pool = Arc::clone(&pool);
                s.spawn(move || {
                    let mut collector =
                        StatsCollector::new(pool, cfg.burn_in, cfg.prewarm_queries)
                            .with_print_interval(cfg.print_interval);
                    for stat in stat_rx.iter() {
                        collector.record(stat);
                    }
                    collector
                })
            };

            let handles: Vec<_> = processors
                .into_iter()
                .enumerate()
                .map(|(index, processor)| {
                    let rx = query_rx.clone();
                    let tx = stat_tx.clone();
                    let abort = abort.clone();
                    s.spawn(move || {
                        query_worker(index, rx, processor, tx, cfg.prewarm_queries, &abort)
                    })
                })
                .collect();
            drop(query_rx);
            drop(stat_tx);

            let fed = feed_queries(source, &query_tx, cfg.max_queries, &abort);
            if fed.is_err() {
                abort.raise();
            }
            drop(query_tx);

            let mut executed = 0;
            let mut first_err: Option<Error> = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(n)) => executed += n,
                    Ok(Err(e)) => {
                        first_err.get_or_insert(e);
                    }
                    Err(_) => {
                        first_err.get_or_insert(Error::msg("query worker panicked"));
                    }
                }
            }

            let collector = collector
                .join()
                .map_err(|_| Error::msg("stats collector panicked"))?;

            if let Some(e) = first_err {
                return Err(e);
            }
            let fed = fed?;
            debug!("reader finished after {fed} queries");

            Ok((collector, executed))
        })?;

        let elapsed = start.elapsed();

        if let Some(log) = &latency_log {
            log.flush().context("failed to flush latencies file")?;
        }

        let summary = QuerySummary {
            workers: cfg.workers,
            executed,
            recorded: collector.recorded(),
            elapsed,
            latencies: collector.summaries(),
        };

        info!(
            "run complete after {} queries with {} workers (overall query rate {:.2} queries/sec)",
            summary.executed,
            summary.workers,
            summary.query_rate()
        );

        Ok(summary)
    }

    fn worker_context(
        &self,
        index: usize,
        abort: &AbortSignal,
        latency_log: &Option<Arc<LatencyLog>>,
        stats: &Arc<StatPool>,
    ) -> WorkerContext {
        WorkerContext {
            index,
            abort: abort.clone(),
            latency_log: latency_log.clone(),
            stats: Arc::clone(stats),
            print_responses: self.config.print_responses,
        }
    }
}

fn open_latency_log(cfg: &RunnerConfig) -> Result<Option<Arc<LatencyLog>>> {
    cfg.latencies_file
        .as_ref()
        .map(|path| {
            LatencyLog::create(path)
                .map(Arc::new)
                .with_context(|| format!("cannot open latencies file {}", path.display()))
        })
        .transpose()
}

fn prepare_db(mut creator: Box<dyn DbCreator>, db_name: &str) -> Result<()> {
    creator.init().context("failed to initialize DB creator")?;

    if creator.db_exists(db_name)? {
        info!("removing existing database {db_name}");
        creator
            .remove_old_db(db_name)
            .with_context(|| format!("failed to remove database {db_name}"))?;
    }

    creator
        .create_db(db_name)
        .with_context(|| format!("failed to create database {db_name}"))
}

/// Shared mode: one channel every worker pulls from.
/// Partitioned mode: one private channel per worker.
fn dispatch_channels(
    workers: usize,
    partitioned: bool,
    capacity: usize,
) -> (Vec<Sender<Batch>>, Vec<Receiver<Batch>>) {
    if partitioned {
        (0..workers).map(|_| channel::bounded(capacity)).unzip()
    } else {
        let (tx, rx) = channel::bounded(capacity);
        (vec![tx], vec![rx; workers])
    }
}

/// Read records, fill batches and hand full ones to their route.
///
/// Stops early when the run is aborted or every receiver of a route is gone.
fn scan(
    source: &mut dyn DataSource,
    indexer: &dyn PointIndexer,
    factory: &BatchFactory,
    routes: &[Sender<Batch>],
    cfg: &RunnerConfig,
    abort: &AbortSignal,
) -> Result<u64> {
    let partitions = routes.len();
    let batch_size = cfg.batch_size as u64;
    let mut open: Vec<Option<Batch>> = (0..partitions).map(|_| None).collect();
    let mut read = 0u64;

    while !abort.is_raised() {
        if cfg.limit.is_some_and(|limit| read >= limit) {
            break;
        }
        let Some(record) = source.next_record()? else {
            break;
        };
        read += 1;

        let partition = if cfg.hash_workers {
            indexer.index(&record, partitions)
        } else {
            0
        };
        if partition >= partitions {
            bail!("point indexer returned partition {partition} for {partitions} workers");
        }

        let batch = open[partition].get_or_insert_with(|| factory.new_batch());
        batch.append(&record);

        if batch.rows() >= batch_size
            && let Some(full) = open[partition].take()
            && routes[partition].send(full).is_err()
        {
            break;
        }
    }

    if !abort.is_raised() {
        for (partition, batch) in open.into_iter().enumerate() {
            if let Some(batch) = batch
                && !batch.is_empty()
                && routes[partition].send(batch).is_err()
            {
                break;
            }
        }
    }

    Ok(read)
}

fn load_worker(
    index: usize,
    rx: Receiver<Batch>,
    mut processor: Box<dyn LoadProcessor>,
    do_load: bool,
    abort: &AbortSignal,
    progress: &Progress,
) -> Result<WorkerTotals> {
    let mut totals = WorkerTotals::default();

    for batch in rx.iter() {
        if abort.is_raised() {
            break;
        }

        let id = batch.id();
        match processor.process_batch(batch, do_load) {
            Ok(report) => {
                totals.record(&report);
                progress.record(&report);
            }
            Err(ProcessError::Aborted) => break,
            Err(e) => {
                abort.raise();
                processor.close(do_load);
                return Err(Error::new(e).context(format!("load worker {index} failed on batch {id}")));
            }
        }
    }

    processor.close(do_load);
    debug!(
        "load worker {index} done: {} batches, {} rows",
        totals.batches, totals.rows
    );

    Ok(totals)
}

fn feed_queries(
    source: &mut dyn QuerySource,
    tx: &Sender<Query>,
    limit: Option<u64>,
    abort: &AbortSignal,
) -> Result<u64> {
    let mut sent = 0u64;

    while !abort.is_raised() {
        if limit.is_some_and(|limit| sent >= limit) {
            break;
        }
        let Some(query) = source.next_query()? else {
            break;
        };
        if tx.send(query).is_err() {
            break;
        }
        sent += 1;
    }

    Ok(sent)
}

fn query_worker(
    index: usize,
    rx: Receiver<Query>,
    mut processor: Box<dyn QueryProcessor>,
    stats: Sender<Stat>,
    prewarm: bool,
    abort: &AbortSignal,
) -> Result<u64> {
    let runs: &[bool] = if prewarm { &[false, true] } else { &[false] };
    let mut executed = 0u64;

    for query in rx.iter() {
        if abort.is_raised() {
            break;
        }

        for &is_warm in runs {
            match processor.process_query(&query, is_warm) {
                Ok(batch) => {
                    for stat in batch {
                        // Only fails once the collector is gone, i.e. never
                        // while workers are alive.
                        let _ = stats.send(stat);
                    }
                }
                Err(ProcessError::Aborted) => return Ok(executed),
                Err(e) => {
                    abort.raise();
                    return Err(Error::new(e).context(format!(
                        "query worker {index} failed on query {} ({})",
                        query.id, query.label
                    )));
                }
            }
        }

        executed += 1;
    }

    Ok(executed)
}

/// Log cumulative totals and the rate over the last period until `stop`
/// disconnects.
fn report_progress(period: Duration, stop: Receiver<()>, progress: &Progress, start: Instant) {
    let mut last = start;
    let mut last_rows = 0;
    let mut last_metrics = 0;

    loop {
        match stop.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                let rows = progress.rows.load(Ordering::Relaxed);
                let metrics = progress.metrics.load(Ordering::Relaxed);
                let window = now.duration_since(last);

                info!(
                    "{:.0}s elapsed: {} rows ({:.2} rows/sec), {} metrics ({:.2} metrics/sec) over the last {:.1}s",
                    now.duration_since(start).as_secs_f64(),
                    rows,
                    per_second(rows - last_rows, window),
                    metrics,
                    per_second(metrics - last_metrics, window),
                    window.as_secs_f64(),
                );

                last = now;
                last_rows = rows;
                last_metrics = metrics;
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
