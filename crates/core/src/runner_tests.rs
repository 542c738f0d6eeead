use super::*;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs,
    sync::atomic::AtomicUsize,
};

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::{ALL_QUERIES_LABEL, BufferPool, ConstantIndexer, HashIndexer, LatencyEntry, Record};

struct VecSource(VecDeque<Record>);

impl DataSource for VecSource {
    fn next_record(&mut self) -> Result<Option<Record>> {
        Ok(self.0.pop_front())
    }
}

struct VecQueries(VecDeque<Query>);

impl QuerySource for VecQueries {
    fn next_query(&mut self) -> Result<Option<Query>> {
        Ok(self.0.pop_front())
    }
}

#[derive(Debug, Clone)]
struct Delivery {
    worker: usize,
    seq: usize,
    lines: Vec<String>,
}

/// Everything the fakes observed, in one place.
#[derive(Default)]
struct Journal {
    seq: AtomicUsize,
    inits: Mutex<Vec<(usize, usize)>>,
    deliveries: Mutex<Vec<Delivery>>,
    closed: AtomicUsize,
    db_calls: Mutex<Vec<String>>,
    queries: Mutex<Vec<(u64, bool)>>,
}

impl Journal {
    fn tick(&self) -> usize {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Clone, Copy)]
enum Indexing {
    Constant,
    Hash,
    OutOfRange,
}

struct Beyond;

impl PointIndexer for Beyond {
    fn index(&self, _record: &Record, max_partitions: usize) -> usize {
        max_partitions
    }
}

struct FakeBench {
    records: Vec<Record>,
    indexing: Indexing,
    fail_on_batch: Option<u64>,
    db_exists: bool,
    factory: BatchFactory,
    journal: Arc<Journal>,
}

impl FakeBench {
    fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            indexing: Indexing::Constant,
            fail_on_batch: None,
            db_exists: false,
            factory: BatchFactory::new(Arc::new(BufferPool::new(256, 8))),
            journal: Arc::new(Journal::default()),
        }
    }
}

impl Benchmark for FakeBench {
    fn data_source(&self) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(VecSource(self.records.iter().cloned().collect())))
    }

    fn batch_factory(&self) -> BatchFactory {
        self.factory.clone()
    }

    fn point_indexer(&self, _max_partitions: usize) -> Box<dyn PointIndexer> {
        match self.indexing {
            Indexing::Constant => Box::new(ConstantIndexer),
            Indexing::Hash => Box::new(HashIndexer),
            Indexing::OutOfRange => Box::new(Beyond),
        }
    }

    fn processor(&self) -> Box<dyn LoadProcessor> {
        Box::new(FakeLoader {
            journal: Arc::clone(&self.journal),
            fail_on_batch: self.fail_on_batch,
            ctx: None,
        })
    }

    fn db_creator(&self) -> Box<dyn DbCreator> {
        Box::new(FakeCreator {
            journal: Arc::clone(&self.journal),
            exists: self.db_exists,
        })
    }
}

struct FakeCreator {
    journal: Arc<Journal>,
    exists: bool,
}

impl DbCreator for FakeCreator {
    fn init(&mut self) -> Result<()> {
        self.journal.db_calls.lock().push("init".into());
        Ok(())
    }

    fn db_exists(&self, db_name: &str) -> Result<bool> {
        self.journal.db_calls.lock().push(format!("exists {db_name}"));
        Ok(self.exists)
    }

    fn remove_old_db(&self, db_name: &str) -> Result<()> {
        self.journal.db_calls.lock().push(format!("remove {db_name}"));
        Ok(())
    }

    fn create_db(&self, db_name: &str) -> Result<()> {
        self.journal.db_calls.lock().push(format!("create {db_name}"));
        Ok(())
    }
}

struct FakeLoader {
    journal: Arc<Journal>,
    fail_on_batch: Option<u64>,
    ctx: Option<WorkerContext>,
}

impl LoadProcessor for FakeLoader {
    fn init(&mut self, ctx: &WorkerContext) -> Result<()> {
        let seq = self.journal.tick();
        self.journal.inits.lock().push((ctx.index, seq));
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    fn process_batch(&mut self, batch: Batch, do_load: bool) -> Result<BatchReport, ProcessError> {
        let ctx = self.ctx.as_ref().expect("init runs before the first batch");
        if !do_load {
            return Ok(BatchReport::dry_run(&batch));
        }
        if self.fail_on_batch == Some(batch.id()) {
            return Err(ProcessError::transport("http://fake", "connection reset"));
        }

        let seq = self.journal.tick();
        let lines = String::from_utf8_lossy(batch.as_bytes())
            .lines()
            .map(str::to_owned)
            .collect();
        self.journal.deliveries.lock().push(Delivery {
            worker: ctx.index,
            seq,
            lines,
        });

        let latency = Duration::from_micros(1500);
        if let Some(log) = &ctx.latency_log {
            log.append(LatencyEntry::new(batch.id(), latency))
                .map_err(ProcessError::LatencyLog)?;
        }

        Ok(BatchReport {
            latency,
            metrics: batch.metrics(),
            rows: batch.rows(),
            retries: 0,
        })
    }

    fn close(&mut self, _do_load: bool) {
        self.journal.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeQuerier {
    journal: Arc<Journal>,
    fail_on_query: Option<u64>,
    ctx: Option<WorkerContext>,
}

impl QueryProcessor for FakeQuerier {
    fn init(&mut self, ctx: &WorkerContext) -> Result<()> {
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    fn process_query(&mut self, query: &Query, is_warm: bool) -> Result<Vec<Stat>, ProcessError> {
        let ctx = self.ctx.as_ref().expect("init runs before the first query");
        self.journal.queries.lock().push((query.id, is_warm));

        if self.fail_on_query == Some(query.id) {
            return Err(ProcessError::Status {
                id: query.id,
                expected: 200,
                status: 500,
                body: "boom".into(),
            });
        }

        // Cold runs look slow so tests can tell them apart.
        let ms = if is_warm { 1.0 } else { 100.0 };
        if let Some(log) = &ctx.latency_log {
            log.append(LatencyEntry::new(query.id, Duration::from_secs_f64(ms / 1000.0)))
                .map_err(ProcessError::LatencyLog)?;
        }

        let mut stat = ctx.stats.get();
        stat.init(&query.label, ms, is_warm);
        Ok(vec![stat])
    }
}

fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let line = format!("cpu,host=host_{} usage_user={i} {i}", i % 10);
            let key_len = line.find(' ').unwrap_or(line.len());
            Record::new(line.into_bytes(), 1).with_key_len(key_len)
        })
        .collect()
}

fn queries(n: u64) -> VecQueries {
    VecQueries(
        (1..=n)
            .map(|id| Query {
                id,
                label: if id % 2 == 0 { "even" } else { "odd" }.into(),
                description: String::new(),
                method: "GET".into(),
                path: format!("/api/v1/query?query=q{id}"),
                body: None,
            })
            .collect(),
    )
}

fn config(workers: usize) -> RunnerConfig {
    RunnerConfig {
        urls: vec!["http://fake:8428/write".into()],
        workers,
        batch_size: 10,
        reporting_period_secs: 0,
        print_interval: 0,
        ..Default::default()
    }
}

fn query_factory(
    journal: &Arc<Journal>,
    fail_on_query: Option<u64>,
) -> impl FnMut() -> Result<Box<dyn QueryProcessor>> {
    let journal = Arc::clone(journal);
    move || {
        Ok(Box::new(FakeQuerier {
            journal: Arc::clone(&journal),
            fail_on_query,
            ctx: None,
        }) as Box<dyn QueryProcessor>)
    }
}

fn well_formed(line: &str) -> bool {
    let Some((id, ms)) = line.split_once(' ') else {
        return false;
    };
    id.parse::<u64>().is_ok()
        && ms.parse::<f64>().is_ok()
        && ms.split_once('.').is_some_and(|(_, frac)| frac.len() == 3)
}

#[test]
fn shared_dispatch_delivers_every_record_once() {
    let bench = FakeBench::new(records(1003));
    let summary = BenchmarkRunner::new(config(4))
        .run_load(&bench)
        .expect("load succeeds");

    assert_eq!(summary.rows, 1003);
    assert_eq!(summary.metrics, 1003);
    assert_eq!(summary.batches, 101);
    assert_eq!(summary.workers, 4);
    assert_eq!(summary.batch_latency.count, 101);

    let deliveries = bench.journal.deliveries.lock();
    let mut seen = HashSet::new();
    for line in deliveries.iter().flat_map(|d| d.lines.iter()) {
        assert!(seen.insert(line.clone()), "duplicate line {line}");
    }
    assert_eq!(seen.len(), 1003);
    assert!(deliveries.iter().all(|d| d.lines.len() <= 10));
}

#[test]
fn every_worker_is_initialized_once_before_any_batch() {
    let bench = FakeBench::new(records(200));
    BenchmarkRunner::new(config(5))
        .run_load(&bench)
        .expect("load succeeds");

    let inits = bench.journal.inits.lock();
    let mut indices: Vec<usize> = inits.iter().map(|(i, _)| *i).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..5).collect::<Vec<_>>());

    let last_init = inits.iter().map(|(_, seq)| *seq).max().unwrap();
    let first_batch = bench
        .journal
        .deliveries
        .lock()
        .iter()
        .map(|d| d.seq)
        .min()
        .unwrap();
    assert!(last_init < first_batch);
    assert_eq!(bench.journal.closed.load(Ordering::SeqCst), 5);
}

#[test]
fn constant_indexer_partitioning_keeps_everything_on_worker_zero() {
    let bench = FakeBench::new(records(95));
    let mut cfg = config(3);
    cfg.hash_workers = true;

    let summary = BenchmarkRunner::new(cfg).run_load(&bench).expect("load succeeds");
    assert_eq!(summary.rows, 95);

    let mut deliveries = bench.journal.deliveries.lock().clone();
    assert!(deliveries.iter().all(|d| d.worker == 0));

    // One worker means input order survives end to end.
    deliveries.sort_by_key(|d| d.seq);
    let lines: Vec<String> = deliveries.into_iter().flat_map(|d| d.lines).collect();
    let expected: Vec<String> = records(95)
        .iter()
        .map(|r| String::from_utf8_lossy(r.data()).into_owned())
        .collect();
    assert_eq!(lines, expected);
}

#[test]
fn hash_partitioning_keeps_each_series_on_one_worker() {
    let mut bench = FakeBench::new(records(600));
    bench.indexing = Indexing::Hash;
    let mut cfg = config(4);
    cfg.hash_workers = true;

    BenchmarkRunner::new(cfg).run_load(&bench).expect("load succeeds");

    let mut owners: HashMap<String, HashSet<usize>> = HashMap::new();
    for d in bench.journal.deliveries.lock().iter() {
        for line in &d.lines {
            let key = line.split(' ').next().unwrap().to_owned();
            owners.entry(key).or_default().insert(d.worker);
        }
    }
    assert_eq!(owners.len(), 10);
    assert!(owners.values().all(|workers| workers.len() == 1), "{owners:?}");
}

#[test]
fn out_of_range_partition_fails_the_run() {
    let mut bench = FakeBench::new(records(5));
    bench.indexing = Indexing::OutOfRange;
    let mut cfg = config(2);
    cfg.hash_workers = true;

    let err = BenchmarkRunner::new(cfg).run_load(&bench).unwrap_err();
    assert!(err.to_string().contains("partition 2 for 2 workers"), "{err}");
}

#[test]
fn dry_run_counts_without_sending() {
    let bench = FakeBench::new(records(42));
    let mut cfg = config(2);
    cfg.do_load = false;

    let summary = BenchmarkRunner::new(cfg).run_load(&bench).expect("dry run succeeds");

    assert_eq!(summary.rows, 42);
    assert_eq!(summary.batches, 5);
    assert_eq!(summary.batch_latency.count, 0);
    assert!(bench.journal.deliveries.lock().is_empty());
    assert!(bench.journal.db_calls.lock().is_empty());
}

#[test]
fn limit_stops_reading_early() {
    let bench = FakeBench::new(records(500));
    let mut cfg = config(2);
    cfg.limit = Some(25);

    let summary = BenchmarkRunner::new(cfg).run_load(&bench).expect("load succeeds");
    assert_eq!(summary.rows, 25);
    assert_eq!(summary.batches, 3);
}

#[test]
fn existing_database_is_recreated_before_loading() {
    let mut bench = FakeBench::new(records(3));
    bench.db_exists = true;
    let mut cfg = config(1);
    cfg.db_name = "tsbs".into();

    BenchmarkRunner::new(cfg).run_load(&bench).expect("load succeeds");

    assert_eq!(
        *bench.journal.db_calls.lock(),
        vec!["init", "exists tsbs", "remove tsbs", "create tsbs"]
    );

    let skip = FakeBench::new(records(3));
    let mut cfg = config(1);
    cfg.do_create_db = false;
    BenchmarkRunner::new(cfg).run_load(&skip).expect("load succeeds");
    assert!(skip.journal.db_calls.lock().is_empty());
}

#[test]
fn latency_log_gets_one_line_per_batch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("latencies.txt");
    let bench = FakeBench::new(records(230));
    let mut cfg = config(3);
    cfg.latencies_file = Some(path.clone());

    let summary = BenchmarkRunner::new(cfg).run_load(&bench).expect("load succeeds");

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len() as u64, summary.batches);
    assert!(lines.iter().all(|l| well_formed(l)), "{text}");
    assert!(lines.iter().all(|l| l.ends_with(" 1.500")));

    let mut ids: Vec<u64> = lines
        .iter()
        .map(|l| l.split(' ').next().unwrap().parse().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=summary.batches).collect::<Vec<_>>());
}

#[test]
fn fatal_worker_error_aborts_and_leaves_whole_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("latencies.txt");
    let mut bench = FakeBench::new(records(2000));
    bench.fail_on_batch = Some(3);
    let mut cfg = config(4);
    cfg.latencies_file = Some(path.clone());

    let err = BenchmarkRunner::new(cfg).run_load(&bench).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("failed on batch 3"), "{msg}");
    assert!(msg.contains("connection reset"), "{msg}");

    // Every worker shut down cleanly.
    assert_eq!(bench.journal.closed.load(Ordering::SeqCst), 4);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.is_empty() || text.ends_with('\n'));
    assert!(text.lines().all(well_formed), "{text}");
    assert!(!text.lines().any(|l| l.starts_with("3 ")));
}

#[test]
fn invalid_config_is_rejected_before_any_work() {
    let bench = FakeBench::new(records(3));
    let mut cfg = config(1);
    cfg.urls.clear();

    assert!(BenchmarkRunner::new(cfg).run_load(&bench).is_err());
    assert!(bench.journal.inits.lock().is_empty());
}

#[test]
fn queries_are_all_run_and_grouped_by_label() {
    let journal = Arc::new(Journal::default());
    let mut source = queries(20);

    let summary = BenchmarkRunner::new(config(3))
        .run_queries(&mut source, query_factory(&journal, None))
        .expect("queries succeed");

    assert_eq!(summary.executed, 20);
    assert_eq!(summary.recorded, 20);
    assert_eq!(summary.overall().count, 20);

    let labels: Vec<&str> = summary.latencies.iter().map(|(l, _)| l.as_str()).collect();
    assert_eq!(labels, vec![ALL_QUERIES_LABEL, "even", "odd"]);
    assert_eq!(summary.latencies[1].1.count, 10);

    let mut ids: Vec<u64> = journal.queries.lock().iter().map(|(id, _)| *id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
}

#[test]
fn prewarm_runs_each_query_cold_then_warm() {
    let journal = Arc::new(Journal::default());
    let mut cfg = config(2);
    cfg.prewarm_queries = true;

    let summary = BenchmarkRunner::new(cfg)
        .run_queries(&mut queries(10), query_factory(&journal, None))
        .expect("queries succeed");

    assert_eq!(summary.executed, 10);
    assert_eq!(summary.recorded, 10);
    assert_eq!(summary.overall().max_ms, 1.0);

    let runs = journal.queries.lock();
    assert_eq!(runs.len(), 20);
    for id in 1..=10 {
        let mine: Vec<bool> = runs.iter().filter(|(q, _)| *q == id).map(|(_, w)| *w).collect();
        assert_eq!(mine, vec![false, true], "query {id}");
    }
}

#[test]
fn burn_in_and_max_queries_shape_the_run() {
    let journal = Arc::new(Journal::default());
    let mut cfg = config(1);
    cfg.burn_in = 4;
    cfg.max_queries = Some(12);

    let summary = BenchmarkRunner::new(cfg)
        .run_queries(&mut queries(50), query_factory(&journal, None))
        .expect("queries succeed");

    assert_eq!(summary.executed, 12);
    assert_eq!(summary.recorded, 8);
}

#[test]
fn rejected_query_aborts_the_run() {
    let journal = Arc::new(Journal::default());

    let err = BenchmarkRunner::new(config(1))
        .run_queries(&mut queries(30), query_factory(&journal, Some(3)))
        .unwrap_err();

    let msg = format!("{err:#}");
    assert!(msg.contains("query 3"), "{msg}");
    assert!(msg.contains("500"), "{msg}");
    assert!(journal.queries.lock().len() < 30);
}

#[test]
fn query_latencies_are_logged_per_query() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("query-latencies.txt");
    let journal = Arc::new(Journal::default());
    let mut cfg = config(2);
    cfg.latencies_file = Some(path.clone());

    BenchmarkRunner::new(cfg)
        .run_queries(&mut queries(7), query_factory(&journal, None))
        .expect("queries succeed");

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 7);
    assert!(text.lines().all(well_formed), "{text}");
    assert!(text.lines().all(|l| l.ends_with(" 100.000")));
}
