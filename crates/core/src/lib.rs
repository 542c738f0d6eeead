mod batch;
mod config;
mod error;
mod indexer;
mod latency;
mod processor;
mod retry;
mod runner;
mod source;
mod stats;
mod target;

pub use batch::{Batch, BatchFactory, BufferPool, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_IDLE};
pub use config::{InputSource, RetryPolicy, RunnerConfig, parse_urls};
pub use error::ProcessError;
pub use indexer::{ConstantIndexer, HashIndexer, PointIndexer};
pub use latency::{LatencyEntry, LatencyLog};
pub use processor::{
    AbortSignal, BatchReport, LoadProcessor, QueryProcessor, WorkerContext, select_endpoint,
};
pub use retry::{Attempt, Retried, retry_until_accepted};
pub use runner::{BenchmarkRunner, LoadSummary, QuerySummary};
pub use source::{
    DataSource, JsonQuerySource, LineDecoder, LineSource, Query, QuerySource, RawLineDecoder,
    Record, open_input,
};
pub use stats::{
    ALL_QUERIES_LABEL, LatencyStats, LatencySummary, Stat, StatPool, StatsCollector,
};
pub use target::{
    Benchmark, DbCreator, FieldValue, NoopDbCreator, Point, PointSerializer, Target, TargetFlag,
};
