use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use tsload_core::{BenchmarkRunner, RunnerConfig};
use tsload_runtime::results::{RunKind, RunRecord};
use tsload_targets::get_target;

use crate::commands::{append_result, finish, latency_record};
use crate::printer::{OutputFormat, stdout_printer};
use crate::settings::CommonArgs;

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Rows per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Stop after this many rows (0 = no limit)
    #[arg(long)]
    pub limit: Option<u64>,

    /// Send data to the database; `false` only reads and batches it
    #[arg(long, value_name = "BOOL")]
    pub do_load: Option<bool>,

    /// Recreate the database before loading
    #[arg(long, value_name = "BOOL")]
    pub do_create_db: Option<bool>,

    /// Route each series to a fixed worker
    #[arg(long)]
    pub hash_workers: bool,

    /// Seconds between progress reports (0 disables them)
    #[arg(long, value_name = "SECS")]
    pub reporting_period: Option<u64>,

    /// Batches that may wait in each dispatch channel
    #[arg(long)]
    pub channel_capacity: Option<usize>,

    /// Delay before the first retry of a rejected batch
    #[arg(long, value_name = "MS")]
    pub retry_backoff_ms: Option<u64>,

    /// Backoff growth per retry (1.0 keeps it fixed)
    #[arg(long)]
    pub retry_multiplier: Option<f64>,

    /// Upper bound on the retry backoff
    #[arg(long, value_name = "MS")]
    pub max_retry_backoff_ms: Option<u64>,

    /// Give up on a batch after this many attempts (unbounded when unset)
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

impl LoadArgs {
    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(limit) = self.limit {
            config.limit = (limit > 0).then_some(limit);
        }
        if let Some(do_load) = self.do_load {
            config.do_load = do_load;
        }
        if let Some(create) = self.do_create_db {
            config.do_create_db = create;
        }
        if self.hash_workers {
            config.hash_workers = true;
        }
        if let Some(secs) = self.reporting_period {
            config.reporting_period_secs = secs;
        }
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity;
        }
        if let Some(ms) = self.retry_backoff_ms {
            config.retry.backoff_ms = ms;
        }
        if let Some(multiplier) = self.retry_multiplier {
            config.retry.multiplier = multiplier;
        }
        if let Some(ms) = self.max_retry_backoff_ms {
            config.retry.max_backoff_ms = ms;
        }
        if let Some(attempts) = self.max_attempts {
            config.retry.max_attempts = Some(attempts);
        }
    }
}

pub fn run(args: LoadArgs) -> ExitCode {
    finish("load", execute(args))
}

fn execute(args: LoadArgs) -> Result<ExitCode> {
    let target = get_target(&args.common.format)?;
    let mut config = args.common.resolve(target.as_ref(), "urls")?;
    args.apply(&mut config);
    config.validate()?;

    let bench = target.benchmark(&config)?;
    let summary = BenchmarkRunner::new(config).run_load(bench.as_ref())?;

    let format = if args.common.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    stdout_printer(format).load(target.name(), &summary)?;

    let record = RunRecord::new(
        RunKind::Load,
        target.name(),
        summary.workers,
        summary.rows,
        summary.metrics,
        summary.elapsed.as_secs_f64(),
        latency_record(&summary.batch_latency),
    );
    append_result(args.common.results_file.as_deref(), &record)?;

    Ok(ExitCode::SUCCESS)
}
