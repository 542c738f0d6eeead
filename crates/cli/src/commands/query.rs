use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use tsload_core::{BenchmarkRunner, JsonQuerySource, RunnerConfig, open_input};
use tsload_runtime::results::{RunKind, RunRecord};
use tsload_targets::get_target;

use crate::commands::{append_result, finish, latency_record};
use crate::printer::{OutputFormat, stdout_printer};
use crate::settings::CommonArgs;

#[derive(Debug, Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Leading queries left out of the statistics
    #[arg(long)]
    pub burn_in: Option<u64>,

    /// Stop after this many queries (0 = all)
    #[arg(long)]
    pub max_queries: Option<u64>,

    /// Run each query twice and only measure the second, warm run
    #[arg(long)]
    pub prewarm_queries: bool,

    /// Echo every response to stderr as indented JSON
    #[arg(long)]
    pub print_responses: bool,

    /// Log running statistics every N queries (0 disables them)
    #[arg(long, value_name = "N")]
    pub print_interval: Option<u64>,
}

impl QueryArgs {
    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(n) = self.burn_in {
            config.burn_in = n;
        }
        if let Some(n) = self.max_queries {
            config.max_queries = (n > 0).then_some(n);
        }
        if self.prewarm_queries {
            config.prewarm_queries = true;
        }
        if self.print_responses {
            config.print_responses = true;
        }
        if let Some(n) = self.print_interval {
            config.print_interval = n;
        }
    }
}

pub fn run(args: QueryArgs) -> ExitCode {
    finish("query", execute(args))
}

fn execute(args: QueryArgs) -> Result<ExitCode> {
    let target = get_target(&args.common.format)?;
    let mut config = args.common.resolve(target.as_ref(), "query-urls")?;
    args.apply(&mut config);
    config.validate()?;

    let mut source = JsonQuerySource::new(open_input(&config.input())?);
    let runner = BenchmarkRunner::new(config);
    let summary = runner.run_queries(&mut source, || {
        target.query_processor(runner.config())
    })?;

    let format = if args.common.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    stdout_printer(format).queries(target.name(), &summary)?;

    let record = RunRecord::new(
        RunKind::Query,
        target.name(),
        summary.workers,
        summary.executed,
        0,
        summary.elapsed.as_secs_f64(),
        latency_record(&summary.overall()),
    );
    append_result(args.common.results_file.as_deref(), &record)?;

    Ok(ExitCode::SUCCESS)
}
