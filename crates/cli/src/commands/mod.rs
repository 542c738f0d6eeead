pub mod load;
pub mod query;
pub mod targets;

use std::{path::Path, process::ExitCode};

use anyhow::{Context, Result};
use clap::Subcommand;
use log::{error, info};
use tsload_core::LatencySummary;
use tsload_runtime::results::{LatencyRecord, ResultsFile, RunRecord};

pub use load::LoadArgs;
pub use query::QueryArgs;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load pre-generated data into a target database.
    ///
    /// Example:
    ///   tsload load --file data.influx --workers 8
    ///   tsload load --urls http://vm-1:8428/write,http://vm-2:8428/write < data.influx
    Load(LoadArgs),

    /// Run pre-generated queries against a target database.
    ///
    /// Example:
    ///   tsload query --file queries.json --workers 4 --prewarm-queries
    Query(QueryArgs),

    /// List supported target formats and their options.
    Targets,
}

/// Shared tail of every command: report the error and pick the exit code.
pub fn finish(kind: &str, result: Result<ExitCode>) -> ExitCode {
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("[{kind}] {e:#}");
            eprintln!("[error] {e:#}");
            ExitCode::from(2)
        }
    }
}

pub fn latency_record(s: &LatencySummary) -> LatencyRecord {
    LatencyRecord {
        count: s.count,
        min_ms: s.min_ms,
        mean_ms: s.mean_ms,
        p50_ms: s.p50_ms,
        p95_ms: s.p95_ms,
        p99_ms: s.p99_ms,
        max_ms: s.max_ms,
    }
}

pub fn append_result(path: Option<&Path>, record: &RunRecord) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    ResultsFile::new(path)
        .append(record)
        .with_context(|| format!("failed to append results to {}", path.display()))?;
    info!("appended run summary to {}", path.display());

    Ok(())
}
