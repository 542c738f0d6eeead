use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

pub const RESULTS_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Load,
    Query,
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LatencyRecord {
    pub count: u64,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Outcome of one completed run, one JSON line in the results file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunRecord {
    /// Schema version
    pub version: u8,

    pub timestamp: DateTime<Utc>,

    pub kind: RunKind,

    /// Registered target name, e.g. `victoriametrics`
    pub target: String,

    pub workers: usize,

    /// Rows loaded or queries measured.
    pub items: u64,

    /// Metric values loaded; zero for query runs.
    pub metrics: u64,

    pub elapsed_secs: f64,

    /// Items per second over the whole run.
    pub rate: f64,

    pub latency: LatencyRecord,
}

impl RunRecord {
    pub fn new(
        kind: RunKind,
        target: impl Into<String>,
        workers: usize,
        items: u64,
        metrics: u64,
        elapsed_secs: f64,
        latency: LatencyRecord,
    ) -> Self {
        let rate = if elapsed_secs > 0.0 {
            items as f64 / elapsed_secs
        } else {
            0.0
        };

        Self {
            version: RESULTS_VERSION,
            timestamp: Utc::now(),
            kind,
            target: target.into(),
            workers,
            items,
            metrics,
            elapsed_secs,
            rate,
            latency,
        }
    }
}

/// Append-only JSON-lines file of run results.
pub struct ResultsFile {
    path: PathBuf,
}

impl ResultsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &RunRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(record).map_err(io::Error::other)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        // One write per record; O_APPEND keeps concurrent tsload processes from
        // clobbering each other's lines in the common case.
        file.write_all(line.as_bytes())?;

        Ok(())
    }

    /// All readable records, oldest first. Malformed lines are skipped.
    pub fn records(&self) -> Vec<RunRecord> {
        let Ok(file) = File::open(&self.path) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            match line {
                Ok(line) => match serde_json::from_str(&line) {
                    Ok(rec) => records.push(rec),
                    Err(e) => debug!("Skipping malformed results line: {e}"),
                },
                Err(e) => {
                    debug!("Error reading results file: {e}");
                    break;
                }
            }
        }
        records
    }
}

#[cfg(test)]
#[path = "results_tests.rs"]
mod tests;
