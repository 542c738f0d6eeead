use std::{fmt, path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize};

use crate::batch::DEFAULT_BUFFER_CAPACITY;

/// Where serialized input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Stdin => f.write_str("<stdin>"),
            InputSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Backoff applied while a backend keeps rejecting a batch.
///
/// The delay before retry `n` (1-based) is `backoff_ms * multiplier^(n-1)`,
/// capped at `max_backoff_ms`. With `max_attempts = None` the batch is retried
/// until it is accepted; with a cap, running out of attempts fails the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_ms: 10,
            multiplier: 1.0,
            max_backoff_ms: 10_000,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Same delay before every retry, no attempt cap.
    pub fn fixed(backoff: Duration) -> Self {
        Self {
            backoff_ms: backoff.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap = self.max_backoff_ms.max(self.backoff_ms) as f64;
        let ms = (self.backoff_ms as f64 * self.multiplier.powi(exp)).min(cap);
        Duration::from_millis(ms as u64)
    }

    fn validate(&self) -> Result<()> {
        if !(self.multiplier >= 1.0) {
            bail!("retry multiplier must be >= 1.0, got {}", self.multiplier);
        }
        if self.max_attempts == Some(0) {
            bail!("retry max_attempts must be at least 1");
        }
        Ok(())
    }
}

/// Everything a run needs, built once at startup and passed down by reference.
///
/// Deserializes from a JSON config file where every key is optional; the CLI
/// layers its flags on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Database name handed to the target's DB creator.
    pub db_name: String,
    /// Endpoints; workers bind to them round-robin.
    #[serde(deserialize_with = "deserialize_urls")]
    pub urls: Vec<String>,
    pub workers: usize,
    /// Rows per batch.
    pub batch_size: usize,
    /// Batches that may queue up per dispatch channel.
    pub channel_capacity: usize,
    /// Minimum capacity of pooled batch buffers, in bytes.
    pub buffer_capacity: usize,
    /// Stop after this many records.
    pub limit: Option<u64>,
    /// `false` builds and counts batches without sending them.
    pub do_load: bool,
    pub do_create_db: bool,
    /// Route records to workers through the point indexer.
    pub hash_workers: bool,
    /// Seconds between progress reports, `0` disables them.
    pub reporting_period_secs: u64,
    /// Input file; stdin when unset.
    pub file: Option<PathBuf>,
    pub latencies_file: Option<PathBuf>,
    pub retry: RetryPolicy,

    pub print_responses: bool,
    /// Leading query stats discarded before aggregation.
    pub burn_in: u64,
    /// Stop after this many queries.
    pub max_queries: Option<u64>,
    pub prewarm_queries: bool,
    /// Log a stats snapshot every this many queries, `0` disables it.
    pub print_interval: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            db_name: "benchmark".to_string(),
            urls: Vec::new(),
            workers: 1,
            batch_size: 10_000,
            channel_capacity: 4,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            limit: None,
            do_load: true,
            do_create_db: true,
            hash_workers: false,
            reporting_period_secs: 10,
            file: None,
            latencies_file: None,
            retry: RetryPolicy::default(),
            print_responses: false,
            burn_in: 0,
            max_queries: None,
            prewarm_queries: false,
            print_interval: 100,
        }
    }
}

impl RunnerConfig {
    pub fn input(&self) -> InputSource {
        match &self.file {
            Some(path) => InputSource::File(path.clone()),
            None => InputSource::Stdin,
        }
    }

    pub fn reporting_period(&self) -> Option<Duration> {
        (self.reporting_period_secs > 0).then(|| Duration::from_secs(self.reporting_period_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            bail!("missing `urls`: at least one endpoint is required");
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if self.channel_capacity == 0 {
            bail!("channel capacity must be at least 1");
        }
        self.retry.validate()
    }
}

/// Split a comma-separated endpoint list, dropping blanks.
pub fn parse_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn deserialize_urls<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Urls {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Urls::deserialize(deserializer)? {
        Urls::List(list) => list
            .iter()
            .flat_map(|entry| parse_urls(entry))
            .collect(),
        Urls::Joined(raw) => parse_urls(&raw),
    })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
