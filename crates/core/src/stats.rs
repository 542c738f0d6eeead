use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use crossbeam::queue::ArrayQueue;
use hdrhistogram::Histogram;
use log::info;
use serde::Serialize;

/// Label of the aggregate over every recorded query.
pub const ALL_QUERIES_LABEL: &str = "all queries";

const DEFAULT_STAT_POOL: usize = 1024;
/// Histograms track 1µs..1h with 3 significant figures.
const MAX_TRACKABLE_US: u64 = 3_600_000_000;

/// Latency of one completed query.
#[derive(Debug, Clone, Default)]
pub struct Stat {
    label: String,
    value_ms: f64,
    is_warm: bool,
}

impl Stat {
    /// Reuse this stat for a new measurement, keeping the label allocation.
    pub fn init(&mut self, label: &str, value_ms: f64, is_warm: bool) {
        self.label.clear();
        self.label.push_str(label);
        self.value_ms = value_ms;
        self.is_warm = is_warm;
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value_ms(&self) -> f64 {
        self.value_ms
    }

    pub fn is_warm(&self) -> bool {
        self.is_warm
    }
}

/// Recycles `Stat`s between processors and the collector.
pub struct StatPool {
    free: ArrayQueue<Stat>,
}

impl StatPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
        }
    }

    pub fn get(&self) -> Stat {
        self.free.pop().unwrap_or_default()
    }

    pub fn put(&self, stat: Stat) {
        let _ = self.free.push(stat);
    }

    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

impl Default for StatPool {
    fn default() -> Self {
        Self::new(DEFAULT_STAT_POOL)
    }
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// HDR histogram plus exact count, sum, min and max.
#[derive(Clone)]
pub struct LatencyStats {
    hist: Histogram<u64>,
    count: u64,
    sum_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            hist: Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)
                .expect("static histogram bounds are valid"),
            count: 0,
            sum_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
        }
    }

    pub fn record(&mut self, latency: Duration) {
        self.record_ms(latency.as_secs_f64() * 1000.0);
    }

    pub fn record_ms(&mut self, ms: f64) {
        let us = (ms * 1000.0).round().max(1.0) as u64;
        self.hist.saturating_record(us);
        self.count += 1;
        self.sum_ms += ms;
        self.min_ms = self.min_ms.min(ms);
        self.max_ms = self.max_ms.max(ms);
    }

    pub fn merge(&mut self, other: &LatencyStats) -> Result<()> {
        self.hist
            .add(&other.hist)
            .map_err(|e| anyhow!("merging latency histograms: {e:?}"))?;
        self.count += other.count;
        self.sum_ms += other.sum_ms;
        self.min_ms = self.min_ms.min(other.min_ms);
        self.max_ms = self.max_ms.max(other.max_ms);
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_ms / self.count as f64
    }

    /// Quantized to the histogram's precision.
    pub fn percentile_ms(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.hist.value_at_percentile(p) as f64 / 1000.0
    }

    pub fn summary(&self) -> LatencySummary {
        if self.count == 0 {
            return LatencySummary::default();
        }
        LatencySummary {
            count: self.count,
            min_ms: self.min_ms,
            mean_ms: self.mean_ms(),
            p50_ms: self.percentile_ms(50.0),
            p95_ms: self.percentile_ms(95.0),
            p99_ms: self.percentile_ms(99.0),
            max_ms: self.max_ms,
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregates query stats per label and overall.
///
/// Owned by a single thread; processors hand stats over through a channel and
/// the collector returns them to the pool once recorded.
pub struct StatsCollector {
    pool: Arc<StatPool>,
    burn_in: u64,
    prewarm: bool,
    print_interval: u64,
    seen: u64,
    all: LatencyStats,
    by_label: BTreeMap<String, LatencyStats>,
}

impl StatsCollector {
    pub fn new(pool: Arc<StatPool>, burn_in: u64, prewarm: bool) -> Self {
        Self {
            pool,
            burn_in,
            prewarm,
            print_interval: 0,
            seen: 0,
            all: LatencyStats::new(),
            by_label: BTreeMap::new(),
        }
    }

    /// Log a snapshot every `n` recorded stats; `0` disables it.
    pub fn with_print_interval(mut self, n: u64) -> Self {
        self.print_interval = n;
        self
    }

    pub fn record(&mut self, stat: Stat) {
        // With prewarming, the cold run of each query is only a warm-up.
        let counts = !self.prewarm || stat.is_warm();

        if counts {
            self.seen += 1;
            if self.seen > self.burn_in {
                self.all.record_ms(stat.value_ms());
                match self.by_label.get_mut(stat.label()) {
                    Some(stats) => stats.record_ms(stat.value_ms()),
                    None => {
                        let mut stats = LatencyStats::new();
                        stats.record_ms(stat.value_ms());
                        self.by_label.insert(stat.label().to_owned(), stats);
                    }
                }

                let recorded = self.all.count();
                if self.print_interval > 0 && recorded % self.print_interval == 0 {
                    let s = self.all.summary();
                    info!(
                        "after {recorded} queries: mean {:.2}ms, p50 {:.2}ms, p99 {:.2}ms, max {:.2}ms",
                        s.mean_ms, s.p50_ms, s.p99_ms, s.max_ms
                    );
                }
            }
        }

        self.pool.put(stat);
    }

    /// Stats that made it past burn-in and warm-up filtering.
    pub fn recorded(&self) -> u64 {
        self.all.count()
    }

    pub fn all(&self) -> &LatencyStats {
        &self.all
    }

    pub fn label(&self, label: &str) -> Option<&LatencyStats> {
        self.by_label.get(label)
    }

    /// Overall summary first, then one per label in label order.
    pub fn summaries(&self) -> Vec<(String, LatencySummary)> {
        std::iter::once((ALL_QUERIES_LABEL.to_owned(), self.all.summary()))
            .chain(
                self.by_label
                    .iter()
                    .map(|(label, stats)| (label.clone(), stats.summary())),
            )
            .collect()
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
