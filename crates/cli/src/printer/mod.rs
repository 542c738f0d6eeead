use std::io::{self, Write};

use tsload_core::{LatencySummary, LoadSummary, QuerySummary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable summary lines.
    #[default]
    Human,
    /// One JSON object per run for machine consumption.
    Json,
}

/// Writes the end-of-run summary.
pub trait SummaryPrinter {
    fn load(&mut self, target: &str, summary: &LoadSummary) -> io::Result<()>;

    fn queries(&mut self, target: &str, summary: &QuerySummary) -> io::Result<()>;
}

pub fn stdout_printer(format: OutputFormat) -> Box<dyn SummaryPrinter> {
    match format {
        OutputFormat::Human => Box::new(HumanPrinter::new(io::stdout())),
        OutputFormat::Json => Box::new(JsonPrinter::new(io::stdout())),
    }
}

pub struct HumanPrinter<W: Write> {
    out: W,
}

impl<W: Write> HumanPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn latency_line(&mut self, s: &LatencySummary) -> io::Result<()> {
        writeln!(
            self.out,
            "min: {:8.2}ms, med: {:8.2}ms, mean: {:8.2}ms, p95: {:8.2}ms, p99: {:8.2}ms, max: {:8.2}ms, count: {}",
            s.min_ms, s.p50_ms, s.mean_ms, s.p95_ms, s.p99_ms, s.max_ms, s.count
        )
    }
}

impl<W: Write> SummaryPrinter for HumanPrinter<W> {
    fn load(&mut self, target: &str, s: &LoadSummary) -> io::Result<()> {
        let secs = s.elapsed.as_secs_f64();

        writeln!(self.out, "\nSummary ({target}):")?;
        writeln!(
            self.out,
            "loaded {} metrics in {:.3}sec with {} workers (mean rate {:.2} metrics/sec)",
            s.metrics,
            secs,
            s.workers,
            s.metric_rate()
        )?;
        writeln!(
            self.out,
            "loaded {} rows in {:.3}sec with {} workers (mean rate {:.2} rows/sec)",
            s.rows,
            secs,
            s.workers,
            s.row_rate()
        )?;

        if s.batch_latency.count > 0 {
            write!(self.out, "batch latency: ")?;
            self.latency_line(&s.batch_latency)?;
        }
        if s.retries > 0 {
            writeln!(self.out, "retried {} rejected batches", s.retries)?;
        }

        self.out.flush()
    }

    fn queries(&mut self, target: &str, s: &QuerySummary) -> io::Result<()> {
        writeln!(
            self.out,
            "\nRun complete after {} queries with {} workers against {target} (overall query rate {:.2} queries/sec):",
            s.executed,
            s.workers,
            s.query_rate()
        )?;

        for (label, latency) in &s.latencies {
            writeln!(self.out, "{label}:")?;
            self.latency_line(latency)?;
        }
        writeln!(self.out, "wall clock time: {:.6}sec", s.elapsed.as_secs_f64())?;

        self.out.flush()
    }
}

pub struct JsonPrinter<W: Write> {
    out: W,
}

impl<W: Write> JsonPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> SummaryPrinter for JsonPrinter<W> {
    fn load(&mut self, target: &str, s: &LoadSummary) -> io::Result<()> {
        let obj = serde_json::json!({
            "kind": "load",
            "target": target,
            "workers": s.workers,
            "batches": s.batches,
            "rows": s.rows,
            "metrics": s.metrics,
            "retries": s.retries,
            "elapsed_secs": s.elapsed.as_secs_f64(),
            "rows_per_sec": s.row_rate(),
            "metrics_per_sec": s.metric_rate(),
            "batch_latency": s.batch_latency,
        });
        writeln!(self.out, "{obj}")
    }

    fn queries(&mut self, target: &str, s: &QuerySummary) -> io::Result<()> {
        let labels: serde_json::Map<String, serde_json::Value> = s
            .latencies
            .iter()
            .map(|(label, latency)| (label.clone(), serde_json::json!(latency)))
            .collect();

        let obj = serde_json::json!({
            "kind": "query",
            "target": target,
            "workers": s.workers,
            "queries": s.executed,
            "recorded": s.recorded,
            "elapsed_secs": s.elapsed.as_secs_f64(),
            "queries_per_sec": s.query_rate(),
            "latency": labels,
        });
        writeln!(self.out, "{obj}")
    }
}

#[cfg(test)]
#[path = "printer_tests.rs"]
mod tests;
