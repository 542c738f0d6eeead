use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use log::{debug, warn};
use reqwest::{Method, StatusCode, blocking::Client};
use tsload_core::{
    Attempt, Batch, BatchReport, LatencyEntry, LoadProcessor, ProcessError, Query,
    QueryProcessor, RetryPolicy, Retried, Stat, WorkerContext, retry_until_accepted,
    select_endpoint,
};

/// One worker's connection to VictoriaMetrics, for loads and queries alike.
pub struct VmProcessor {
    client: Client,
    urls: Vec<String>,
    retry: RetryPolicy,
    url: String,
    ctx: WorkerContext,
}

impl VmProcessor {
    pub fn new(client: Client, urls: Vec<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            urls,
            retry,
            url: String::new(),
            ctx: WorkerContext::new(0),
        }
    }

    /// Endpoint this worker is bound to; empty before `init`.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn bind(&mut self, ctx: &WorkerContext) -> Result<()> {
        let url = select_endpoint(&self.urls, ctx.index)
            .ok_or_else(|| anyhow!("no VictoriaMetrics urls configured"))?;
        self.url = url.to_owned();
        self.ctx = ctx.clone();
        debug!("worker {} bound to {}", ctx.index, self.url);
        Ok(())
    }

    fn post(&self, batch: &Batch) -> Result<Attempt<Duration>, ProcessError> {
        let start = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .body(batch.as_bytes().to_vec())
            .send()
            .map_err(|e| ProcessError::transport(&self.url, e))?;
        let took = start.elapsed();

        let status = resp.status();
        // Drain the body so the connection goes back to the pool. A short
        // read is a broken connection, not a rejection.
        resp.bytes().map_err(|e| ProcessError::transport(&self.url, e))?;

        if status == StatusCode::NO_CONTENT {
            Ok(Attempt::Accepted(took))
        } else {
            Ok(Attempt::Rejected {
                status: status.as_u16(),
            })
        }
    }

    fn log_latency(&self, id: u64, latency: Duration) -> Result<(), ProcessError> {
        match &self.ctx.latency_log {
            Some(log) => log
                .append(LatencyEntry::new(id, latency))
                .map_err(ProcessError::LatencyLog),
            None => Ok(()),
        }
    }
}

impl LoadProcessor for VmProcessor {
    fn init(&mut self, ctx: &WorkerContext) -> Result<()> {
        self.bind(ctx)
    }

    fn process_batch(&mut self, mut batch: Batch, do_load: bool) -> Result<BatchReport, ProcessError> {
        if !do_load {
            return Ok(BatchReport::dry_run(&batch));
        }

        let id = batch.id();
        let Retried {
            value: latency,
            retries,
        } = retry_until_accepted(&self.retry, &self.ctx.abort, id, || self.post(&batch))?;

        let report = BatchReport {
            latency,
            metrics: batch.metrics(),
            rows: batch.rows(),
            retries,
        };
        batch.reset();

        self.log_latency(id, latency)?;
        Ok(report)
    }
}

impl QueryProcessor for VmProcessor {
    fn init(&mut self, ctx: &WorkerContext) -> Result<()> {
        self.bind(ctx)
    }

    fn process_query(&mut self, query: &Query, is_warm: bool) -> Result<Vec<Stat>, ProcessError> {
        let url = format!("{}{}", self.url, query.path);
        let method = Method::from_bytes(query.method.as_bytes())
            .map_err(|e| ProcessError::transport(&url, e))?;

        let mut request = self.client.request(method, &url);
        if let Some(body) = &query.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        let resp = request
            .send()
            .map_err(|e| ProcessError::transport(&url, e))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .map_err(|e| ProcessError::transport(&url, e))?;
        let latency = start.elapsed();

        if status != StatusCode::OK {
            return Err(ProcessError::Status {
                id: query.id,
                expected: StatusCode::OK.as_u16(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        if self.ctx.print_responses {
            match pretty_response(query.id, &body) {
                Ok(text) => eprintln!("{text}"),
                Err(e) => warn!("query {}: response is not JSON: {e}", query.id),
            }
        }

        self.log_latency(query.id, latency)?;

        let mut stat = self.ctx.stats.get();
        stat.init(&query.label, latency.as_secs_f64() * 1000.0, is_warm);
        Ok(vec![stat])
    }
}

/// Re-indent a JSON body with every line prefixed `ID <id>: `.
pub fn pretty_response(id: u64, body: &[u8]) -> serde_json::Result<String> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let pretty = serde_json::to_string_pretty(&value)?;
    let prefix = format!("ID {id}: ");

    Ok(pretty
        .lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
