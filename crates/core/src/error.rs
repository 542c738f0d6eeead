use std::io;

use thiserror::Error;

/// Failures at the processor boundary.
///
/// Transient load rejections never show up here unless the retry policy caps
/// attempts; every variant is fatal to the run.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Connection failure, malformed request or unreadable body.
    #[error("transport failure against {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The query path got a non-success status. Not retried.
    #[error("query {id}: non-{expected} status code received: {status}; Body: {body}")]
    Status {
        id: u64,
        expected: u16,
        status: u16,
        body: String,
    },

    #[error("batch {batch} still rejected after {attempts} attempts (last status {status})")]
    RetriesExhausted { batch: u64, attempts: u32, status: u16 },

    #[error("failed writing latencies: {0}")]
    LatencyLog(#[source] io::Error),

    /// Another worker failed and the run is shutting down.
    #[error("run aborted")]
    Aborted,
}

impl ProcessError {
    pub fn transport(
        endpoint: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ProcessError::Transport {
            endpoint: endpoint.into(),
            source: source.into(),
        }
    }
}
