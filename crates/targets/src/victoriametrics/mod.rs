//! VictoriaMetrics: influx line protocol in over `/write`, PromQL out over
//! `/api/v1/query*`.

mod benchmark;
mod processor;

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use tsload_core::{Benchmark, PointSerializer, QueryProcessor, RunnerConfig, Target, TargetFlag};

use crate::influx::InfluxSerializer;

pub use benchmark::VmBenchmark;
pub use processor::{VmProcessor, pretty_response};

static FLAGS: &[TargetFlag] = &[
    TargetFlag {
        name: "urls",
        default: "http://localhost:8428/write",
        help: "Ingestion URLs used by `tsload load` when --urls is unset (single-node or VMInsert)",
    },
    TargetFlag {
        name: "query-urls",
        default: "http://localhost:8428",
        help: "Query URLs used by `tsload query` when --urls is unset (single-node or VMSelect)",
    },
    TargetFlag {
        name: "latencies-file",
        default: "",
        help: "Latencies file used when --latencies-file is unset",
    },
];

#[derive(Debug, Default, Clone, Copy)]
pub struct VictoriaMetrics;

impl VictoriaMetrics {
    pub const NAME: &'static str = "victoriametrics";
}

impl Target for VictoriaMetrics {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn serializer(&self) -> Box<dyn PointSerializer> {
        Box::new(InfluxSerializer)
    }

    fn flags(&self) -> &'static [TargetFlag] {
        FLAGS
    }

    fn benchmark(&self, config: &RunnerConfig) -> Result<Box<dyn Benchmark>> {
        Ok(Box::new(VmBenchmark::new(config)?))
    }

    fn query_processor(&self, config: &RunnerConfig) -> Result<Box<dyn QueryProcessor>> {
        Ok(Box::new(VmProcessor::new(
            http_client()?,
            config.urls.clone(),
            config.retry.clone(),
        )))
    }
}

/// One client per run; clones share its connection pool.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(None::<Duration>)
        .build()
        .context("failed to build HTTP client")
}
