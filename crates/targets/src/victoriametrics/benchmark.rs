use std::sync::Arc;

use anyhow::Result;
use reqwest::blocking::Client;
use tsload_core::{
    BatchFactory, Benchmark, BufferPool, ConstantIndexer, DataSource, DbCreator, InputSource,
    LineSource, LoadProcessor, NoopDbCreator, PointIndexer, RetryPolicy, RunnerConfig, open_input,
};

use super::{http_client, processor::VmProcessor};
use crate::influx::InfluxLineDecoder;

/// VictoriaMetrics creates storage on first write, so there is no DB setup and
/// every record may go to any worker.
pub struct VmBenchmark {
    input: InputSource,
    urls: Vec<String>,
    retry: RetryPolicy,
    factory: BatchFactory,
    client: Client,
}

impl VmBenchmark {
    pub fn new(config: &RunnerConfig) -> Result<Self> {
        // Enough idle buffers for every queued batch plus one in flight per worker.
        let max_idle = config.workers * (config.channel_capacity + 1);
        let pool = Arc::new(BufferPool::new(config.buffer_capacity, max_idle));

        Ok(Self {
            input: config.input(),
            urls: config.urls.clone(),
            retry: config.retry.clone(),
            factory: BatchFactory::new(pool),
            client: http_client()?,
        })
    }
}

impl Benchmark for VmBenchmark {
    fn data_source(&self) -> Result<Box<dyn DataSource>> {
        let reader = open_input(&self.input)?;
        Ok(Box::new(LineSource::new(reader, InfluxLineDecoder)))
    }

    fn batch_factory(&self) -> BatchFactory {
        self.factory.clone()
    }

    fn point_indexer(&self, _max_partitions: usize) -> Box<dyn PointIndexer> {
        Box::new(ConstantIndexer)
    }

    fn processor(&self) -> Box<dyn LoadProcessor> {
        Box::new(VmProcessor::new(
            self.client.clone(),
            self.urls.clone(),
            self.retry.clone(),
        ))
    }

    fn db_creator(&self) -> Box<dyn DbCreator> {
        Box::new(NoopDbCreator)
    }
}
