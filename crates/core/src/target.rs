use std::io::{self, Write};

use anyhow::{Result, bail};

use crate::{
    batch::BatchFactory,
    config::RunnerConfig,
    indexer::PointIndexer,
    processor::{LoadProcessor, QueryProcessor},
    source::DataSource,
};

/// One data point handed to a serializer.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, FieldValue)>,
    pub timestamp_ns: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

/// Encodes points in a backend's wire format.
pub trait PointSerializer: Send + Sync {
    fn serialize(&self, point: &Point, out: &mut dyn Write) -> io::Result<()>;
}

/// Prepares the database before a load. Every step defaults to a no-op for
/// backends that create storage on first write.
pub trait DbCreator: Send {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn db_exists(&self, _db_name: &str) -> Result<bool> {
        Ok(false)
    }

    fn remove_old_db(&self, _db_name: &str) -> Result<()> {
        Ok(())
    }

    fn create_db(&self, _db_name: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDbCreator;

impl DbCreator for NoopDbCreator {}

/// Pieces the runner needs to load data into one backend.
pub trait Benchmark: Send + Sync {
    fn data_source(&self) -> Result<Box<dyn DataSource>>;

    fn batch_factory(&self) -> BatchFactory;

    fn point_indexer(&self, max_partitions: usize) -> Box<dyn PointIndexer>;

    /// A fresh, uninitialized processor; the runner calls this once per worker.
    fn processor(&self) -> Box<dyn LoadProcessor>;

    fn db_creator(&self) -> Box<dyn DbCreator>;
}

/// A backend-specific option, listed by `tsload targets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFlag {
    pub name: &'static str,
    pub default: &'static str,
    pub help: &'static str,
}

/// A pluggable backend.
pub trait Target: Send + Sync {
    fn name(&self) -> &'static str;

    fn serializer(&self) -> Box<dyn PointSerializer>;

    fn flags(&self) -> &'static [TargetFlag];

    /// Default value of one of this target's flags.
    fn flag_default(&self, name: &str) -> Option<&'static str> {
        self.flags()
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.default)
    }

    fn benchmark(&self, config: &RunnerConfig) -> Result<Box<dyn Benchmark>>;

    fn query_processor(&self, _config: &RunnerConfig) -> Result<Box<dyn QueryProcessor>> {
        bail!("target `{}` does not support queries", self.name())
    }
}
