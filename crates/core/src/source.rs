use std::{
    fs::File,
    io::{self, BufRead, BufReader},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::InputSource;

/// Read buffer for input files and stdin (4 MiB).
const DEFAULT_READ_SIZE: usize = 4 << 20;

/// One serialized line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    data: Vec<u8>,
    /// Length of the series key prefix used by hashing indexers.
    key_len: usize,
    metrics: u64,
}

impl Record {
    /// A record whose key is the whole line.
    pub fn new(data: Vec<u8>, metrics: u64) -> Self {
        let key_len = data.len();
        Self {
            data,
            key_len,
            metrics,
        }
    }

    pub fn with_key_len(mut self, key_len: usize) -> Self {
        self.key_len = key_len.min(self.data.len());
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn key(&self) -> &[u8] {
        &self.data[..self.key_len]
    }

    pub fn metrics(&self) -> u64 {
        self.metrics
    }
}

/// Lazy, ordered stream of records.
pub trait DataSource: Send {
    /// `Ok(None)` once the input is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>>;
}

/// Backend-specific interpretation of one input line.
pub trait LineDecoder: Send {
    fn decode(&self, line: Vec<u8>) -> Result<Record>;
}

/// Treats every line as one row holding one metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawLineDecoder;

impl LineDecoder for RawLineDecoder {
    fn decode(&self, line: Vec<u8>) -> Result<Record> {
        Ok(Record::new(line, 1))
    }
}

/// Newline-delimited source over any buffered reader. Blank lines are skipped.
pub struct LineSource<R, D> {
    reader: R,
    decoder: D,
    line_no: u64,
}

impl<R: BufRead + Send, D: LineDecoder> LineSource<R, D> {
    pub fn new(reader: R, decoder: D) -> Self {
        Self {
            reader,
            decoder,
            line_no: 0,
        }
    }

    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let mut line = Vec::new();
            if self.reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }
}

impl<R: BufRead + Send, D: LineDecoder> DataSource for LineSource<R, D> {
    fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(line) = self.read_line().context("failed to read input")? else {
            return Ok(None);
        };
        let line_no = self.line_no;
        self.decoder
            .decode(line)
            .map(Some)
            .with_context(|| format!("bad input on line {line_no}"))
    }
}

/// Open the configured input behind a large read buffer.
pub fn open_input(input: &InputSource) -> Result<Box<dyn BufRead + Send>> {
    match input {
        InputSource::Stdin => Ok(Box::new(BufReader::with_capacity(
            DEFAULT_READ_SIZE,
            io::stdin(),
        ))),
        InputSource::File(path) => {
            let file = File::open(path)
                .with_context(|| format!("cannot open file for read {}", path.display()))?;
            Ok(Box::new(BufReader::with_capacity(DEFAULT_READ_SIZE, file)))
        }
    }
}

/// Read-path work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub id: u64,
    /// Human-readable label statistics are grouped under.
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

pub trait QuerySource: Send {
    fn next_query(&mut self) -> Result<Option<Query>>;
}

/// Newline-delimited JSON queries. A missing or zero `id` becomes the
/// 1-based ordinal of the query in the stream.
pub struct JsonQuerySource<R> {
    reader: R,
    seen: u64,
    line_no: u64,
}

impl<R: BufRead + Send> JsonQuerySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            seen: 0,
            line_no: 0,
        }
    }
}

impl<R: BufRead + Send> QuerySource for JsonQuerySource<R> {
    fn next_query(&mut self) -> Result<Option<Query>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self
                .reader
                .read_line(&mut line)
                .context("failed to read queries")?
                == 0
            {
                return Ok(None);
            }
            self.line_no += 1;
            if !line.trim().is_empty() {
                break;
            }
        }

        let mut query: Query = serde_json::from_str(line.trim())
            .with_context(|| format!("bad query on line {}", self.line_no))?;
        self.seen += 1;
        if query.id == 0 {
            query.id = self.seen;
        }
        Ok(Some(query))
    }
}

#[cfg(test)]
#[path = "source_tests.rs"]
mod tests;
