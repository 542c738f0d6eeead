use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use parking_lot::Mutex;

/// Write buffer of the latency log (4 MiB).
const DEFAULT_WRITE_SIZE: usize = 4 << 20;

/// One completed operation: its ID and latency in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyEntry {
    pub id: u64,
    pub latency_ms: f64,
}

impl LatencyEntry {
    pub fn new(id: u64, latency: Duration) -> Self {
        Self {
            id,
            latency_ms: latency.as_secs_f64() * 1000.0,
        }
    }
}

/// `<id> <latency-ms with 3 decimals>\n`
impl fmt::Display for LatencyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {:.3}", self.id, self.latency_ms)
    }
}

/// Latency log shared by all workers.
///
/// Lines are written whole under one mutex, so they never interleave, but
/// their order follows lock acquisition rather than operation IDs. Nothing is
/// flushed until [`LatencyLog::flush`].
pub struct LatencyLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl LatencyLog {
    /// Create or truncate the log at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::with_capacity(DEFAULT_WRITE_SIZE, file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: LatencyEntry) -> io::Result<()> {
        let line = entry.to_string();
        self.writer.lock().write_all(line.as_bytes())
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

#[cfg(test)]
#[path = "latency_tests.rs"]
mod tests;
