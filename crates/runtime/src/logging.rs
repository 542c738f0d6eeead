use std::{
    fs::{File, OpenOptions},
    io::{self, LineWriter, Write},
    path::Path,
    sync::OnceLock,
};

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use parking_lot::Mutex;

use crate::config::{PROGRAM_LOG_FILE, PROGRAM_LOG_LEVEL};

enum Sink {
    Stderr,
    /// Written line by line so an interrupted run keeps what it logged.
    File(Mutex<LineWriter<File>>),
}

/// `<local time> <LEVEL> [target] message`, one line per record.
pub struct Logger {
    level: Level,
    sink: Sink,
}

impl Logger {
    pub fn stderr(level: Level) -> Self {
        Self {
            level,
            sink: Sink::Stderr,
        }
    }

    /// Append to `path`, creating it if needed.
    pub fn file(level: Level, path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            level,
            sink: Sink::File(Mutex::new(LineWriter::new(file))),
        })
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!(
            "{} {:<5} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            short_target(record.target()),
            record.args()
        );

        match &self.sink {
            Sink::Stderr => eprintln!("{line}"),
            Sink::File(out) => {
                let _ = writeln!(out.lock(), "{line}");
            }
        }
    }

    fn flush(&self) {
        if let Sink::File(out) = &self.sink {
            let _ = out.lock().flush();
        }
    }
}

/// `tsload_core::runner` logs as `core::runner`.
fn short_target(target: &str) -> &str {
    target.strip_prefix("tsload_").unwrap_or(target)
}

/// Level named by `raw`; unset, unknown and `off` all mean `info`, the level
/// progress reports are written at.
pub fn parse_level(raw: Option<&str>) -> Level {
    raw.and_then(|s| s.parse::<LevelFilter>().ok())
        .and_then(|filter| filter.to_level())
        .unwrap_or(Level::Info)
}

/// Install the process logger from `TSLOAD_LOG_LEVEL` and `TSLOAD_LOG_FILE`.
pub fn init() -> Result<(), SetLoggerError> {
    let level = parse_level(std::env::var(PROGRAM_LOG_LEVEL).ok().as_deref());

    let logger = match std::env::var_os(PROGRAM_LOG_FILE) {
        Some(path) if !path.is_empty() => {
            let path = Path::new(&path);
            Logger::file(level, path).unwrap_or_else(|e| {
                eprintln!(
                    "cannot open log file {}: {e}; logging to stderr",
                    path.display()
                );
                Logger::stderr(level)
            })
        }
        _ => Logger::stderr(level),
    };

    install(logger)
}

/// Install `logger` as the global logger. Only the first call has an effect.
pub fn install(logger: Logger) -> Result<(), SetLoggerError> {
    static LOGGER: OnceLock<Logger> = OnceLock::new();

    let level = logger.level;
    if LOGGER.set(logger).is_err() {
        return Ok(());
    }

    if let Some(installed) = LOGGER.get() {
        log::set_logger(installed)?;
        log::set_max_level(level.to_level_filter());
    }

    Ok(())
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
