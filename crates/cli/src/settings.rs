use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Args;
use log::debug;
use tsload_core::{RunnerConfig, Target, parse_urls};
use tsload_runtime::{default_config_path, load_json_config};

/// Flags shared by `load` and `query`.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Target database format
    #[arg(long, default_value = "victoriametrics")]
    pub format: String,

    /// JSON config file [default: $XDG_CONFIG_HOME/tsload/config.json]
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Comma-separated list of endpoint URLs
    #[arg(long)]
    pub urls: Option<String>,

    /// Number of parallel workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Input file; stdin when omitted
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// File to write per-operation latencies
    #[arg(long, value_name = "PATH")]
    pub latencies_file: Option<PathBuf>,

    /// Append a JSON summary of the run to this file
    #[arg(long, value_name = "PATH")]
    pub results_file: Option<PathBuf>,

    /// Database name handed to the target
    #[arg(long)]
    pub db_name: Option<String>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl CommonArgs {
    /// Defaults, then the config file, then these flags, then the target's
    /// own defaults for anything still unset.
    pub fn resolve(&self, target: &dyn Target, url_flag: &str) -> Result<RunnerConfig> {
        let mut config = read_config(self.config.as_deref())?;
        self.apply(&mut config);
        apply_target_defaults(&mut config, target, url_flag);
        Ok(config)
    }

    fn apply(&self, config: &mut RunnerConfig) {
        if let Some(urls) = &self.urls {
            config.urls = parse_urls(urls);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(file) = &self.file {
            config.file = Some(file.clone());
        }
        if let Some(path) = &self.latencies_file {
            config.latencies_file = Some(path.clone());
        }
        if let Some(name) = &self.db_name {
            config.db_name = name.clone();
        }
    }
}

/// An explicit path must exist; the default location may be absent.
pub fn read_config(explicit: Option<&Path>) -> Result<RunnerConfig> {
    match explicit {
        Some(path) => load_json_config(path)
            .with_context(|| format!("failed to read config {}", path.display()))?
            .ok_or_else(|| anyhow!("config file {} not found", path.display())),
        None => {
            let path = default_config_path();
            let config = load_json_config(&path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            if config.is_none() {
                debug!("using built-in defaults");
            }
            Ok(config.unwrap_or_default())
        }
    }
}

fn apply_target_defaults(config: &mut RunnerConfig, target: &dyn Target, url_flag: &str) {
    if config.urls.is_empty()
        && let Some(urls) = target
            .flag_default(url_flag)
            .or_else(|| target.flag_default("urls"))
    {
        config.urls = parse_urls(urls);
    }

    if config.latencies_file.is_none()
        && let Some(path) = target.flag_default("latencies-file")
        && !path.is_empty()
    {
        config.latencies_file = Some(PathBuf::from(path));
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
