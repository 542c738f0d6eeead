use std::process::ExitCode;

use clap::Parser;

mod commands;
mod printer;
mod settings;

use commands::Command;
use tsload_runtime::logging;

#[derive(Debug, Parser)]
#[command(
    name = "tsload",
    version,
    about = "Load and query benchmarks for time-series databases",
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

fn main() -> ExitCode {
    logging::init().ok();

    let cli = Cli::parse();
    match cli.command {
        Command::Load(args) => commands::load::run(args),
        Command::Query(args) => commands::query::run(args),
        Command::Targets => commands::targets::run(),
    }
}
