use std::{
    io::{self, Write},
    process::ExitCode,
};

use anyhow::Result;
use tsload_targets::{get_target, supported_formats};

use crate::commands::finish;

pub fn run() -> ExitCode {
    finish("targets", execute())
}

fn execute() -> Result<ExitCode> {
    write_targets(&mut io::stdout().lock())?;
    Ok(ExitCode::SUCCESS)
}

/// Each format followed by the defaults it supplies for unset settings.
fn write_targets(out: &mut impl Write) -> Result<()> {
    for name in supported_formats() {
        let target = get_target(name)?;
        writeln!(out, "{name}")?;

        for flag in target.flags() {
            let default = if flag.default.is_empty() {
                "-"
            } else {
                flag.default
            };
            writeln!(out, "  {:<16} {:<32} {}", flag.name, default, flag.help)?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "targets_tests.rs"]
mod tests;
