use thiserror::Error;
use tsload_core::Target;

use crate::victoriametrics::VictoriaMetrics;

type Constructor = fn() -> Box<dyn Target>;

/// Every backend this build knows, by format name.
static TARGETS: &[(&str, Constructor)] = &[(VictoriaMetrics::NAME, victoriametrics)];

fn victoriametrics() -> Box<dyn Target> {
    Box::new(VictoriaMetrics)
}

#[derive(Debug, Error)]
#[error("unknown target `{name}` (supported formats: {supported})")]
pub struct UnknownTarget {
    pub name: String,
    pub supported: String,
}

pub fn supported_formats() -> Vec<&'static str> {
    TARGETS.iter().map(|(name, _)| *name).collect()
}

pub fn get_target(name: &str) -> Result<Box<dyn Target>, UnknownTarget> {
    TARGETS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, make)| make())
        .ok_or_else(|| UnknownTarget {
            name: name.to_owned(),
            supported: supported_formats().join(", "),
        })
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
