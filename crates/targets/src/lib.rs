pub mod influx;
mod registry;
pub mod victoriametrics;

pub use registry::{UnknownTarget, get_target, supported_formats};
