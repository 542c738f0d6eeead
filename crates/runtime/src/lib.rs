mod config;
pub mod logging;
pub mod results;

pub use config::{
    CONFIG_ENV, CONFIG_FILE_NAME, PROGRAM_LOG_FILE, PROGRAM_LOG_LEVEL, PROGRAM_NAME, config_dir,
    default_config_path, load_json_config,
};

pub use logging::init;
