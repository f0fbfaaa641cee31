use thiserror::Error;

mod app_config;
mod config;
pub mod hashtags;
pub mod keys;
pub mod platform;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use keys::{load_key_pools, KeyPoolConfig, KeyPoolsFile};
pub use platform::{Handle, MetricCounts, Platform};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read key pool file {path}: {source}")]
    KeysFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse key pool file: {0}")]
    KeysFileParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}
