//! Indexer configuration.

mod indexer;
mod loader;

use thiserror::Error;

pub use indexer::{ChainConfig, IndexerConfig, PriceFeedConfig, ScannerConfig, WorkerConfig};
pub use loader::{load_config, load_with, parse_duration, CONFIG_PATH_VAR};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("{var} is not a valid address: {value:?}")]
    InvalidAddress { var: &'static str, value: String },

    #[error("{names} collateral token names but {addresses} addresses")]
    TokenMismatch { names: usize, addresses: usize },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
