//! Indexer runtime configuration.

use std::path::Path;
use std::time::Duration;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ConfigError;
use crate::assets::{CollateralRegistry, CollateralToken};

/// Main configuration structure. Every section has defaults; only the chain
/// endpoint and contract address must be supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default)]
    pub chain: ChainConfig,

    /// Accepted collateral tokens, in valuation order
    #[serde(default)]
    pub collateral: Vec<CollateralToken>,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub price_feed: PriceFeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// WebSocket RPC endpoint
    #[serde(default)]
    pub ws_url: String,

    /// Stablecoin engine contract emitting the indexed events
    #[serde(default)]
    pub contract_address: Option<Address>,

    /// Blocks per `eth_getLogs` request while catching up
    #[serde(default = "default_backfill_chunk_size")]
    pub backfill_chunk_size: u64,
}

fn default_backfill_chunk_size() -> u64 {
    5000
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            contract_address: None,
            backfill_chunk_size: default_backfill_chunk_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Tasks decoding and persisting chain logs
    #[serde(default = "default_workers")]
    pub decoder_workers: usize,

    /// Tasks applying ledger metrics, one queue shard each
    #[serde(default = "default_workers")]
    pub ledger_workers: usize,

    /// Total metric queue capacity across shards
    #[serde(default = "default_metric_queue_capacity")]
    pub metric_queue_capacity: usize,
}

fn default_workers() -> usize {
    4
}
fn default_metric_queue_capacity() -> usize {
    500
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            decoder_workers: default_workers(),
            ledger_workers: default_workers(),
            metric_queue_capacity: default_metric_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

fn default_scan_interval() -> u64 {
    3600
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
        }
    }
}

impl ScannerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    /// Spot price API base; requests go to `<url>/<SYMBOL>-USD`
    #[serde(default = "default_price_feed_url")]
    pub url: String,

    /// Ticker list API used while the primary is failing
    #[serde(default)]
    pub fallback_url: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Consecutive primary failures before the breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    #[serde(default = "default_breaker_cooldown")]
    pub circuit_breaker_cooldown_secs: u64,
}

fn default_price_feed_url() -> String {
    "https://api.coinbase.com/v2/prices".to_string()
}
fn default_timeout() -> u64 {
    10
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    60
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            url: default_price_feed_url(),
            fallback_url: None,
            timeout_secs: default_timeout(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_cooldown_secs: default_breaker_cooldown(),
        }
    }
}

impl PriceFeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_secs)
    }
}

impl IndexerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check required fields and raise zero sizes to 1.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.chain.ws_url.trim().is_empty() {
            return Err(ConfigError::Missing("WS_RPC_URL"));
        }
        if self.chain.contract_address.is_none() {
            return Err(ConfigError::Missing("CONTRACT_ADDRESS"));
        }

        raise_zero("decoder_workers", &mut self.workers.decoder_workers);
        raise_zero("ledger_workers", &mut self.workers.ledger_workers);
        raise_zero("metric_queue_capacity", &mut self.workers.metric_queue_capacity);

        if self.chain.backfill_chunk_size == 0 {
            warn!("backfill_chunk_size is 0, using 1");
            self.chain.backfill_chunk_size = 1;
        }
        if self.price_feed.circuit_breaker_threshold == 0 {
            warn!("circuit_breaker_threshold is 0, using 1");
            self.price_feed.circuit_breaker_threshold = 1;
        }
        if self.scanner.scan_interval_secs == 0 {
            warn!(default = default_scan_interval(), "scan_interval is 0, using default");
            self.scanner.scan_interval_secs = default_scan_interval();
        }
        if self.collateral.is_empty() {
            warn!("No collateral tokens configured");
        }
        Ok(())
    }

    /// Contract address after validation.
    pub fn contract_address(&self) -> Result<Address, ConfigError> {
        self.chain
            .contract_address
            .ok_or(ConfigError::Missing("CONTRACT_ADDRESS"))
    }

    pub fn registry(&self) -> CollateralRegistry {
        CollateralRegistry::new(self.collateral.iter().cloned())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!(
            contract = ?self.chain.contract_address,
            backfill_chunk_size = self.chain.backfill_chunk_size,
            "Chain configuration"
        );
        for token in &self.collateral {
            info!(token = %token.name, address = %token.address, "Collateral token");
        }
        info!(
            decoder_workers = self.workers.decoder_workers,
            ledger_workers = self.workers.ledger_workers,
            metric_queue_capacity = self.workers.metric_queue_capacity,
            "Worker pools"
        );
        info!(
            url = %self.price_feed.url,
            fallback = self.price_feed.fallback_url.as_deref().unwrap_or("none"),
            threshold = self.price_feed.circuit_breaker_threshold,
            cooldown_secs = self.price_feed.circuit_breaker_cooldown_secs,
            "Price feed"
        );
        info!(
            scan_interval_secs = self.scanner.scan_interval_secs,
            "Liquidation scanner"
        );
    }
}

fn raise_zero(name: &str, value: &mut usize) {
    if *value == 0 {
        warn!(field = name, "Zero is not allowed, using 1");
        *value = 1;
    }
}
