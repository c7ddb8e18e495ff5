//! Layered config loading: defaults, then an optional TOML file, then
//! environment variables.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use tracing::{info, warn};

use super::{ConfigError, IndexerConfig};
use crate::assets::CollateralToken;

/// Path of the optional TOML file.
pub const CONFIG_PATH_VAR: &str = "INDEXER_CONFIG";

/// Load from the process environment. Call after `dotenvy` has run.
pub fn load_config() -> Result<IndexerConfig, ConfigError> {
    load_with(|name| std::env::var(name).ok())
}

/// Load using `env` to look up variables.
pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<IndexerConfig, ConfigError> {
    let lookup = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    let mut config = match lookup(CONFIG_PATH_VAR) {
        Some(path) => {
            info!(path = %path, "Loading configuration file");
            IndexerConfig::from_file(path.trim())?
        }
        None => IndexerConfig::default(),
    };

    if let Some(url) = lookup("WS_RPC_URL") {
        config.chain.ws_url = url.trim().to_string();
    }
    if let Some(raw) = lookup("CONTRACT_ADDRESS") {
        config.chain.contract_address = Some(parse_address("CONTRACT_ADDRESS", &raw)?);
    }
    if let Some(tokens) = collateral_from_env(&lookup)? {
        config.collateral = tokens;
    }

    override_parsed(&lookup, "NUM_LOG_WORKERS", &mut config.workers.decoder_workers);
    override_parsed(&lookup, "NUM_LEDGER_WORKERS", &mut config.workers.ledger_workers);
    override_parsed(&lookup, "METRIC_QUEUE_CAPACITY", &mut config.workers.metric_queue_capacity);
    override_parsed(&lookup, "BACKFILL_CHUNK_SIZE", &mut config.chain.backfill_chunk_size);
    override_parsed(
        &lookup,
        "CIRCUIT_BREAKER_THRESHOLD",
        &mut config.price_feed.circuit_breaker_threshold,
    );
    override_duration(
        &lookup,
        "LIQUIDATIONS_SCAN_INTERVAL",
        &mut config.scanner.scan_interval_secs,
    );
    override_duration(
        &lookup,
        "CIRCUIT_BREAKER_COOLDOWN",
        &mut config.price_feed.circuit_breaker_cooldown_secs,
    );
    override_duration(&lookup, "PRICE_FEED_TIMEOUT", &mut config.price_feed.timeout_secs);

    if let Some(url) = lookup("PRICE_FEED_API_URL") {
        config.price_feed.url = url.trim().to_string();
    }
    if let Some(url) = lookup("FALLBACK_PRICE_FEED_API_URL") {
        config.price_feed.fallback_url = Some(url.trim().to_string());
    }

    config.validate()?;
    Ok(config)
}

/// Pair `COLLATERAL_TOKEN_NAMES` with `COLLATERAL_TOKEN_ADDRESSES` by position.
fn collateral_from_env(
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<Vec<CollateralToken>>, ConfigError> {
    let names = lookup("COLLATERAL_TOKEN_NAMES");
    let addresses = lookup("COLLATERAL_TOKEN_ADDRESSES");
    if names.is_none() && addresses.is_none() {
        return Ok(None);
    }

    let names = split_list(names.as_deref().unwrap_or_default());
    let addresses = split_list(addresses.as_deref().unwrap_or_default());
    if names.len() != addresses.len() {
        return Err(ConfigError::TokenMismatch {
            names: names.len(),
            addresses: addresses.len(),
        });
    }

    names
        .into_iter()
        .zip(addresses)
        .map(|(name, raw)| {
            let address = parse_address("COLLATERAL_TOKEN_ADDRESSES", raw)?;
            Ok(CollateralToken::new(name, address))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn split_list(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_address(var: &'static str, raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw.trim()).map_err(|_| ConfigError::InvalidAddress {
        var,
        value: raw.to_string(),
    })
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str, target: &mut T)
where
    T: FromStr + std::fmt::Display,
{
    let Some(raw) = lookup(var) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(var, value = %raw, default = %target, "Invalid value, keeping default"),
    }
}

fn override_duration(lookup: &impl Fn(&str) -> Option<String>, var: &str, target_secs: &mut u64) {
    let Some(raw) = lookup(var) else {
        return;
    };
    match parse_duration(&raw) {
        Some(duration) => *target_secs = duration.as_secs(),
        None => warn!(var, value = %raw, default_secs = *target_secs, "Invalid duration, keeping default"),
    }
}

/// Parse `90`, `30s`, `15m` or `1h`. Bare numbers are seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return None,
    };
    value.checked_mul(multiplier).map(Duration::from_secs)
}
