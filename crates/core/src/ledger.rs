//! Ledger cache: a hash-of-hashes key/field store holding decimal strings,
//! and a typed view over the protocol's namespaces.
//!
//! | Key | Field | Value |
//! |---|---|---|
//! | `collateral:<token>` | user | raw token units, net of redemptions |
//! | `user:debt` | user | stablecoin debt (1e18) |
//! | `user:collateral_usd` | user | USD collateral snapshot (1e8) |
//! | `user:health_factor` | user | health factor (1e18) |
//! | `liquidatable` | user | health factor, present iff below 1.0 |
//! | `coin` | `total_supply` | outstanding stablecoin supply |
//! | `collateral` | `total_supply` | global USD collateral value |

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, I256, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::warn;

use crate::u256_math::clamp_non_negative;

const USER_DEBT: &str = "user:debt";
const USER_COLLATERAL_USD: &str = "user:collateral_usd";
const USER_HEALTH_FACTOR: &str = "user:health_factor";
const LIQUIDATABLE: &str = "liquidatable";
const COIN: &str = "coin";
const COLLATERAL: &str = "collateral";
const TOTAL_SUPPLY: &str = "total_supply";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("malformed value {value:?} at {key}/{field}")]
    Malformed {
        key: String,
        field: String,
        value: String,
    },

    #[error("increment overflows {key}/{field}")]
    Overflow { key: String, field: String },

    #[error("ledger backend error: {0}")]
    Backend(String),
}

/// Key/field store primitives. `hincr_by` is atomic per field; nothing spans keys.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, LedgerError>;

    /// Last writer wins.
    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), LedgerError>;

    /// Add `delta` to the field (missing reads as zero) and return the new value.
    async fn hincr_by(&self, key: &str, field: &str, delta: I256) -> Result<I256, LedgerError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, LedgerError>;

    /// Returns whether the field existed.
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, LedgerError>;
}

/// Process-local ledger store.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    hashes: DashMap<String, HashMap<String, String>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, LedgerError> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), LedgerError> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: I256) -> Result<I256, LedgerError> {
        // The entry guard holds the shard lock for the whole read-modify-write
        let mut hash = self.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(raw) => parse_signed(key, field, raw)?,
            None => I256::ZERO,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| LedgerError::Overflow {
                key: key.to_string(),
                field: field.to_string(),
            })?;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, LedgerError> {
        Ok(self
            .hashes
            .get(key)
            .map(|hash| hash.clone())
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, LedgerError> {
        Ok(self
            .hashes
            .get_mut(key)
            .map(|mut hash| hash.remove(field).is_some())
            .unwrap_or(false))
    }
}

fn parse_signed(key: &str, field: &str, raw: &str) -> Result<I256, LedgerError> {
    I256::from_dec_str(raw.trim()).map_err(|_| LedgerError::Malformed {
        key: key.to_string(),
        field: field.to_string(),
        value: raw.to_string(),
    })
}

/// Cache field name for a user or token address.
pub fn address_field(address: &Address) -> String {
    format!("{address:#x}")
}

fn collateral_key(token: &Address) -> String {
    format!("{COLLATERAL}:{token:#x}")
}

/// Typed access to the ledger namespaces.
///
/// Missing fields read as zero. Negative stored values read as zero.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    async fn read(&self, key: &str, field: &str) -> Result<Option<U256>, LedgerError> {
        match self.store.hget(key, field).await? {
            Some(raw) => Ok(Some(clamp_non_negative(parse_signed(key, field, &raw)?))),
            None => Ok(None),
        }
    }

    async fn read_or_zero(&self, key: &str, field: &str) -> Result<U256, LedgerError> {
        Ok(self.read(key, field).await?.unwrap_or(U256::ZERO))
    }

    /// Parse every field of a per-user hash. Malformed entries are logged and skipped.
    async fn read_users(&self, key: &str) -> Result<Vec<(Address, U256)>, LedgerError> {
        let entries = self.store.hgetall(key).await?;
        let mut users = Vec::with_capacity(entries.len());
        for (field, raw) in entries {
            let Ok(user) = Address::from_str(&field) else {
                warn!(key, field = %field, "Skipping ledger entry with invalid address");
                continue;
            };
            match parse_signed(key, &field, &raw) {
                Ok(value) => users.push((user, clamp_non_negative(value))),
                Err(e) => warn!(key, user = %user, error = %e, "Skipping malformed ledger entry"),
            }
        }
        Ok(users)
    }

    // === Collateral balances ===

    pub async fn collateral_balance(&self, token: &Address, user: &Address) -> Result<U256, LedgerError> {
        self.read_or_zero(&collateral_key(token), &address_field(user))
            .await
    }

    pub async fn add_collateral(
        &self,
        token: &Address,
        user: &Address,
        delta: I256,
    ) -> Result<I256, LedgerError> {
        self.store
            .hincr_by(&collateral_key(token), &address_field(user), delta)
            .await
    }

    pub async fn set_collateral_balance(
        &self,
        token: &Address,
        user: &Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.store
            .hset(&collateral_key(token), &address_field(user), amount.to_string())
            .await
    }

    pub async fn collateral_balances(&self, token: &Address) -> Result<Vec<(Address, U256)>, LedgerError> {
        self.read_users(&collateral_key(token)).await
    }

    // === Debt ===

    pub async fn debt(&self, user: &Address) -> Result<U256, LedgerError> {
        self.read_or_zero(USER_DEBT, &address_field(user)).await
    }

    pub async fn add_debt(&self, user: &Address, delta: I256) -> Result<I256, LedgerError> {
        self.store
            .hincr_by(USER_DEBT, &address_field(user), delta)
            .await
    }

    pub async fn set_debt(&self, user: &Address, debt: U256) -> Result<(), LedgerError> {
        self.store
            .hset(USER_DEBT, &address_field(user), debt.to_string())
            .await
    }

    pub async fn debts(&self) -> Result<HashMap<Address, U256>, LedgerError> {
        Ok(self.read_users(USER_DEBT).await?.into_iter().collect())
    }

    // === USD snapshots and health ===

    pub async fn collateral_usd(&self, user: &Address) -> Result<U256, LedgerError> {
        self.read_or_zero(USER_COLLATERAL_USD, &address_field(user))
            .await
    }

    pub async fn set_collateral_usd(&self, user: &Address, usd: U256) -> Result<(), LedgerError> {
        self.store
            .hset(USER_COLLATERAL_USD, &address_field(user), usd.to_string())
            .await
    }

    pub async fn health_factor(&self, user: &Address) -> Result<Option<U256>, LedgerError> {
        self.read(USER_HEALTH_FACTOR, &address_field(user)).await
    }

    pub async fn set_health_factor(&self, user: &Address, hf: U256) -> Result<(), LedgerError> {
        self.store
            .hset(USER_HEALTH_FACTOR, &address_field(user), hf.to_string())
            .await
    }

    pub async fn health_factors(&self) -> Result<Vec<(Address, U256)>, LedgerError> {
        self.read_users(USER_HEALTH_FACTOR).await
    }

    // === Liquidatable set ===

    pub async fn mark_liquidatable(&self, user: &Address, hf: U256) -> Result<(), LedgerError> {
        self.store
            .hset(LIQUIDATABLE, &address_field(user), hf.to_string())
            .await
    }

    pub async fn clear_liquidatable(&self, user: &Address) -> Result<bool, LedgerError> {
        self.store.hdel(LIQUIDATABLE, &address_field(user)).await
    }

    pub async fn liquidatable(&self) -> Result<Vec<(Address, U256)>, LedgerError> {
        self.read_users(LIQUIDATABLE).await
    }

    // === Global totals ===

    pub async fn coin_supply(&self) -> Result<U256, LedgerError> {
        self.read_or_zero(COIN, TOTAL_SUPPLY).await
    }

    pub async fn add_coin_supply(&self, delta: I256) -> Result<I256, LedgerError> {
        self.store.hincr_by(COIN, TOTAL_SUPPLY, delta).await
    }

    pub async fn set_coin_supply(&self, supply: U256) -> Result<(), LedgerError> {
        self.store
            .hset(COIN, TOTAL_SUPPLY, supply.to_string())
            .await
    }

    pub async fn collateral_supply(&self) -> Result<U256, LedgerError> {
        self.read_or_zero(COLLATERAL, TOTAL_SUPPLY).await
    }

    pub async fn add_collateral_supply(&self, delta: I256) -> Result<I256, LedgerError> {
        self.store.hincr_by(COLLATERAL, TOTAL_SUPPLY, delta).await
    }

    pub async fn set_collateral_supply(&self, usd: U256) -> Result<(), LedgerError> {
        self.store
            .hset(COLLATERAL, TOTAL_SUPPLY, usd.to_string())
            .await
    }
}
