//! Collateral token registry.
//!
//! Built once from configuration and shared by handle; there is no global
//! instance.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An accepted collateral token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralToken {
    /// Price feed symbol (e.g., "ETH", "BTC")
    pub name: String,
    /// Token contract address
    pub address: Address,
}

impl CollateralToken {
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

/// Collateral tokens with lookups by address and by name.
#[derive(Debug, Clone, Default)]
pub struct CollateralRegistry {
    tokens: Vec<CollateralToken>,
    by_address: HashMap<Address, usize>,
    by_name: HashMap<String, usize>,
}

impl CollateralRegistry {
    /// Build the registry. A repeated address or name keeps its first entry.
    pub fn new(tokens: impl IntoIterator<Item = CollateralToken>) -> Self {
        let mut registry = Self::default();
        for token in tokens {
            if registry.by_address.contains_key(&token.address)
                || registry.by_name.contains_key(&token.name)
            {
                continue;
            }
            let index = registry.tokens.len();
            registry.by_address.insert(token.address, index);
            registry.by_name.insert(token.name.clone(), index);
            registry.tokens.push(token);
        }
        registry
    }

    pub fn get_by_address(&self, address: &Address) -> Option<&CollateralToken> {
        self.by_address.get(address).map(|&i| &self.tokens[i])
    }

    pub fn get_by_name(&self, name: &str) -> Option<&CollateralToken> {
        self.by_name.get(name).map(|&i| &self.tokens[i])
    }

    /// Tokens in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &CollateralToken> {
        self.tokens.iter()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
