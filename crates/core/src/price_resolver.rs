//! Historical price resolution: pinned `(token, block)` prices first, live feed on a miss.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anchor_api::{PriceFeedError, PriceSource};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::records::PricePin;
use crate::repository::{Repository, RepositoryError};

#[derive(Debug, Error)]
pub enum PriceError {
    #[error(transparent)]
    Feed(#[from] PriceFeedError),

    #[error("price pin store: {0}")]
    Repository(#[from] RepositoryError),
}

/// Blocks behind the newest resolved one whose pins stay cached in process.
pub const PIN_CACHE_BLOCKS: u64 = 128;

/// Resolves token USD prices, pinning the first price seen for each block.
pub struct PriceResolver {
    repository: Arc<dyn Repository>,
    feed: Arc<dyn PriceSource>,
    /// Recent pins; older ones are read back from the repository
    pinned: DashMap<(String, u64), String>,
    newest_block: AtomicU64,
}

impl std::fmt::Debug for PriceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceResolver")
            .field("feed", &self.feed.name())
            .field("pinned", &self.pinned.len())
            .finish()
    }
}

impl PriceResolver {
    pub fn new(repository: Arc<dyn Repository>, feed: Arc<dyn PriceSource>) -> Self {
        Self {
            repository,
            feed,
            pinned: DashMap::new(),
            newest_block: AtomicU64::new(0),
        }
    }

    /// Price of `token` at `block_number`, as a decimal string.
    ///
    /// The same block always resolves to the same price.
    #[instrument(skip(self))]
    pub async fn resolve(&self, token: &str, block_number: u64) -> Result<String, PriceError> {
        let key = (token.to_string(), block_number);
        if let Some(price) = self.pinned.get(&key) {
            return Ok(price.clone());
        }

        if let Some(pin) = self.repository.price_pin(token, block_number).await? {
            self.remember(key, &pin.price_usd);
            return Ok(pin.price_usd);
        }

        let live = self.feed.usd_price(token).await?;
        let stored = self
            .repository
            .save_price_pin(PricePin {
                token_name: token.to_string(),
                block_number,
                price_usd: live,
            })
            .await?;

        debug!(token, block_number, price = %stored.price_usd, "Pinned price");
        self.remember(key, &stored.price_usd);
        Ok(stored.price_usd)
    }

    /// Cache a pin and evict those more than `PIN_CACHE_BLOCKS` behind the newest block.
    fn remember(&self, key: (String, u64), price: &str) {
        let block = key.1;
        let previous = self.newest_block.fetch_max(block, Ordering::Relaxed);
        if block.saturating_add(PIN_CACHE_BLOCKS) <= previous {
            return;
        }
        self.pinned.insert(key, price.to_string());

        if block > previous {
            self.pinned
                .retain(|(_, pinned), _| pinned.saturating_add(PIN_CACHE_BLOCKS) > block);
        }
    }

    /// Number of pins cached in process.
    pub fn cached_pins(&self) -> usize {
        self.pinned.len()
    }

    /// Current price, bypassing pins.
    pub async fn live(&self, token: &str) -> Result<String, PriceError> {
        Ok(self.feed.usd_price(token).await?)
    }

    pub fn feed(&self) -> &Arc<dyn PriceSource> {
        &self.feed
    }
}
