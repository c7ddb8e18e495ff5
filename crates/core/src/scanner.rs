//! Periodic solvency scan.
//!
//! Revalues every user's collateral at live prices, refreshes health factors
//! and maintains the liquidatable set. Drift left by the ledger workers is
//! overwritten on every pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use anchor_api::PriceSource;
use anyhow::{Context, Result};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::assets::{CollateralRegistry, CollateralToken};
use crate::ledger::{Ledger, LedgerError};
use crate::u256_math::{health_factor, is_liquidatable, token_amount_in_usd};

/// Totals from one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Users holding a collateral entry for any token
    pub users: usize,
    pub total_collateral_usd: U256,
    /// Users marked liquidatable on this pass
    pub liquidatable: usize,
    /// Users removed from the liquidatable set
    pub recovered: usize,
    /// Users skipped after a cache error
    pub skipped: usize,
}

pub struct LiquidationScanner {
    ledger: Ledger,
    feed: Arc<dyn PriceSource>,
    registry: Arc<CollateralRegistry>,
}

impl std::fmt::Debug for LiquidationScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidationScanner")
            .field("feed", &self.feed.name())
            .field("tokens", &self.registry.len())
            .finish()
    }
}

impl LiquidationScanner {
    pub fn new(ledger: Ledger, feed: Arc<dyn PriceSource>, registry: Arc<CollateralRegistry>) -> Self {
        Self {
            ledger,
            feed,
            registry,
        }
    }

    /// One full pass. A price failure aborts before anything is written.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ScanReport> {
        let prices = self.live_prices().await?;

        let mut per_user: HashMap<Address, U256> = HashMap::new();
        let mut total = U256::ZERO;
        for (token, price) in &prices {
            let balances = self
                .ledger
                .collateral_balances(&token.address)
                .await
                .with_context(|| format!("failed to read {} balances", token.name))?;

            for (user, balance) in balances {
                let usd = token_amount_in_usd(balance, price)
                    .with_context(|| format!("invalid {} price {price:?}", token.name))?;
                let entry = per_user.entry(user).or_default();
                *entry = entry.saturating_add(usd);
                total = total.saturating_add(usd);
            }
        }

        self.ledger
            .set_collateral_supply(total)
            .await
            .context("failed to write collateral supply")?;

        let debts = self.ledger.debts().await.context("failed to read debts")?;

        let mut report = ScanReport {
            users: per_user.len(),
            total_collateral_usd: total,
            ..Default::default()
        };
        for (user, collateral_usd) in per_user {
            match self
                .refresh_user(&user, collateral_usd, debts.get(&user).copied())
                .await
            {
                Ok(UserState::Liquidatable) => report.liquidatable += 1,
                Ok(UserState::Recovered) => report.recovered += 1,
                Ok(UserState::Healthy) => {}
                Err(e) => {
                    warn!(user = %user, error = %e, "Skipping user in scan");
                    report.skipped += 1;
                }
            }
        }

        info!(
            users = report.users,
            total_collateral_usd = %report.total_collateral_usd,
            liquidatable = report.liquidatable,
            recovered = report.recovered,
            skipped = report.skipped,
            "Liquidation scan complete"
        );
        Ok(report)
    }

    async fn live_prices(&self) -> Result<Vec<(&CollateralToken, String)>> {
        let mut prices = Vec::with_capacity(self.registry.len());
        for token in self.registry.iter() {
            let price = self
                .feed
                .usd_price(&token.name)
                .await
                .with_context(|| format!("live price unavailable for {}", token.name))?;
            debug!(token = %token.name, price = %price, "Live price");
            prices.push((token, price));
        }
        Ok(prices)
    }

    async fn refresh_user(
        &self,
        user: &Address,
        collateral_usd: U256,
        debt: Option<U256>,
    ) -> Result<UserState, LedgerError> {
        self.ledger.set_collateral_usd(user, collateral_usd).await?;

        let Some(debt) = debt else {
            let removed = self.ledger.clear_liquidatable(user).await?;
            return Ok(if removed { UserState::Recovered } else { UserState::Healthy });
        };

        let hf = health_factor(collateral_usd, debt);
        self.ledger.set_health_factor(user, hf).await?;

        if is_liquidatable(hf) {
            self.ledger.mark_liquidatable(user, hf).await?;
            debug!(user = %user, health_factor = %hf, "User liquidatable");
            Ok(UserState::Liquidatable)
        } else if self.ledger.clear_liquidatable(user).await? {
            debug!(user = %user, health_factor = %hf, "User no longer liquidatable");
            Ok(UserState::Recovered)
        } else {
            Ok(UserState::Healthy)
        }
    }

    /// Scan every `period`, starting one period from now. Failed passes are
    /// logged and retried on the next tick.
    pub async fn run(self, period: Duration) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period = ?period, "Liquidation scanner scheduled");

        loop {
            ticker.tick().await;
            if let Err(e) = self.scan().await {
                error!(error = format!("{e:#}"), "Liquidation scan aborted");
            }
        }
    }
}

enum UserState {
    Liquidatable,
    Recovered,
    Healthy,
}
