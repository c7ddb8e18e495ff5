//! Ledger update workers: apply queued metrics to the ledger cache.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::assets::CollateralRegistry;
use crate::ledger::{Ledger, LedgerError};
use crate::metric::{Asset, LedgerMetric, Operation};
use crate::price_resolver::{PriceError, PriceResolver};
use crate::u256_math::{health_factor, to_signed, token_amount_in_usd, MathError};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("collateral metric without a token")]
    MissingToken,

    #[error("unknown collateral token {0}")]
    UnknownToken(Address),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Price(#[from] PriceError),

    #[error(transparent)]
    Math(#[from] MathError),
}

/// Applies ledger metrics for the users of one queue shard.
#[derive(Clone)]
pub struct LedgerWorker {
    id: usize,
    ledger: Ledger,
    resolver: Arc<PriceResolver>,
    registry: Arc<CollateralRegistry>,
}

impl std::fmt::Debug for LedgerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerWorker").field("id", &self.id).finish()
    }
}

impl LedgerWorker {
    pub fn new(
        id: usize,
        ledger: Ledger,
        resolver: Arc<PriceResolver>,
        registry: Arc<CollateralRegistry>,
    ) -> Self {
        Self {
            id,
            ledger,
            resolver,
            registry,
        }
    }

    /// Apply one metric.
    ///
    /// Balance increments are atomic per field; the follow-up USD and health
    /// factor writes are not rolled back if a later step fails.
    #[instrument(skip(self, metric), fields(worker = self.id, user = %metric.user, block = metric.block_number))]
    pub async fn apply(&self, metric: &LedgerMetric) -> Result<(), ApplyError> {
        match metric.asset {
            Asset::Stablecoin => self.apply_stablecoin(metric).await,
            Asset::Collateral => self.apply_collateral(metric).await,
        }
    }

    async fn apply_stablecoin(&self, metric: &LedgerMetric) -> Result<(), ApplyError> {
        let delta = metric.signed_amount()?;
        self.ledger.add_coin_supply(delta).await?;
        self.ledger.add_debt(&metric.user, delta).await?;

        let collateral_usd = self.ledger.collateral_usd(&metric.user).await?;
        self.refresh_health_factor(&metric.user, collateral_usd)
            .await
    }

    async fn apply_collateral(&self, metric: &LedgerMetric) -> Result<(), ApplyError> {
        let token_address = metric.token.ok_or(ApplyError::MissingToken)?;
        let token = self
            .registry
            .get_by_address(&token_address)
            .ok_or(ApplyError::UnknownToken(token_address))?;

        // Price the moved amount before touching any balance
        let price = self.resolver.resolve(&token.name, metric.block_number).await?;
        let usd = to_signed(token_amount_in_usd(metric.amount, &price)?)?;
        let delta_usd = match metric.operation {
            Operation::Add => usd,
            Operation::Subtract => -usd,
        };

        self.ledger
            .add_collateral(&token.address, &metric.user, metric.signed_amount()?)
            .await?;

        let mut total_usd = U256::ZERO;
        for collateral in self.registry.iter() {
            let balance = self
                .ledger
                .collateral_balance(&collateral.address, &metric.user)
                .await?;
            if balance.is_zero() {
                continue;
            }
            let price = if collateral.address == token.address {
                price.clone()
            } else {
                self.resolver
                    .resolve(&collateral.name, metric.block_number)
                    .await?
            };
            total_usd = total_usd.saturating_add(token_amount_in_usd(balance, &price)?);
        }

        self.ledger.add_collateral_supply(delta_usd).await?;
        self.ledger
            .set_collateral_usd(&metric.user, total_usd)
            .await?;

        debug!(token = %token.name, delta_usd = %delta_usd, total_usd = %total_usd, "Collateral applied");
        self.refresh_health_factor(&metric.user, total_usd).await
    }

    async fn refresh_health_factor(&self, user: &Address, collateral_usd: U256) -> Result<(), ApplyError> {
        let debt = self.ledger.debt(user).await?;
        let hf = health_factor(collateral_usd, debt);
        self.ledger.set_health_factor(user, hf).await?;
        debug!(user = %user, health_factor = %hf, "Health factor updated");
        Ok(())
    }

    /// Drain the shard until its senders are gone. Failed metrics are logged and dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<LedgerMetric>) {
        info!(worker = self.id, "Ledger worker started");
        while let Some(metric) = rx.recv().await {
            if let Err(e) = self.apply(&metric).await {
                warn!(
                    worker = self.id,
                    user = %metric.user,
                    block = metric.block_number,
                    asset = ?metric.asset,
                    amount = %metric.amount,
                    error = %e,
                    "Dropping ledger metric"
                );
            }
        }
        info!(worker = self.id, "Ledger worker stopped");
    }
}

/// Spawn one worker per queue shard.
pub fn spawn_ledger_workers(
    receivers: Vec<mpsc::Receiver<LedgerMetric>>,
    ledger: Ledger,
    resolver: Arc<PriceResolver>,
    registry: Arc<CollateralRegistry>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(id, rx)| {
            let worker = LedgerWorker::new(id, ledger.clone(), resolver.clone(), registry.clone());
            tokio::spawn(worker.run(rx))
        })
        .collect()
}
