//! Read-only views over the ledger for API consumers.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use anchor_api::{PriceFeedError, PriceSource};
use anchor_chain::EventKind;
use serde::Serialize;
use thiserror::Error;

use crate::assets::CollateralRegistry;
use crate::ledger::{Ledger, LedgerError};
use crate::records::DomainRecord;
use crate::repository::{Repository, RepositoryError};
use crate::u256_math::{
    average_health_factor, backing_percentage, collateralization_ratio, health_factor, is_at_risk,
    is_liquidatable, liquidation_amount, max_mintable, percentage_of, token_amount_in_usd, MathError,
};

#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Price(#[from] PriceFeedError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("unknown collateral token {0}")]
    UnknownToken(Address),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenBalance {
    pub token: String,
    pub address: Address,
    pub balance: U256,
    pub value_usd: U256,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserPosition {
    pub user: Address,
    pub collateral: Vec<TokenBalance>,
    /// Last written snapshot, not the live sum of `collateral`
    pub collateral_usd: U256,
    pub debt: U256,
    pub health_factor: U256,
    pub max_mintable: U256,
    pub at_risk: bool,
    pub liquidatable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidatableUser {
    pub user: Address,
    pub health_factor: U256,
    pub collateral_usd: U256,
    pub debt: U256,
    pub liquidation_amount: U256,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenShare {
    pub token: String,
    pub value_usd: U256,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollateralTotals {
    pub total_usd: U256,
    pub breakdown: Vec<TokenShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplyStats {
    pub total_supply: U256,
    /// Sum of user debts
    pub circulating: U256,
    pub backing_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolHealth {
    pub average_health_factor: f64,
    pub users_at_risk: usize,
    pub total_users: usize,
    pub collateralization_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub liquidatable: Vec<LiquidatableUser>,
    pub collateral: CollateralTotals,
    pub supply: SupplyStats,
    pub health: ProtocolHealth,
}

/// A hypothetical position change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Mint(U256),
    Burn(U256),
    Deposit { token: Address, amount: U256 },
    Redeem { token: Address, amount: U256 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserHistory {
    pub deposits: Vec<DomainRecord>,
    pub redeems: Vec<DomainRecord>,
    pub mints: Vec<DomainRecord>,
    pub burns: Vec<DomainRecord>,
    pub liquidations: Vec<DomainRecord>,
}

pub struct PositionReader {
    ledger: Ledger,
    repository: Arc<dyn Repository>,
    feed: Arc<dyn PriceSource>,
    registry: Arc<CollateralRegistry>,
}

impl PositionReader {
    pub fn new(
        ledger: Ledger,
        repository: Arc<dyn Repository>,
        feed: Arc<dyn PriceSource>,
        registry: Arc<CollateralRegistry>,
    ) -> Self {
        Self {
            ledger,
            repository,
            feed,
            registry,
        }
    }

    pub async fn user_position(&self, user: Address) -> Result<UserPosition, ReadError> {
        let mut collateral = Vec::new();
        for token in self.registry.iter() {
            let balance = self.ledger.collateral_balance(&token.address, &user).await?;
            if balance.is_zero() {
                continue;
            }
            let price = self.feed.usd_price(&token.name).await?;
            collateral.push(TokenBalance {
                token: token.name.clone(),
                address: token.address,
                balance,
                value_usd: token_amount_in_usd(balance, &price)?,
            });
        }

        let collateral_usd = self.ledger.collateral_usd(&user).await?;
        let debt = self.ledger.debt(&user).await?;
        let hf = health_factor(collateral_usd, debt);

        Ok(UserPosition {
            user,
            collateral,
            collateral_usd,
            debt,
            health_factor: hf,
            max_mintable: max_mintable(collateral_usd, debt),
            at_risk: is_at_risk(hf),
            liquidatable: is_liquidatable(hf),
        })
    }

    /// Health factor after applying `projection` to the user's current position.
    pub async fn project(&self, user: Address, projection: Projection) -> Result<U256, ReadError> {
        let collateral_usd = self.ledger.collateral_usd(&user).await?;
        let debt = self.ledger.debt(&user).await?;

        let (collateral_usd, debt) = match projection {
            Projection::Mint(amount) => (collateral_usd, debt.saturating_add(amount)),
            Projection::Burn(amount) => (collateral_usd, debt.saturating_sub(amount)),
            Projection::Deposit { token, amount } => {
                let usd = self.live_value(token, amount).await?;
                (collateral_usd.saturating_add(usd), debt)
            }
            Projection::Redeem { token, amount } => {
                let usd = self.live_value(token, amount).await?;
                (collateral_usd.saturating_sub(usd), debt)
            }
        };
        Ok(health_factor(collateral_usd, debt))
    }

    async fn live_value(&self, token: Address, amount: U256) -> Result<U256, ReadError> {
        let token = self
            .registry
            .get_by_address(&token)
            .ok_or(ReadError::UnknownToken(token))?;
        let price = self.feed.usd_price(&token.name).await?;
        Ok(token_amount_in_usd(amount, &price)?)
    }

    pub async fn dashboard(&self) -> Result<Dashboard, ReadError> {
        let debts = self.ledger.debts().await?;

        let mut liquidatable = Vec::new();
        for (user, hf) in self.ledger.liquidatable().await? {
            let debt = debts.get(&user).copied();
            liquidatable.push(LiquidatableUser {
                user,
                health_factor: hf,
                collateral_usd: self.ledger.collateral_usd(&user).await?,
                debt: debt.unwrap_or_default(),
                liquidation_amount: liquidation_amount(debt),
            });
        }
        liquidatable.sort_by(|a, b| a.health_factor.cmp(&b.health_factor));

        let collateral = self.collateral_totals().await?;

        let total_supply = self.ledger.coin_supply().await?;
        let circulating = debts
            .values()
            .fold(U256::ZERO, |acc, debt| acc.saturating_add(*debt));
        let supply = SupplyStats {
            total_supply,
            circulating,
            backing_percentage: backing_percentage(collateral.total_usd, circulating),
        };

        let health_factors = self.ledger.health_factors().await?;
        let sum = health_factors
            .iter()
            .fold(U256::ZERO, |acc, (_, hf)| acc.saturating_add(*hf));
        let health = ProtocolHealth {
            average_health_factor: average_health_factor(sum, health_factors.len()),
            users_at_risk: health_factors.iter().filter(|(_, hf)| is_at_risk(*hf)).count(),
            total_users: health_factors.len(),
            collateralization_ratio: collateralization_ratio(collateral.total_usd, total_supply),
        };

        Ok(Dashboard {
            liquidatable,
            collateral,
            supply,
            health,
        })
    }

    async fn collateral_totals(&self) -> Result<CollateralTotals, ReadError> {
        let mut values = Vec::with_capacity(self.registry.len());
        for token in self.registry.iter() {
            let balances = self.ledger.collateral_balances(&token.address).await?;
            let held = balances
                .iter()
                .fold(U256::ZERO, |acc, (_, balance)| acc.saturating_add(*balance));
            let value_usd = if held.is_zero() {
                U256::ZERO
            } else {
                let price = self.feed.usd_price(&token.name).await?;
                token_amount_in_usd(held, &price)?
            };
            values.push((token.name.clone(), value_usd));
        }

        let total_usd = values
            .iter()
            .fold(U256::ZERO, |acc, (_, v)| acc.saturating_add(*v));
        let breakdown = values
            .into_iter()
            .map(|(token, value_usd)| TokenShare {
                token,
                value_usd,
                percentage: percentage_of(value_usd, total_usd),
            })
            .collect();

        Ok(CollateralTotals {
            total_usd,
            breakdown,
        })
    }

    /// Latest `n` records of each kind for `user`, newest first.
    pub async fn user_history(&self, user: Address, n: usize) -> Result<UserHistory, ReadError> {
        let mut history = UserHistory::default();
        for kind in EventKind::ALL {
            let records = self.repository.latest_records(kind, user, n).await?;
            match kind {
                EventKind::CollateralDeposited => history.deposits = records,
                EventKind::CollateralRedeemed => history.redeems = records,
                EventKind::AusdMinted => history.mints = records,
                EventKind::AusdBurned => history.burns = records,
                EventKind::Liquidation => history.liquidations = records,
            }
        }
        Ok(history)
    }
}
