//! Startup rebuild of ledger balances from durable records.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, I256, U256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assets::CollateralRegistry;
use crate::ledger::{Ledger, LedgerError};
use crate::repository::{Page, Repository, RepositoryError, UserTotal};
use crate::u256_math::{clamp_non_negative, to_signed, MathError};

const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Math(#[from] MathError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub debtors: usize,
    pub coin_supply: U256,
    /// Balance entries written across all tokens
    pub collateral_entries: usize,
    /// Results that went negative and were written as zero
    pub clamped: usize,
}

/// Recomputes debt, coin supply and collateral balances from grouped sums.
pub struct LedgerRebuilder {
    repository: Arc<dyn Repository>,
    ledger: Ledger,
    registry: Arc<CollateralRegistry>,
    page_size: usize,
}

impl LedgerRebuilder {
    pub fn new(repository: Arc<dyn Repository>, ledger: Ledger, registry: Arc<CollateralRegistry>) -> Self {
        Self {
            repository,
            ledger,
            registry,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn rebuild(&self) -> Result<RebuildReport, RebuildError> {
        let mut report = RebuildReport::default();

        // debt = minted - burned - covered by liquidators
        let mut debts = HashMap::new();
        self.accumulate(&mut debts, UserTotal::Minted, false).await?;
        self.accumulate(&mut debts, UserTotal::Burned, true).await?;
        self.accumulate(&mut debts, UserTotal::DebtCovered, true).await?;

        let mut supply = U256::ZERO;
        for (user, net) in debts {
            let debt = self.non_negative(&mut report, "debt", &user, net);
            self.ledger.set_debt(&user, debt).await?;
            supply = supply.saturating_add(debt);
            report.debtors += 1;
        }
        self.ledger.set_coin_supply(supply).await?;
        report.coin_supply = supply;

        for token in self.registry.iter() {
            let mut balances = HashMap::new();
            self.accumulate(&mut balances, UserTotal::Deposited(token.address), false)
                .await?;
            self.accumulate(&mut balances, UserTotal::Redeemed(token.address), true)
                .await?;
            self.accumulate(&mut balances, UserTotal::Seized(token.address), true)
                .await?;

            for (user, net) in balances {
                let balance = self.non_negative(&mut report, &token.name, &user, net);
                self.ledger
                    .set_collateral_balance(&token.address, &user, balance)
                    .await?;
                report.collateral_entries += 1;
            }
            debug!(token = %token.name, "Collateral balances rebuilt");
        }

        info!(
            debtors = report.debtors,
            coin_supply = %report.coin_supply,
            collateral_entries = report.collateral_entries,
            clamped = report.clamped,
            "Ledger rebuilt from durable records"
        );
        Ok(report)
    }

    async fn accumulate(
        &self,
        into: &mut HashMap<Address, I256>,
        total: UserTotal,
        subtract: bool,
    ) -> Result<(), RebuildError> {
        let mut page = Page::first(self.page_size);
        loop {
            let rows = self.repository.totals_by_user(total, page).await?;
            for row in &rows {
                let amount = to_signed(row.amount)?;
                let entry = into.entry(row.user).or_insert(I256::ZERO);
                *entry = if subtract {
                    entry.saturating_sub(amount)
                } else {
                    entry.saturating_add(amount)
                };
            }
            if rows.len() < page.limit {
                return Ok(());
            }
            page = page.next();
        }
    }

    fn non_negative(&self, report: &mut RebuildReport, what: &str, user: &Address, net: I256) -> U256 {
        if net.is_negative() {
            warn!(user = %user, field = what, net = %net, "Rebuilt value is negative, clamping to zero");
            report.clamped += 1;
        }
        clamp_non_negative(net)
    }
}
