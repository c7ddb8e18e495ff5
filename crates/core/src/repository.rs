//! Durable repository seam and its in-memory implementation.

use std::collections::{BTreeMap, HashMap};

use alloy::primitives::{Address, U256};
use anchor_chain::{EventKind, ProtocolEvent};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;

use crate::records::{ChainEvent, DomainRecord, NewChainEvent, PricePin};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("chain event already recorded at block {block_number} log {log_index}")]
    DuplicateEvent { block_number: u64, log_index: u64 },

    #[error("repository backend error: {0}")]
    Backend(String),
}

/// Offset/limit window over user-ordered results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// Per-user grouped sums available from the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTotal {
    Minted,
    Burned,
    /// Debt covered by liquidators
    DebtCovered,
    Deposited(Address),
    Redeemed(Address),
    /// Collateral of the token seized by liquidators
    Seized(Address),
}

impl UserTotal {
    /// Contribution of a record to this sum, if it belongs to it.
    fn amount_of(&self, record: &DomainRecord) -> Option<U256> {
        match (self, record) {
            (Self::Minted, DomainRecord::Mint(r)) => Some(r.amount),
            (Self::Burned, DomainRecord::Burn(r)) => Some(r.amount),
            (Self::DebtCovered, DomainRecord::Liquidation(r)) => Some(r.debt_covered),
            (Self::Deposited(token), DomainRecord::Deposit(r)) if r.token == *token => Some(r.amount),
            (Self::Redeemed(token), DomainRecord::Redeem(r)) if r.token == *token => Some(r.amount),
            (Self::Seized(token), DomainRecord::Liquidation(r)) if r.token == *token => {
                Some(r.collateral_seized)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAmount {
    pub user: Address,
    pub amount: U256,
}

/// Query and write interface to the durable store.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_event_in_block(
        &self,
        log_index: u64,
        block_number: u64,
    ) -> Result<Option<ChainEvent>, RepositoryError>;

    /// Highest recorded block, 0 when empty.
    async fn last_processed_block(&self) -> Result<u64, RepositoryError>;

    /// Persist the chain event and its domain record as one unit.
    ///
    /// Fails with `DuplicateEvent` if `(block_number, log_index)` is taken,
    /// in which case nothing is written.
    async fn record_event(
        &self,
        event: NewChainEvent,
        payload: &ProtocolEvent,
    ) -> Result<(ChainEvent, DomainRecord), RepositoryError>;

    /// Grouped sums, ordered by user address.
    async fn totals_by_user(
        &self,
        total: UserTotal,
        page: Page,
    ) -> Result<Vec<UserAmount>, RepositoryError>;

    /// Most recent `limit` records of a kind for a user, newest first.
    async fn latest_records(
        &self,
        kind: EventKind,
        user: Address,
        limit: usize,
    ) -> Result<Vec<DomainRecord>, RepositoryError>;

    async fn price_pin(
        &self,
        token_name: &str,
        block_number: u64,
    ) -> Result<Option<PricePin>, RepositoryError>;

    /// Insert if absent; returns whichever pin is stored afterwards.
    async fn save_price_pin(&self, pin: PricePin) -> Result<PricePin, RepositoryError>;
}

#[derive(Debug, Default)]
struct Tables {
    events: Vec<ChainEvent>,
    by_position: HashMap<(u64, u64), usize>,
    records: Vec<DomainRecord>,
    pins: HashMap<(String, u64), PricePin>,
}

/// Repository held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.tables.read().events.len()
    }

    pub fn records(&self) -> Vec<DomainRecord> {
        self.tables.read().records.clone()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_event_in_block(
        &self,
        log_index: u64,
        block_number: u64,
    ) -> Result<Option<ChainEvent>, RepositoryError> {
        let tables = self.tables.read();
        Ok(tables
            .by_position
            .get(&(block_number, log_index))
            .map(|&i| tables.events[i].clone()))
    }

    async fn last_processed_block(&self) -> Result<u64, RepositoryError> {
        Ok(self
            .tables
            .read()
            .events
            .iter()
            .map(|e| e.block_number)
            .max()
            .unwrap_or(0))
    }

    async fn record_event(
        &self,
        event: NewChainEvent,
        payload: &ProtocolEvent,
    ) -> Result<(ChainEvent, DomainRecord), RepositoryError> {
        let mut tables = self.tables.write();
        let position = (event.block_number, event.log_index);
        if tables.by_position.contains_key(&position) {
            return Err(RepositoryError::DuplicateEvent {
                block_number: event.block_number,
                log_index: event.log_index,
            });
        }

        let chain_event = ChainEvent {
            id: tables.events.len() as u64 + 1,
            block_number: event.block_number,
            tx_hash: event.tx_hash,
            log_index: event.log_index,
            kind: event.kind,
            created_at: Utc::now(),
        };
        let record = DomainRecord::from_event(chain_event.id, payload);

        let index = tables.events.len();
        tables.events.push(chain_event.clone());
        tables.by_position.insert(position, index);
        tables.records.push(record.clone());

        Ok((chain_event, record))
    }

    async fn totals_by_user(
        &self,
        total: UserTotal,
        page: Page,
    ) -> Result<Vec<UserAmount>, RepositoryError> {
        let tables = self.tables.read();
        let mut sums: BTreeMap<Address, U256> = BTreeMap::new();
        for record in &tables.records {
            if let Some(amount) = total.amount_of(record) {
                let sum = sums.entry(record.user()).or_default();
                *sum = sum.saturating_add(amount);
            }
        }

        Ok(sums
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .map(|(user, amount)| UserAmount { user, amount })
            .collect())
    }

    async fn latest_records(
        &self,
        kind: EventKind,
        user: Address,
        limit: usize,
    ) -> Result<Vec<DomainRecord>, RepositoryError> {
        let tables = self.tables.read();
        Ok(tables
            .records
            .iter()
            .rev()
            .filter(|r| r.kind() == kind && r.user() == user)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn price_pin(
        &self,
        token_name: &str,
        block_number: u64,
    ) -> Result<Option<PricePin>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .pins
            .get(&(token_name.to_string(), block_number))
            .cloned())
    }

    async fn save_price_pin(&self, pin: PricePin) -> Result<PricePin, RepositoryError> {
        let mut tables = self.tables.write();
        let key = (pin.token_name.clone(), pin.block_number);
        Ok(tables.pins.entry(key).or_insert(pin).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;

    fn new_event(block_number: u64, log_index: u64, kind: EventKind) -> NewChainEvent {
        NewChainEvent {
            block_number,
            tx_hash: B256::repeat_byte(block_number as u8),
            log_index,
            kind,
        }
    }

    fn mint(user: Address, amount: u64) -> ProtocolEvent {
        ProtocolEvent::Minted {
            user,
            amount: U256::from(amount),
        }
    }

    #[tokio::test]
    async fn test_record_event_is_unique_per_position() {
        let repo = InMemoryRepository::new();
        let user = Address::repeat_byte(1);

        let (event, record) = repo
            .record_event(new_event(10, 2, EventKind::AusdMinted), &mint(user, 5))
            .await
            .unwrap();
        assert_eq!(record.event_id(), event.id);

        let err = repo
            .record_event(new_event(10, 2, EventKind::AusdMinted), &mint(user, 5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::DuplicateEvent { block_number: 10, log_index: 2 }
        ));
        assert_eq!(repo.event_count(), 1);
        assert_eq!(repo.records().len(), 1);

        assert!(repo.find_event_in_block(2, 10).await.unwrap().is_some());
        assert!(repo.find_event_in_block(10, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_processed_block() {
        let repo = InMemoryRepository::new();
        assert_eq!(repo.last_processed_block().await.unwrap(), 0);

        let user = Address::repeat_byte(1);
        repo.record_event(new_event(30, 0, EventKind::AusdMinted), &mint(user, 1))
            .await
            .unwrap();
        repo.record_event(new_event(12, 0, EventKind::AusdMinted), &mint(user, 1))
            .await
            .unwrap();
        assert_eq!(repo.last_processed_block().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_totals_by_user_paginated() {
        let repo = InMemoryRepository::new();
        let users: Vec<Address> = (1..=3).map(Address::repeat_byte).collect();
        for (i, user) in users.iter().enumerate() {
            repo.record_event(new_event(1, i as u64, EventKind::AusdMinted), &mint(*user, 10))
                .await
                .unwrap();
            repo.record_event(new_event(2, i as u64, EventKind::AusdMinted), &mint(*user, 5))
                .await
                .unwrap();
        }

        let first = repo.totals_by_user(UserTotal::Minted, Page::first(2)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], UserAmount { user: users[0], amount: U256::from(15u64) });

        let second = repo
            .totals_by_user(UserTotal::Minted, Page::first(2).next())
            .await
            .unwrap();
        assert_eq!(second, vec![UserAmount { user: users[2], amount: U256::from(15u64) }]);

        let burned = repo.totals_by_user(UserTotal::Burned, Page::first(10)).await.unwrap();
        assert!(burned.is_empty());
    }

    #[tokio::test]
    async fn test_collateral_totals_filter_by_token() {
        let repo = InMemoryRepository::new();
        let user = Address::repeat_byte(1);
        let eth = Address::repeat_byte(0xe);
        let btc = Address::repeat_byte(0xb);

        let deposit = |token, amount: u64| ProtocolEvent::Deposited {
            user,
            token,
            amount: U256::from(amount),
        };
        repo.record_event(new_event(1, 0, EventKind::CollateralDeposited), &deposit(eth, 7))
            .await
            .unwrap();
        repo.record_event(new_event(1, 1, EventKind::CollateralDeposited), &deposit(btc, 3))
            .await
            .unwrap();
        repo.record_event(
            new_event(2, 0, EventKind::Liquidation),
            &ProtocolEvent::Liquidated {
                user,
                liquidator: Address::repeat_byte(9),
                token: eth,
                collateral_seized: U256::from(2u64),
                debt_covered: U256::from(4u64),
            },
        )
        .await
        .unwrap();

        let eth_total = repo
            .totals_by_user(UserTotal::Deposited(eth), Page::first(10))
            .await
            .unwrap();
        assert_eq!(eth_total, vec![UserAmount { user, amount: U256::from(7u64) }]);

        let seized = repo.totals_by_user(UserTotal::Seized(eth), Page::first(10)).await.unwrap();
        assert_eq!(seized[0].amount, U256::from(2u64));
        assert!(repo
            .totals_by_user(UserTotal::Seized(btc), Page::first(10))
            .await
            .unwrap()
            .is_empty());

        let covered = repo.totals_by_user(UserTotal::DebtCovered, Page::first(10)).await.unwrap();
        assert_eq!(covered[0].amount, U256::from(4u64));
    }

    #[tokio::test]
    async fn test_latest_records_newest_first() {
        let repo = InMemoryRepository::new();
        let user = Address::repeat_byte(1);
        for i in 0..5u64 {
            repo.record_event(new_event(i + 1, 0, EventKind::AusdMinted), &mint(user, i))
                .await
                .unwrap();
        }
        repo.record_event(new_event(9, 0, EventKind::AusdMinted), &mint(Address::repeat_byte(2), 99))
            .await
            .unwrap();

        let latest = repo.latest_records(EventKind::AusdMinted, user, 2).await.unwrap();
        let amounts: Vec<U256> = latest
            .iter()
            .map(|r| match r {
                DomainRecord::Mint(m) => m.amount,
                other => panic!("unexpected record {other:?}"),
            })
            .collect();
        assert_eq!(amounts, vec![U256::from(4u64), U256::from(3u64)]);
        assert!(repo.latest_records(EventKind::AusdBurned, user, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_price_pin_insert_if_absent() {
        let repo = InMemoryRepository::new();
        let first = PricePin {
            token_name: "ETH".into(),
            block_number: 100,
            price_usd: "2000".into(),
        };
        let second = PricePin {
            price_usd: "2100".into(),
            ..first.clone()
        };

        assert_eq!(repo.save_price_pin(first.clone()).await.unwrap(), first);
        assert_eq!(repo.save_price_pin(second).await.unwrap(), first);
        assert_eq!(repo.price_pin("ETH", 100).await.unwrap(), Some(first));
        assert_eq!(repo.price_pin("ETH", 101).await.unwrap(), None);
    }
}
