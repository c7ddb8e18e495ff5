//! Ledger metrics and the per-user sharded metric queue.

use alloy::primitives::{Address, I256, U256};
use anchor_chain::ProtocolEvent;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::u256_math::{to_signed, MathError};

/// Ledger side a metric applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Collateral,
    Stablecoin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
}

/// One signed balance change to apply to the ledger cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerMetric {
    pub user: Address,
    pub amount: U256,
    pub asset: Asset,
    pub operation: Operation,
    pub block_number: u64,
    /// Set for collateral metrics
    pub token: Option<Address>,
}

impl LedgerMetric {
    pub fn collateral(
        user: Address,
        token: Address,
        amount: U256,
        operation: Operation,
        block_number: u64,
    ) -> Self {
        Self {
            user,
            amount,
            asset: Asset::Collateral,
            operation,
            block_number,
            token: Some(token),
        }
    }

    pub fn stablecoin(user: Address, amount: U256, operation: Operation, block_number: u64) -> Self {
        Self {
            user,
            amount,
            asset: Asset::Stablecoin,
            operation,
            block_number,
            token: None,
        }
    }

    /// Metrics produced by a decoded event.
    pub fn from_event(event: &ProtocolEvent, block_number: u64) -> Vec<Self> {
        match *event {
            ProtocolEvent::Deposited {
                user,
                token,
                amount,
            } => vec![Self::collateral(user, token, amount, Operation::Add, block_number)],
            ProtocolEvent::Redeemed {
                from,
                token,
                amount,
                ..
            } => vec![Self::collateral(from, token, amount, Operation::Subtract, block_number)],
            ProtocolEvent::Minted { user, amount } => {
                vec![Self::stablecoin(user, amount, Operation::Add, block_number)]
            }
            ProtocolEvent::Burned { user, amount } => {
                vec![Self::stablecoin(user, amount, Operation::Subtract, block_number)]
            }
            ProtocolEvent::Liquidated {
                user,
                token,
                collateral_seized,
                debt_covered,
                ..
            } => vec![
                Self::collateral(user, token, collateral_seized, Operation::Subtract, block_number),
                Self::stablecoin(user, debt_covered, Operation::Subtract, block_number),
            ],
        }
    }

    /// Amount as a signed delta: negative for subtractions.
    pub fn signed_amount(&self) -> Result<I256, MathError> {
        let amount = to_signed(self.amount)?;
        Ok(match self.operation {
            Operation::Add => amount,
            Operation::Subtract => -amount,
        })
    }
}

#[derive(Debug, Error)]
#[error("metric queue closed")]
pub struct QueueClosed;

/// Bounded metric queue with one shard per ledger worker.
///
/// A user always maps to the same shard, so one user's metrics are applied
/// in enqueue order. `send` waits while the target shard is full.
#[derive(Debug, Clone)]
pub struct MetricQueue {
    shards: Vec<mpsc::Sender<LedgerMetric>>,
}

impl MetricQueue {
    /// Build `shards` channels sharing roughly `capacity` slots in total.
    pub fn new(shards: usize, capacity: usize) -> (Self, Vec<mpsc::Receiver<LedgerMetric>>) {
        let shards = shards.max(1);
        let per_shard = capacity.div_ceil(shards).max(1);

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..shards).map(|_| mpsc::channel(per_shard)).unzip();
        (Self { shards: senders }, receivers)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard owning `user`, from the low 8 bytes of the address.
    pub fn shard_for(&self, user: &Address) -> usize {
        let mut low = [0u8; 8];
        low.copy_from_slice(&user.as_slice()[12..20]);
        (u64::from_be_bytes(low) % self.shards.len() as u64) as usize
    }

    pub async fn send(&self, metric: LedgerMetric) -> Result<(), QueueClosed> {
        let shard = self.shard_for(&metric.user);
        self.shards[shard].send(metric).await.map_err(|_| QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liquidation_emits_two_metrics() {
        let user = Address::repeat_byte(1);
        let token = Address::repeat_byte(2);
        let event = ProtocolEvent::Liquidated {
            user,
            liquidator: Address::repeat_byte(3),
            token,
            collateral_seized: U256::from(11u64),
            debt_covered: U256::from(22u64),
        };

        let metrics = LedgerMetric::from_event(&event, 50);
        assert_eq!(
            metrics,
            vec![
                LedgerMetric::collateral(user, token, U256::from(11u64), Operation::Subtract, 50),
                LedgerMetric::stablecoin(user, U256::from(22u64), Operation::Subtract, 50),
            ]
        );
    }

    #[test]
    fn test_signed_amount() {
        let add = LedgerMetric::stablecoin(Address::ZERO, U256::from(5u64), Operation::Add, 1);
        let sub = LedgerMetric::stablecoin(Address::ZERO, U256::from(5u64), Operation::Subtract, 1);
        assert_eq!(add.signed_amount().unwrap(), I256::try_from(5i64).unwrap());
        assert_eq!(sub.signed_amount().unwrap(), I256::try_from(-5i64).unwrap());

        let huge = LedgerMetric::stablecoin(Address::ZERO, U256::MAX, Operation::Add, 1);
        assert!(huge.signed_amount().is_err());
    }

    #[test]
    fn test_shard_is_stable_per_user() {
        let (queue, receivers) = MetricQueue::new(4, 500);
        assert_eq!(receivers.len(), 4);
        let user = Address::repeat_byte(0x5a);
        assert_eq!(queue.shard_for(&user), queue.shard_for(&user));

        let mut low = [0u8; 20];
        low[19] = 6;
        assert_eq!(queue.shard_for(&Address::from(low)), 2);
    }

    #[tokio::test]
    async fn test_same_user_metrics_keep_order() {
        let (queue, mut receivers) = MetricQueue::new(3, 30);
        let user = Address::repeat_byte(9);
        for block in 1..=5 {
            queue
                .send(LedgerMetric::stablecoin(user, U256::from(block), Operation::Add, block))
                .await
                .unwrap();
        }

        let rx = &mut receivers[queue.shard_for(&user)];
        for block in 1..=5 {
            assert_eq!(rx.recv().await.unwrap().block_number, block);
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (queue, receivers) = MetricQueue::new(1, 1);
        drop(receivers);
        let metric = LedgerMetric::stablecoin(Address::ZERO, U256::from(1u64), Operation::Add, 1);
        assert!(queue.send(metric).await.is_err());
    }
}
