//! Event processing: decode, persist, emit ledger metrics.

use std::sync::Arc;

use anchor_chain::{DecodeError, EventKind, ProtocolEvent, RawLog};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::metric::{LedgerMetric, MetricQueue, QueueClosed};
use crate::records::NewChainEvent;
use crate::repository::{Repository, RepositoryError};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),

    #[error("persist: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueClosed),
}

/// Result of processing one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Records written and `metrics` ledger metrics enqueued
    Applied { event_id: u64, metrics: usize },
    /// Another delivery of the same log won the insert
    Duplicate,
}

/// Turns a matched protocol log into durable records and ledger metrics.
#[derive(Clone)]
pub struct EventProcessor {
    repository: Arc<dyn Repository>,
    queue: MetricQueue,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("shards", &self.queue.shard_count())
            .finish()
    }
}

impl EventProcessor {
    pub fn new(repository: Arc<dyn Repository>, queue: MetricQueue) -> Self {
        Self { repository, queue }
    }

    /// Decode and persist `log` as `kind`, then enqueue its metrics.
    ///
    /// Decode and persistence failures leave no side effects.
    #[instrument(skip(self, log), fields(block = log.block_number, log_index = log.log_index))]
    pub async fn process(&self, kind: EventKind, log: &RawLog) -> Result<ProcessOutcome, ProcessError> {
        let event = ProtocolEvent::decode(kind, log)?;

        let new_event = NewChainEvent {
            block_number: log.block_number,
            tx_hash: log.tx_hash,
            log_index: log.log_index,
            kind,
        };
        let (chain_event, _record) = match self.repository.record_event(new_event, &event).await {
            Ok(written) => written,
            Err(RepositoryError::DuplicateEvent { .. }) => {
                debug!(%kind, "Event already recorded by another delivery");
                return Ok(ProcessOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        };

        let metrics = LedgerMetric::from_event(&event, log.block_number);
        let count = metrics.len();
        for metric in metrics {
            self.queue.send(metric).await?;
        }

        debug!(
            %kind,
            user = %event.user(),
            event_id = chain_event.id,
            metrics = count,
            "Processed event"
        );
        Ok(ProcessOutcome::Applied {
            event_id: chain_event.id,
            metrics: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Asset, Operation};
    use crate::repository::InMemoryRepository;
    use alloy::primitives::{Address, Bytes, B256, U256};

    fn mint_log(user: Address, amount: u64, block: u64, index: u64) -> RawLog {
        RawLog {
            address: Address::ZERO,
            block_number: block,
            tx_hash: B256::repeat_byte(1),
            log_index: index,
            topics: vec![
                EventKind::AusdMinted.topic(),
                user.into_word(),
                B256::from(U256::from(amount).to_be_bytes::<32>()),
            ],
            data: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_mint_emits_one_metric() {
        let repo = Arc::new(InMemoryRepository::new());
        let (queue, mut receivers) = MetricQueue::new(1, 10);
        let processor = EventProcessor::new(repo.clone(), queue);
        let user = Address::repeat_byte(4);

        let outcome = processor
            .process(EventKind::AusdMinted, &mint_log(user, 500, 7, 0))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied { event_id: 1, metrics: 1 });

        let metric = receivers[0].recv().await.unwrap();
        assert_eq!(metric.user, user);
        assert_eq!(metric.asset, Asset::Stablecoin);
        assert_eq!(metric.operation, Operation::Add);
        assert_eq!(metric.amount, U256::from(500u64));
        assert_eq!(metric.block_number, 7);
    }

    #[tokio::test]
    async fn test_duplicate_emits_nothing() {
        let repo = Arc::new(InMemoryRepository::new());
        let (queue, mut receivers) = MetricQueue::new(1, 10);
        let processor = EventProcessor::new(repo.clone(), queue);
        let log = mint_log(Address::repeat_byte(4), 1, 7, 0);

        processor.process(EventKind::AusdMinted, &log).await.unwrap();
        let again = processor.process(EventKind::AusdMinted, &log).await.unwrap();
        assert_eq!(again, ProcessOutcome::Duplicate);

        assert!(receivers[0].recv().await.is_some());
        assert!(receivers[0].try_recv().is_err());
        assert_eq!(repo.event_count(), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_writes_nothing() {
        let repo = Arc::new(InMemoryRepository::new());
        let (queue, mut receivers) = MetricQueue::new(1, 10);
        let processor = EventProcessor::new(repo.clone(), queue);

        let mut log = mint_log(Address::repeat_byte(4), 1, 7, 0);
        log.topics.truncate(2);

        let err = processor.process(EventKind::AusdMinted, &log).await.unwrap_err();
        assert!(matches!(err, ProcessError::Decode(_)));
        assert_eq!(repo.event_count(), 0);
        assert!(receivers[0].try_recv().is_err());
    }
}
