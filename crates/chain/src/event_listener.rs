//! Contract log source: historical backfill followed by a live WebSocket tail.
//!
//! The live subscription is opened before the head is read, so its first
//! logs may repeat the end of the backfill. Downstream dedup absorbs that
//! overlap. A live feed that lags or closes ends the stream with an error
//! rather than skipping logs.

use std::collections::VecDeque;
use std::pin::Pin;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::pubsub::Subscription;
use alloy::rpc::types::{Filter, Log};
use alloy::transports::TransportError;
use async_trait::async_trait;
use futures::stream::Stream;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::events::all_topics;
use crate::log::RawLog;

/// Live subscription buffer, in logs. Overflowing it is a fatal lag.
const LIVE_BUFFER: usize = 4096;

/// Errors from the chain log source.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("websocket connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("rpc request failed: {0}")]
    Rpc(#[from] TransportError),

    #[error("log subscription closed")]
    SubscriptionClosed,

    #[error("log subscription lagged, {missed} logs dropped")]
    Lagged { missed: u64 },
}

impl From<RecvError> for ChainError {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Lagged(missed) => Self::Lagged { missed },
            RecvError::Closed => Self::SubscriptionClosed,
        }
    }
}

/// Stream of raw contract logs. An `Err` item means the source is dead.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<RawLog, ChainError>> + Send>>;

/// Source of protocol logs, starting at a given block with no upper bound.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn subscribe(&self, from_block: u64) -> Result<LogStream, ChainError>;
}

/// Historical logs over an inclusive block range.
#[async_trait]
pub trait LogHistory: Send + Sync {
    async fn logs_between(&self, start: u64, end: u64) -> Result<Vec<Log>, ChainError>;
}

/// Live log feed. Must be cancel safe: a dropped `recv` loses nothing.
#[async_trait]
pub trait LiveLogs: Send {
    async fn recv(&mut self) -> Result<Log, RecvError>;
}

#[async_trait]
impl LiveLogs for Subscription<Log> {
    async fn recv(&mut self) -> Result<Log, RecvError> {
        Subscription::recv(self).await
    }
}

/// Log source backed by an alloy WebSocket provider.
#[derive(Debug, Clone)]
pub struct ChainLogSource {
    ws_url: String,
    contract: Address,
    backfill_chunk_size: u64,
}

impl ChainLogSource {
    pub fn new(ws_url: impl Into<String>, contract: Address, backfill_chunk_size: u64) -> Self {
        Self {
            ws_url: ws_url.into(),
            contract,
            backfill_chunk_size: backfill_chunk_size.max(1),
        }
    }

    fn filter(&self) -> Filter {
        Filter::new()
            .address(self.contract)
            .event_signature(all_topics())
    }
}

#[async_trait]
impl LogSource for ChainLogSource {
    async fn subscribe(&self, from_block: u64) -> Result<LogStream, ChainError> {
        info!(
            contract = %self.contract,
            ws_url = %self.ws_url,
            from_block,
            "Subscribing to protocol logs"
        );

        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(&self.ws_url))
            .await
            .map_err(|source| ChainError::Connect {
                url: self.ws_url.clone(),
                source,
            })?;

        if let Some(frontend) = provider.client().pubsub_frontend() {
            frontend.set_channel_size(LIVE_BUFFER);
        }

        // Subscribe before reading the head so no block falls between backfill and live tail
        let filter = self.filter();
        let live = provider.subscribe_logs(&filter).await?;
        let head = provider.get_block_number().await?;

        info!(head, from_block, "WebSocket connected, backfilling before live tail");

        // The history owns the provider so the WebSocket stays open
        let history = ProviderHistory { provider, filter };
        Ok(backfill_then_tail(
            history,
            live,
            from_block,
            head,
            self.backfill_chunk_size,
        ))
    }
}

struct ProviderHistory<P> {
    provider: P,
    filter: Filter,
}

#[async_trait]
impl<P: Provider> LogHistory for ProviderHistory<P> {
    async fn logs_between(&self, start: u64, end: u64) -> Result<Vec<Log>, ChainError> {
        let window = self.filter.clone().from_block(start).to_block(end);
        Ok(self.provider.get_logs(&window).await?)
    }
}

/// Yield `[from_block, head]` from `history` in `chunk`-block windows, then
/// everything `live` delivers.
///
/// Live logs that arrive during the backfill are held and yielded after it,
/// in arrival order. A lagged or closed live feed ends the stream with an
/// error once the held logs are out.
pub fn backfill_then_tail<H, L>(
    history: H,
    live: L,
    from_block: u64,
    head: u64,
    chunk: u64,
) -> LogStream
where
    H: LogHistory + 'static,
    L: LiveLogs + 'static,
{
    let state = TailState {
        history,
        live,
        next_block: from_block,
        head,
        chunk,
        pending: VecDeque::new(),
        held: VecDeque::new(),
        live_error: None,
        closed: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        if st.closed {
            return None;
        }
        loop {
            if let Some(log) = st.pending.pop_front() {
                return Some((Ok(log), st));
            }

            if let Some((start, end)) = next_window(st.next_block, st.head, st.chunk) {
                match st.history.logs_between(start, end).await {
                    Ok(logs) => {
                        debug!(start, end, count = logs.len(), "Backfilled log window");
                        st.next_block = end + 1;
                        st.pending.extend(logs.into_iter().filter_map(convert));
                        st.hold_ready_live();
                        continue;
                    }
                    Err(e) => {
                        st.closed = true;
                        return Some((Err(e), st));
                    }
                }
            }

            if let Some(log) = st.held.pop_front() {
                return Some((Ok(log), st));
            }
            if let Some(e) = st.live_error.take() {
                st.closed = true;
                return Some((Err(e), st));
            }

            let next = st.live.recv().await;
            match next {
                Ok(log) => {
                    if let Some(raw) = convert(log) {
                        return Some((Ok(raw), st));
                    }
                }
                Err(e) => {
                    st.closed = true;
                    return Some((Err(e.into()), st));
                }
            }
        }
    });

    Box::pin(stream)
}

struct TailState<H, L> {
    history: H,
    live: L,
    next_block: u64,
    head: u64,
    chunk: u64,
    pending: VecDeque<RawLog>,
    held: VecDeque<RawLog>,
    live_error: Option<ChainError>,
    closed: bool,
}

impl<H, L: LiveLogs> TailState<H, L> {
    /// Move whatever the live feed already has into `held` without waiting.
    fn hold_ready_live(&mut self) {
        while self.live_error.is_none() {
            let next = self.live.recv().now_or_never();
            match next {
                None => break,
                Some(Ok(log)) => self.held.extend(convert(log)),
                Some(Err(e)) => {
                    warn!(error = %e, held = self.held.len(), "Live feed failed during backfill");
                    self.live_error = Some(e.into());
                }
            }
        }
    }
}

fn convert(log: Log) -> Option<RawLog> {
    match RawLog::try_from(log) {
        Ok(raw) => Some(raw),
        Err(e) => {
            warn!(error = %e, "Skipping log without block metadata");
            None
        }
    }
}

/// Next inclusive `[start, end]` backfill window, or `None` once past `head`.
fn next_window(next_block: u64, head: u64, chunk: u64) -> Option<(u64, u64)> {
    if next_block > head {
        return None;
    }
    let end = next_block.saturating_add(chunk.max(1) - 1).min(head);
    Some((next_block, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, B256};
    use futures::StreamExt;
    use std::collections::BTreeMap;
    use tokio::sync::broadcast;

    fn log_at(block: u64, index: u64) -> Log {
        Log {
            inner: alloy::primitives::Log::new_unchecked(
                Address::ZERO,
                vec![B256::with_last_byte(1)],
                Bytes::new(),
            ),
            block_number: Some(block),
            log_index: Some(index),
            ..Default::default()
        }
    }

    /// Historical logs keyed by block. Runs `on_fetch` after each window.
    struct FixedHistory {
        blocks: BTreeMap<u64, Vec<Log>>,
        on_fetch: Box<dyn Fn(u64) + Send + Sync>,
    }

    impl FixedHistory {
        fn new(logs: &[(u64, u64)]) -> Self {
            let mut blocks: BTreeMap<u64, Vec<Log>> = BTreeMap::new();
            for &(block, index) in logs {
                blocks.entry(block).or_default().push(log_at(block, index));
            }
            Self {
                blocks,
                on_fetch: Box::new(|_| {}),
            }
        }
    }

    #[async_trait]
    impl LogHistory for FixedHistory {
        async fn logs_between(&self, start: u64, end: u64) -> Result<Vec<Log>, ChainError> {
            let logs = self
                .blocks
                .range(start..=end)
                .flat_map(|(_, logs)| logs.iter().cloned())
                .collect();
            (self.on_fetch)(end);
            Ok(logs)
        }
    }

    #[async_trait]
    impl LiveLogs for broadcast::Receiver<Log> {
        async fn recv(&mut self) -> Result<Log, RecvError> {
            broadcast::Receiver::recv(self).await
        }
    }

    async fn positions(stream: LogStream) -> (Vec<(u64, u64)>, Option<ChainError>) {
        let items: Vec<_> = stream.collect().await;
        let mut seen = Vec::new();
        let mut error = None;
        for item in items {
            match item {
                Ok(log) => seen.push(log.position()),
                Err(e) => error = Some(e),
            }
        }
        (seen, error)
    }

    #[test]
    fn test_backfill_windows_cover_range() {
        let mut next = 1;
        let mut windows = Vec::new();
        while let Some((start, end)) = next_window(next, 12, 5) {
            windows.push((start, end));
            next = end + 1;
        }
        assert_eq!(windows, vec![(1, 5), (6, 10), (11, 12)]);
    }

    #[test]
    fn test_backfill_window_past_head() {
        assert_eq!(next_window(11, 10, 5), None);
        assert_eq!(next_window(10, 10, 5), Some((10, 10)));
    }

    #[test]
    fn test_zero_chunk_is_single_block() {
        assert_eq!(next_window(3, 10, 0), Some((3, 3)));
        let source = ChainLogSource::new("ws://localhost:8546", Address::ZERO, 0);
        assert_eq!(source.backfill_chunk_size, 1);
    }

    #[test]
    fn test_recv_error_mapping() {
        assert!(matches!(
            ChainError::from(RecvError::Lagged(7)),
            ChainError::Lagged { missed: 7 }
        ));
        assert!(matches!(
            ChainError::from(RecvError::Closed),
            ChainError::SubscriptionClosed
        ));
    }

    #[tokio::test]
    async fn test_backfill_precedes_live() {
        let (tx, rx) = broadcast::channel(16);
        tx.send(log_at(12, 0)).unwrap();
        tx.send(log_at(13, 0)).unwrap();
        drop(tx);

        let history = FixedHistory::new(&[(3, 0), (3, 1), (7, 0), (10, 2)]);
        let stream = backfill_then_tail(history, rx, 1, 10, 4);
        let (seen, error) = positions(stream).await;

        assert_eq!(seen, vec![(3, 0), (3, 1), (7, 0), (10, 2), (12, 0), (13, 0)]);
        assert!(matches!(error, Some(ChainError::SubscriptionClosed)));
    }

    #[tokio::test]
    async fn test_backfill_starts_at_from_block() {
        let (tx, rx) = broadcast::channel(4);
        drop(tx);

        let history = FixedHistory::new(&[(2, 0), (5, 0), (6, 0)]);
        let (seen, _) = positions(backfill_then_tail(history, rx, 5, 6, 10)).await;
        assert_eq!(seen, vec![(5, 0), (6, 0)]);
    }

    #[tokio::test]
    async fn test_overlap_is_delivered_twice() {
        // Head moved past block 10 after the subscription opened
        let (tx, rx) = broadcast::channel(16);
        tx.send(log_at(10, 0)).unwrap();
        tx.send(log_at(11, 0)).unwrap();
        drop(tx);

        let history = FixedHistory::new(&[(9, 0), (10, 0)]);
        let (seen, _) = positions(backfill_then_tail(history, rx, 9, 10, 5)).await;
        assert_eq!(seen, vec![(9, 0), (10, 0), (10, 0), (11, 0)]);
    }

    #[tokio::test]
    async fn test_live_logs_during_backfill_are_held() {
        let (tx, rx) = broadcast::channel(2);
        let sender = std::sync::Mutex::new(Some(tx));
        let mut history = FixedHistory::new(&[(1, 0), (2, 0), (3, 0)]);
        // Each window fetch sees one new live log, more than the buffer holds overall
        history.on_fetch = Box::new(move |end| {
            let mut sender = sender.lock().unwrap();
            if let Some(tx) = sender.as_ref() {
                tx.send(log_at(100 + end, 0)).unwrap();
            }
            if end == 3 {
                sender.take();
            }
        });

        let (seen, error) = positions(backfill_then_tail(history, rx, 1, 3, 1)).await;
        assert_eq!(
            seen,
            vec![(1, 0), (2, 0), (3, 0), (101, 0), (102, 0), (103, 0)]
        );
        assert!(matches!(error, Some(ChainError::SubscriptionClosed)));
    }

    #[tokio::test]
    async fn test_lagged_live_feed_ends_stream() {
        let (tx, rx) = broadcast::channel(2);
        for block in 20..25 {
            tx.send(log_at(block, 0)).unwrap();
        }

        let history = FixedHistory::new(&[(5, 0)]);
        let (seen, error) = positions(backfill_then_tail(history, rx, 5, 5, 10)).await;

        // Only the backfill gets through; the dropped logs surface as an error
        assert_eq!(seen, vec![(5, 0)]);
        assert!(matches!(error, Some(ChainError::Lagged { missed: 3 })));
        drop(tx);
    }

    #[tokio::test]
    async fn test_history_error_ends_stream() {
        struct FailingHistory;

        #[async_trait]
        impl LogHistory for FailingHistory {
            async fn logs_between(&self, _: u64, _: u64) -> Result<Vec<Log>, ChainError> {
                Err(ChainError::SubscriptionClosed)
            }
        }

        let (_tx, rx) = broadcast::channel::<Log>(2);
        let mut stream = backfill_then_tail(FailingHistory, rx, 1, 5, 2);
        assert!(matches!(stream.next().await, Some(Err(_))));
        assert!(stream.next().await.is_none());
    }
}
