//! Stablecoin protocol chain layer.
//!
//! This crate provides:
//! - The closed set of protocol event kinds and their signature topics
//! - A raw log model keyed by `(block_number, log_index)`
//! - Typed decoding of the five protocol events
//! - A log source that backfills history and then tails new logs over WebSocket

mod decoder;
mod event_listener;
mod events;
mod log;

pub use decoder::{DecodeError, ProtocolEvent};
pub use event_listener::{
    backfill_then_tail, ChainError, ChainLogSource, LiveLogs, LogHistory, LogSource, LogStream,
};
pub use events::{all_topics, EventKind};
pub use log::RawLog;
