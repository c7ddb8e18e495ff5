//! Raw contract log as delivered by the chain log source.

use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;

use crate::decoder::DecodeError;

/// A mined contract log, with the positional metadata the indexer keys on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    /// Emitting contract
    pub address: Address,
    /// Block the log was mined in
    pub block_number: u64,
    /// Transaction that emitted the log
    pub tx_hash: B256,
    /// Position of the log within the block
    pub log_index: u64,
    /// Indexed topics; `topics[0]` is the event signature hash
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed fields
    pub data: Bytes,
}

impl RawLog {
    /// Event signature hash, if the log carries any topics.
    pub fn signature(&self) -> Option<&B256> {
        self.topics.first()
    }

    /// Dedup key: `(block_number, log_index)`.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

impl TryFrom<Log> for RawLog {
    type Error = DecodeError;

    /// Pending logs lack block metadata and cannot be keyed, so they are rejected.
    fn try_from(log: Log) -> Result<Self, Self::Error> {
        let block_number = log
            .block_number
            .ok_or(DecodeError::MissingMetadata("block_number"))?;
        let log_index = log
            .log_index
            .ok_or(DecodeError::MissingMetadata("log_index"))?;
        let tx_hash = log.transaction_hash.unwrap_or_default();

        Ok(Self {
            address: log.address(),
            block_number,
            tx_hash,
            log_index,
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
        })
    }
}
