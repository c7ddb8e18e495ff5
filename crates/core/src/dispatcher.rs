//! Per-log dedup and routing to the event processor.

use std::sync::Arc;

use anchor_chain::{EventKind, RawLog};
use tracing::{debug, error, instrument, warn};

use crate::processor::{EventProcessor, ProcessError, ProcessOutcome};
use crate::repository::Repository;

/// What happened to one delivered log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// `(block_number, log_index)` already recorded
    AlreadyProcessed,
    /// First topic is not a protocol event
    Unrecognized,
    Processed(ProcessOutcome),
    /// Dropped after a logged failure
    Dropped,
}

/// Dedups raw logs and dispatches recognized ones to the processor.
#[derive(Clone)]
pub struct Dispatcher {
    repository: Arc<dyn Repository>,
    processor: EventProcessor,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("processor", &self.processor)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(repository: Arc<dyn Repository>, processor: EventProcessor) -> Self {
        Self {
            repository,
            processor,
        }
    }

    /// Handle one log. Never fails: every error is logged and the log dropped.
    #[instrument(skip(self, log), fields(block = log.block_number, log_index = log.log_index))]
    pub async fn dispatch(&self, log: &RawLog) -> DispatchOutcome {
        match self
            .repository
            .find_event_in_block(log.log_index, log.block_number)
            .await
        {
            Ok(Some(_)) => {
                debug!("Log already processed, skipping");
                return DispatchOutcome::AlreadyProcessed;
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "Dedup lookup failed, dropping log");
                return DispatchOutcome::Dropped;
            }
        }

        let Some(kind) = log.signature().and_then(EventKind::from_topic) else {
            debug!(topic = ?log.signature(), "Unrecognized event signature");
            return DispatchOutcome::Unrecognized;
        };

        match self.processor.process(kind, log).await {
            Ok(outcome) => DispatchOutcome::Processed(outcome),
            Err(ProcessError::Decode(e)) => {
                warn!(%kind, error = %e, "Failed to decode log");
                DispatchOutcome::Dropped
            }
            Err(e) => {
                error!(%kind, error = %e, "Failed to process log");
                DispatchOutcome::Dropped
            }
        }
    }
}
