//! Log subscription driver: resumes from the last recorded block and fans
//! logs out to a pool of dispatch tasks.

use std::sync::Arc;

use anchor_chain::{LogSource, RawLog};
use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use crate::repository::Repository;

/// Logs buffered between the subscription and the dispatch tasks.
const LOG_CHANNEL_CAPACITY: usize = 256;

pub struct LogDriver {
    source: Arc<dyn LogSource>,
    repository: Arc<dyn Repository>,
    dispatcher: Dispatcher,
    workers: usize,
}

impl std::fmt::Debug for LogDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDriver")
            .field("workers", &self.workers)
            .finish()
    }
}

impl LogDriver {
    pub fn new(
        source: Arc<dyn LogSource>,
        repository: Arc<dyn Repository>,
        dispatcher: Dispatcher,
        workers: usize,
    ) -> Self {
        Self {
            source,
            repository,
            dispatcher,
            workers: workers.max(1),
        }
    }

    /// Block to resume from. An empty store starts at block 1.
    pub async fn start_block(&self) -> Result<u64> {
        let last = self
            .repository
            .last_processed_block()
            .await
            .context("failed to read last processed block")?;
        Ok(last.max(1))
    }

    /// Run until the subscription fails or ends. Both are returned as errors.
    pub async fn run(self) -> Result<()> {
        let from_block = self.start_block().await?;
        let mut stream = self
            .source
            .subscribe(from_block)
            .await
            .context("failed to open log subscription")?;

        info!(from_block, workers = self.workers, "Log subscription open");

        let (tx, rx) = mpsc::channel::<RawLog>(LOG_CHANNEL_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let handles: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|id| spawn_dispatch_worker(id, rx.clone(), self.dispatcher.clone()))
            .collect();

        let outcome: Result<()> = loop {
            match stream.next().await {
                Some(Ok(log)) => {
                    if tx.send(log).await.is_err() {
                        break Err(anyhow!("dispatch workers stopped"));
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Log subscription failed");
                    break Err(anyhow::Error::new(e).context("log subscription failed"));
                }
                None => break Err(anyhow!("log subscription ended")),
            }
        };

        // Let in-flight logs finish before reporting
        drop(tx);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatch worker panicked");
            }
        }

        outcome
    }
}

fn spawn_dispatch_worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<RawLog>>>,
    dispatcher: Dispatcher,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            // Hold the lock only while receiving
            let next = rx.lock().await.recv().await;
            let Some(log) = next else {
                break;
            };
            let outcome = dispatcher.dispatch(&log).await;
            debug!(
                worker = id,
                block = log.block_number,
                log_index = log.log_index,
                ?outcome,
                "Dispatched log"
            );
        }
        debug!(worker = id, "Dispatch worker stopped");
    })
}
