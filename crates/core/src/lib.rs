//! Indexer core: event processing, the ledger cache and its maintenance.
//!
//! Logs flow from the [`LogDriver`] through the [`Dispatcher`] into the
//! [`EventProcessor`], which persists them and enqueues [`LedgerMetric`]s.
//! Sharded [`LedgerWorker`]s apply the metrics to the [`Ledger`];
//! the [`LiquidationScanner`] periodically revalues every position at live
//! prices.

mod assets;
pub mod config;
mod dispatcher;
mod ledger;
mod ledger_worker;
mod log_driver;
mod metric;
mod price_resolver;
mod processor;
mod read_model;
mod records;
mod repository;
mod resync;
mod scanner;
pub mod u256_math;

pub use assets::{CollateralRegistry, CollateralToken};
pub use config::{load_config, ConfigError, IndexerConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use ledger::{address_field, InMemoryLedger, Ledger, LedgerError, LedgerStore};
pub use ledger_worker::{spawn_ledger_workers, ApplyError, LedgerWorker};
pub use log_driver::LogDriver;
pub use metric::{Asset, LedgerMetric, MetricQueue, Operation, QueueClosed};
pub use price_resolver::{PriceError, PriceResolver};
pub use processor::{EventProcessor, ProcessError, ProcessOutcome};
pub use read_model::{
    CollateralTotals, Dashboard, LiquidatableUser, PositionReader, Projection, ProtocolHealth,
    ReadError, SupplyStats, TokenBalance, TokenShare, UserHistory, UserPosition,
};
pub use records::{
    BurnRecord, ChainEvent, DepositRecord, DomainRecord, LiquidationRecord, MintRecord,
    NewChainEvent, PricePin, RedeemRecord,
};
pub use repository::{InMemoryRepository, Page, Repository, RepositoryError, UserAmount, UserTotal};
pub use resync::{LedgerRebuilder, RebuildError, RebuildReport};
pub use scanner::{LiquidationScanner, ScanReport};
