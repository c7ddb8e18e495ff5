//! AnchorUSD Indexer
//!
//! Follows the stablecoin engine's events and keeps a ledger of per-user
//! collateral, debt and health factor.
//! - Resumable log subscription with historical backfill
//! - Exactly-once event persistence
//! - Per-user ordered ledger updates on a sharded worker pool
//! - Periodic solvency scan at live prices
//!
//! Storage is wired to the in-memory `Repository` and `LedgerStore`, so a
//! restart begins at block 1 with an empty ledger. Durable backends plug in
//! behind those two traits.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use anchor_api::{CircuitBreaker, LivePriceFeed, PriceSource, SpotPriceClient, TickerPriceClient};
use anchor_chain::ChainLogSource;
use anchor_core::{
    load_config, spawn_ledger_workers, Dispatcher, EventProcessor, IndexerConfig, InMemoryLedger,
    InMemoryRepository, Ledger, LedgerRebuilder, LiquidationScanner, LogDriver, MetricQueue,
    PriceResolver, Repository,
};

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();
    init_tracing();

    let config = load_config().context("invalid configuration")?;
    config.log_config();

    tokio::select! {
        result = run(config) => {
            if let Err(e) = &result {
                error!(error = format!("{e:#}"), "Indexer stopped");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,anchor_core=debug,anchor_chain=debug"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

async fn run(config: IndexerConfig) -> Result<()> {
    info!("Initializing components...");

    // Process-local storage; nothing survives a restart
    let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let ledger = Ledger::new(Arc::new(InMemoryLedger::new()));
    let registry = Arc::new(config.registry());

    // Price feed with circuit breaker
    let feed = build_price_feed(&config)?;
    let resolver = Arc::new(PriceResolver::new(repository.clone(), feed.clone()));

    // Sharded metric queue and ledger workers
    let (queue, receivers) = MetricQueue::new(
        config.workers.ledger_workers,
        config.workers.metric_queue_capacity,
    );
    let _ledger_workers = spawn_ledger_workers(receivers, ledger.clone(), resolver, registry.clone());
    info!(shards = queue.shard_count(), "Ledger workers started");

    // Restore the ledger before any new event is applied
    LedgerRebuilder::new(repository.clone(), ledger.clone(), registry.clone())
        .rebuild()
        .await
        .context("ledger rebuild failed")?;

    let scanner = LiquidationScanner::new(ledger, feed, registry);
    if let Err(e) = scanner.scan().await {
        error!(error = format!("{e:#}"), "Initial liquidation scan failed");
    }
    tokio::spawn(scanner.run(config.scanner.scan_interval()));

    let source = Arc::new(ChainLogSource::new(
        config.chain.ws_url.clone(),
        config.contract_address()?,
        config.chain.backfill_chunk_size,
    ));
    let processor = EventProcessor::new(repository.clone(), queue);
    let dispatcher = Dispatcher::new(repository.clone(), processor);
    let driver = LogDriver::new(source, repository, dispatcher, config.workers.decoder_workers);

    info!("All components initialized");
    driver.run().await
}

fn build_price_feed(config: &IndexerConfig) -> Result<Arc<dyn PriceSource>> {
    let settings = &config.price_feed;
    let primary = SpotPriceClient::new(settings.url.clone(), settings.timeout())
        .context("failed to build spot price client")?;
    let breaker = CircuitBreaker::new(
        settings.circuit_breaker_threshold,
        settings.circuit_breaker_cooldown(),
    );

    let mut feed = LivePriceFeed::new(Arc::new(primary), breaker);
    if let Some(url) = &settings.fallback_url {
        let fallback = TickerPriceClient::new(url.clone(), settings.timeout())
            .context("failed to build fallback price client")?;
        feed = feed.with_fallback(Arc::new(fallback));
    }
    let feed: Arc<dyn PriceSource> = Arc::new(feed);
    Ok(feed)
}

fn print_banner() {
    println!(
        r#"
    ╔═╗┌┐┌┌─┐┬ ┬┌─┐┬─┐╦ ╦╔═╗╔╦╗
    ╠═╣││││  ├─┤│ │├┬┘║ ║╚═╗ ║║
    ╩ ╩┘└┘└─┘┴ ┴└─┘┴└─╚═╝╚═╝═╩╝
    Indexer v0.1.0
    "#
    );
}
