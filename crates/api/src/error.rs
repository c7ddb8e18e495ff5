use std::time::Duration;

use thiserror::Error;

/// Live price feed errors.
#[derive(Debug, Error)]
pub enum PriceFeedError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{source_name} returned status {status}: {body}")]
    Status {
        source_name: &'static str,
        status: u16,
        body: String,
    },

    #[error("{source_name} returned an unreadable body: {reason}")]
    Parse {
        source_name: &'static str,
        reason: String,
    },

    #[error("{source_name} has no quote for {symbol}")]
    UnknownSymbol {
        source_name: &'static str,
        symbol: String,
    },

    #[error("primary circuit open for another {remaining:?} and no fallback configured")]
    CircuitOpen { remaining: Duration },

    #[error("primary unavailable ({primary}); fallback failed: {fallback}")]
    Exhausted {
        primary: String,
        fallback: Box<PriceFeedError>,
    },
}
