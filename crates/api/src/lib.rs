//! Live USD price feed clients.
//!
//! This crate provides:
//! - A spot price client (primary provider)
//! - A ticker price client (fallback provider)
//! - A circuit breaker that routes around a failing primary

mod circuit_breaker;
mod error;
mod fallback;
mod price_feed;
mod primary;

pub use circuit_breaker::CircuitBreaker;
pub use error::PriceFeedError;
pub use fallback::TickerPriceClient;
pub use price_feed::{base_symbol, LivePriceFeed, PriceSource};
pub use primary::SpotPriceClient;
