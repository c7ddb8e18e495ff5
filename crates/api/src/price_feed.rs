//! Live USD price feed with circuit-breaker failover.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::PriceFeedError;

/// A provider of current USD prices as decimal strings (e.g. `"2000.12"`).
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &'static str;

    async fn usd_price(&self, token: &str) -> Result<String, PriceFeedError>;
}

/// Strip the wrapped-token prefix and uppercase: `weth` -> `ETH`.
pub fn base_symbol(token: &str) -> String {
    let upper = token.trim().to_ascii_uppercase();
    match upper.as_str() {
        "WETH" => "ETH".to_string(),
        "WBTC" => "BTC".to_string(),
        _ => upper,
    }
}

/// Primary provider guarded by a circuit breaker, with an optional fallback.
pub struct LivePriceFeed {
    primary: Arc<dyn PriceSource>,
    fallback: Option<Arc<dyn PriceSource>>,
    breaker: CircuitBreaker,
}

impl std::fmt::Debug for LivePriceFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivePriceFeed")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|s| s.name()))
            .field("breaker", &self.breaker)
            .finish()
    }
}

impl LivePriceFeed {
    pub fn new(primary: Arc<dyn PriceSource>, breaker: CircuitBreaker) -> Self {
        Self {
            primary,
            fallback: None,
            breaker,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn PriceSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn try_fallback(
        &self,
        token: &str,
        primary_error: PriceFeedError,
    ) -> Result<String, PriceFeedError> {
        let Some(fallback) = &self.fallback else {
            return Err(primary_error);
        };

        match fallback.usd_price(token).await {
            Ok(price) => {
                debug!(token, source = fallback.name(), "Served price from fallback");
                Ok(price)
            }
            Err(e) => Err(PriceFeedError::Exhausted {
                primary: primary_error.to_string(),
                fallback: Box::new(e),
            }),
        }
    }
}

#[async_trait]
impl PriceSource for LivePriceFeed {
    fn name(&self) -> &'static str {
        "live"
    }

    #[instrument(skip(self))]
    async fn usd_price(&self, token: &str) -> Result<String, PriceFeedError> {
        if let Some(remaining) = self.breaker.remaining() {
            return self
                .try_fallback(token, PriceFeedError::CircuitOpen { remaining })
                .await;
        }

        match self.primary.usd_price(token).await {
            Ok(price) => {
                self.breaker.record_success();
                Ok(price)
            }
            Err(e) => {
                warn!(
                    token,
                    source = self.primary.name(),
                    error = %e,
                    failures = self.breaker.failures() + 1,
                    "Primary price feed failed"
                );
                self.breaker.record_failure();
                self.try_fallback(token, e).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replays scripted results, then repeats the last one.
    struct Scripted {
        name: &'static str,
        script: Mutex<VecDeque<Result<&'static str, &'static str>>>,
        last: Mutex<Result<&'static str, &'static str>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, script: Vec<Result<&'static str, &'static str>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                last: Mutex::new(script.last().copied().unwrap_or(Err("empty"))),
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceSource for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn usd_price(&self, token: &str) -> Result<String, PriceFeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front().unwrap_or(*self.last.lock());
            next.map(str::to_string)
                .map_err(|reason| PriceFeedError::UnknownSymbol {
                    source_name: self.name,
                    symbol: format!("{token}:{reason}"),
                })
        }
    }

    #[tokio::test]
    async fn test_primary_success() {
        let primary = Scripted::new("primary", vec![Ok("2000.5")]);
        let feed = LivePriceFeed::new(primary.clone(), CircuitBreaker::new(5, Duration::from_secs(60)));

        assert_eq!(feed.usd_price("ETH").await.unwrap(), "2000.5");
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_primary() {
        let primary = Scripted::new("primary", vec![Err("down")]);
        let fallback = Scripted::new("fallback", vec![Ok("1999")]);
        let feed = LivePriceFeed::new(primary.clone(), CircuitBreaker::new(3, Duration::from_secs(60)))
            .with_fallback(fallback.clone());

        for _ in 0..3 {
            assert_eq!(feed.usd_price("ETH").await.unwrap(), "1999");
        }
        assert_eq!(primary.calls(), 3);
        assert!(feed.breaker().is_open());

        // Within cooldown the primary is not attempted
        assert_eq!(feed.usd_price("ETH").await.unwrap(), "1999");
        assert_eq!(feed.usd_price("BTC").await.unwrap(), "1999");
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 5);
    }

    #[tokio::test]
    async fn test_success_resets_failure_counter() {
        let primary = Scripted::new("primary", vec![Err("a"), Err("b"), Ok("10")]);
        let feed = LivePriceFeed::new(primary, CircuitBreaker::new(5, Duration::from_secs(60)));

        assert!(feed.usd_price("ETH").await.is_err());
        assert!(feed.usd_price("ETH").await.is_err());
        assert_eq!(feed.breaker().failures(), 2);

        assert_eq!(feed.usd_price("ETH").await.unwrap(), "10");
        assert_eq!(feed.breaker().failures(), 0);
    }

    #[tokio::test]
    async fn test_fallback_success_does_not_reset_primary_counter() {
        let primary = Scripted::new("primary", vec![Err("down")]);
        let fallback = Scripted::new("fallback", vec![Ok("1")]);
        let feed = LivePriceFeed::new(primary, CircuitBreaker::new(5, Duration::from_secs(60)))
            .with_fallback(fallback);

        feed.usd_price("ETH").await.unwrap();
        feed.usd_price("ETH").await.unwrap();
        assert_eq!(feed.breaker().failures(), 2);
    }

    #[tokio::test]
    async fn test_both_fail_is_combined_error() {
        let primary = Scripted::new("primary", vec![Err("down")]);
        let fallback = Scripted::new("fallback", vec![Err("also down")]);
        let feed = LivePriceFeed::new(primary, CircuitBreaker::new(1, Duration::from_secs(60)))
            .with_fallback(fallback);

        let err = feed.usd_price("ETH").await.unwrap_err();
        assert!(matches!(err, PriceFeedError::Exhausted { .. }));

        // Circuit is now open; the combined error names the open circuit
        match feed.usd_price("ETH").await.unwrap_err() {
            PriceFeedError::Exhausted { primary, .. } => assert!(primary.contains("circuit open")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_open_without_fallback() {
        let primary = Scripted::new("primary", vec![Err("down")]);
        let feed = LivePriceFeed::new(primary.clone(), CircuitBreaker::new(1, Duration::from_secs(60)));

        assert!(feed.usd_price("ETH").await.is_err());
        let err = feed.usd_price("ETH").await.unwrap_err();
        assert!(matches!(err, PriceFeedError::CircuitOpen { .. }));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_primary_retried_after_cooldown() {
        let primary = Scripted::new("primary", vec![Err("down"), Ok("42")]);
        let feed = LivePriceFeed::new(primary.clone(), CircuitBreaker::new(1, Duration::from_millis(10)));

        assert!(feed.usd_price("ETH").await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(feed.usd_price("ETH").await.unwrap(), "42");
        assert_eq!(primary.calls(), 2);
        assert!(!feed.breaker().is_open());
    }

    #[test]
    fn test_base_symbol() {
        assert_eq!(base_symbol("weth"), "ETH");
        assert_eq!(base_symbol(" WBTC "), "BTC");
        assert_eq!(base_symbol("link"), "LINK");
    }
}
