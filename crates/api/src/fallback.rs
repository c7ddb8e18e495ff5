//! Ticker price client: `GET {base}` returning `[{"symbol":"ETHUSDT","price":"..."}]`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::PriceFeedError;
use crate::price_feed::{base_symbol, PriceSource};

#[derive(Debug, Deserialize)]
struct Ticker {
    symbol: String,
    price: String,
}

/// Fallback ticker provider, quoting against USDT.
#[derive(Debug, Clone)]
pub struct TickerPriceClient {
    client: reqwest::Client,
    base_url: String,
}

impl TickerPriceClient {
    const NAME: &'static str = "ticker";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PriceFeedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Map a collateral token name to the ticker's pair symbol.
    pub fn pair_symbol(token: &str) -> String {
        format!("{}USDT", base_symbol(token))
    }
}

#[async_trait]
impl PriceSource for TickerPriceClient {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(skip(self))]
    async fn usd_price(&self, token: &str) -> Result<String, PriceFeedError> {
        let response = self.client.get(&self.base_url).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PriceFeedError::Status {
                source_name: Self::NAME,
                status: status.as_u16(),
                body,
            });
        }

        let price = find_ticker_price(&body, &Self::pair_symbol(token))?;
        debug!(token, price = %price, "Fetched fallback ticker price");
        Ok(price)
    }
}

fn find_ticker_price(body: &str, symbol: &str) -> Result<String, PriceFeedError> {
    let tickers: Vec<Ticker> = serde_json::from_str(body).map_err(|e| PriceFeedError::Parse {
        source_name: TickerPriceClient::NAME,
        reason: e.to_string(),
    })?;

    tickers
        .into_iter()
        .find(|t| t.symbol == symbol)
        .map(|t| t.price)
        .ok_or_else(|| PriceFeedError::UnknownSymbol {
            source_name: TickerPriceClient::NAME,
            symbol: symbol.to_string(),
        })
}
