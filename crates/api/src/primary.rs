//! Spot price client: `GET {base}/{SYMBOL}-USD` returning `{"data":{"amount":"..."}}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::PriceFeedError;
use crate::price_feed::{base_symbol, PriceSource};

#[derive(Debug, Deserialize)]
struct SpotResponse {
    data: SpotData,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    amount: String,
}

/// Primary spot price provider.
#[derive(Debug, Clone)]
pub struct SpotPriceClient {
    client: reqwest::Client,
    base_url: String,
}

impl SpotPriceClient {
    const NAME: &'static str = "spot";

    /// Create a client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PriceFeedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, token: &str) -> String {
        format!("{}/{}-USD", self.base_url, base_symbol(token))
    }
}

#[async_trait]
impl PriceSource for SpotPriceClient {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(skip(self))]
    async fn usd_price(&self, token: &str) -> Result<String, PriceFeedError> {
        let url = self.url(token);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PriceFeedError::Status {
                source_name: Self::NAME,
                status: status.as_u16(),
                body,
            });
        }

        let amount = parse_spot_body(&body)?;
        debug!(token, price = %amount, "Fetched spot price");
        Ok(amount)
    }
}

fn parse_spot_body(body: &str) -> Result<String, PriceFeedError> {
    let parsed: SpotResponse =
        serde_json::from_str(body).map_err(|e| PriceFeedError::Parse {
            source_name: SpotPriceClient::NAME,
            reason: e.to_string(),
        })?;
    Ok(parsed.data.amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_url_uses_base_symbol() {
        let client = SpotPriceClient::new("https://prices.example/v2/prices/", Duration::from_secs(10))
            .unwrap();
        assert_eq!(client.url("weth"), "https://prices.example/v2/prices/ETH-USD");
        assert_eq!(client.url("BTC"), "https://prices.example/v2/prices/BTC-USD");
    }

    #[test]
    fn test_parse_spot_body() {
        let body = r#"{"data":{"base":"ETH","currency":"USD","amount":"2000.12"}}"#;
        assert_eq!(parse_spot_body(body).unwrap(), "2000.12");
    }

    #[test]
    fn test_parse_spot_body_missing_amount() {
        let err = parse_spot_body(r#"{"data":{}}"#).unwrap_err();
        assert!(matches!(err, PriceFeedError::Parse { source_name: "spot", .. }));
    }
}
