//! Generic JSON ticker adapter
//!
//! Most venues expose a plain REST ticker per market. Instead of one client
//! per venue, the source configuration lists the ticker URL for each
//! settlement currency and JSON pointers to the ask/bid/last/volume fields.

use async_trait::async_trait;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SourceError;
use crate::oracle::sources::SourceAdapter;
use crate::types::{MarketMapping, Quote, SourceConfig};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct HttpTickerAdapter {
    client: reqwest::Client,
}

impl HttpTickerAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_market(
        &self,
        source_id: &str,
        market: &MarketMapping,
    ) -> Result<Quote, SourceError> {
        let response = self.client.get(&market.url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }
        let body: Value = response.json().await?;

        let mut quote = Quote::new(source_id, market.currency.as_str());
        quote.ask = read_field(&body, market.ask.as_deref(), "ask")?;
        quote.bid = read_field(&body, market.bid.as_deref(), "bid")?;
        quote.last = read_field(&body, market.last.as_deref(), "last")?;
        quote.volume = read_field(&body, market.volume.as_deref(), "volume")?;

        if quote.ask.is_none() && quote.bid.is_none() && quote.last.is_none() {
            return Err(SourceError::Malformed(format!(
                "{} ticker has no price fields",
                market.currency
            )));
        }
        Ok(quote)
    }
}

impl Default for HttpTickerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for HttpTickerAdapter {
    async fn fetch(&self, config: &SourceConfig) -> Result<Vec<Quote>, SourceError> {
        if config.markets.is_empty() {
            return Err(SourceError::Malformed(format!(
                "source {} has no markets configured",
                config.id
            )));
        }

        let results = join_all(
            config
                .markets
                .iter()
                .map(|market| self.fetch_market(&config.id, market)),
        )
        .await;

        // One broken market fails the whole source so its cache stays coherent
        results.into_iter().collect()
    }
}

/// Resolve a JSON pointer to a decimal. A missing pointer or a null value is
/// an absent field; anything else that is not numeric is malformed.
fn read_field(
    body: &Value,
    pointer: Option<&str>,
    field: &str,
) -> Result<Option<Decimal>, SourceError> {
    let Some(pointer) = pointer else {
        return Ok(None);
    };
    match body.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => parse_decimal(&n.to_string(), field).map(Some),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_decimal(s.trim(), field).map(Some),
        Some(other) => Err(SourceError::Malformed(format!(
            "{field} at {pointer} is not numeric: {other}"
        ))),
    }
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, SourceError> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| SourceError::Malformed(format!("{field} value {raw:?}: {e}")))
}
