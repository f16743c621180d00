//! HTTP FX rate source
//!
//! Expects a JSON object keyed by currency code:
//! `{"EUR": {"name": "Euro", "rate": "0.9213"}, ...}`. Rates may be JSON
//! numbers or numeric strings and must be strictly positive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FxError;
use crate::oracle::fx::{FxRateSource, FxRateTable};

#[derive(Debug, Deserialize)]
struct RawFxEntry {
    #[serde(default)]
    name: Option<String>,
    rate: Value,
}

#[derive(Debug, Clone)]
pub struct HttpFxRateSource {
    client: reqwest::Client,
    url: String,
    /// Added at rate 1 when the payload leaves it out
    base: Option<String>,
}

impl HttpFxRateSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            url: url.into(),
            base: None,
        }
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            base: None,
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into().to_uppercase());
        self
    }

    fn parse_table(
        &self,
        raw: HashMap<String, RawFxEntry>,
        fetched_at: DateTime<Utc>,
    ) -> Result<FxRateTable, FxError> {
        if raw.is_empty() {
            return Err(FxError::Empty);
        }

        let mut table = FxRateTable::new(fetched_at);
        for (code, entry) in raw {
            let rate = parse_rate(&code, &entry.rate)?;
            let name = entry.name.unwrap_or_else(|| code.clone());
            table.insert(&code, &name, rate);
        }
        if let Some(base) = &self.base {
            if table.rate(base).is_none() {
                table.insert(base, base, Decimal::ONE);
            }
        }
        Ok(table)
    }
}

fn parse_rate(code: &str, value: &Value) -> Result<Decimal, FxError> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(FxError::Malformed {
                currency: code.to_string(),
                reason: format!("not a number: {other}"),
            })
        }
    };

    let rate = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|e| FxError::Malformed {
            currency: code.to_string(),
            reason: e.to_string(),
        })?;

    if rate <= Decimal::ZERO {
        return Err(FxError::Malformed {
            currency: code.to_string(),
            reason: format!("non-positive rate {rate}"),
        });
    }
    Ok(rate)
}

#[async_trait]
impl FxRateSource for HttpFxRateSource {
    async fn fetch_rates(&self, now: DateTime<Utc>) -> Result<FxRateTable, FxError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(FxError::Status(response.status().as_u16()));
        }
        let raw: HashMap<String, RawFxEntry> = response.json().await?;
        self.parse_table(raw, now)
    }

    fn name(&self) -> &str {
        "http"
    }
}
