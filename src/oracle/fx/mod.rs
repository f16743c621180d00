//! FX rates - conversion table for global averages
//!
//! Rates are expressed against one common base: `rate[X]` is how many units
//! of `X` one unit of the base buys. Any pair can then be crossed through the
//! base without the table having to name it.

mod http;

pub use http::HttpFxRateSource;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::error::FxError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub name: String,
    pub rate: Decimal,
}

/// Currency code -> rate relative to the common base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRateTable {
    pub rates: BTreeMap<String, FxRate>,
    pub fetched_at: DateTime<Utc>,
}

impl FxRateTable {
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            rates: BTreeMap::new(),
            fetched_at,
        }
    }

    /// Build a table from `(code, rate)` pairs, using the code as the name.
    pub fn from_rates<'a>(
        fetched_at: DateTime<Utc>,
        rates: impl IntoIterator<Item = (&'a str, Decimal)>,
    ) -> Self {
        let mut table = Self::new(fetched_at);
        for (code, rate) in rates {
            table.insert(code, code, rate);
        }
        table
    }

    pub fn insert(&mut self, code: &str, name: &str, rate: Decimal) {
        self.rates.insert(
            code.to_uppercase(),
            FxRate {
                name: name.to_string(),
                rate,
            },
        );
    }

    pub fn rate(&self, code: &str) -> Option<Decimal> {
        self.rates.get(code).map(|r| r.rate)
    }

    pub fn currencies(&self) -> impl Iterator<Item = &String> {
        self.rates.keys()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Price of one unit of `from` expressed in `to`: `rate[to] / rate[from]`.
    pub fn cross_rate(&self, to: &str, from: &str) -> Option<Decimal> {
        let to_rate = self.rate(to)?;
        let from_rate = self.rate(from)?;
        if from_rate <= Decimal::ZERO {
            return None;
        }
        to_rate.checked_div(from_rate)
    }

    pub fn age(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.fetched_at
    }
}

/// Trait for FX rate providers
#[async_trait]
pub trait FxRateSource: Send + Sync {
    /// Fetch the current table, stamped with `now`.
    async fn fetch_rates(&self, now: DateTime<Utc>) -> Result<FxRateTable, FxError>;

    fn name(&self) -> &str;
}

/// Latest known FX table plus refresh bookkeeping
#[derive(Debug)]
pub struct FxRateCache {
    table: RwLock<Option<FxRateTable>>,
    last_attempt: RwLock<Option<DateTime<Utc>>>,
    refresh_every: ChronoDuration,
    max_age: ChronoDuration,
}

impl FxRateCache {
    pub fn new(refresh_every: ChronoDuration, max_age: ChronoDuration) -> Self {
        Self {
            table: RwLock::new(None),
            last_attempt: RwLock::new(None),
            refresh_every,
            max_age,
        }
    }

    /// Seed with a known table (tests, warm restarts)
    pub fn with_table(self, table: FxRateTable) -> Self {
        if let Ok(mut guard) = self.table.write() {
            *guard = Some(table);
        }
        self
    }

    /// Table usable at `now`, or `None` when missing or too old.
    pub fn current(&self, now: DateTime<Utc>) -> Option<FxRateTable> {
        let guard = self.table.read().ok()?;
        let table = guard.as_ref()?;
        if table.age(now) > self.max_age {
            return None;
        }
        Some(table.clone())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_attempt.read().ok().and_then(|g| *g) {
            Some(last) => now - last >= self.refresh_every,
            None => true,
        }
    }

    /// Fetch a fresh table. On failure the previous table is kept.
    pub async fn refresh(&self, source: &dyn FxRateSource, now: DateTime<Utc>) -> Result<usize, FxError> {
        if let Ok(mut guard) = self.last_attempt.write() {
            *guard = Some(now);
        }

        match source.fetch_rates(now).await {
            Ok(table) => {
                let count = table.len();
                if let Ok(mut guard) = self.table.write() {
                    *guard = Some(table);
                }
                info!(source = source.name(), currencies = count, "FX rates refreshed");
                Ok(count)
            }
            Err(e) => {
                warn!(source = source.name(), error = %e, "FX refresh failed, keeping previous table");
                Err(e)
            }
        }
    }
}
