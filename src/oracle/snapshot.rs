//! Published snapshot of one aggregation run
//!
//! This is the shape handed to whatever serves the index: per-currency
//! averages with each exchange's contribution, global averages, and the
//! sources currently ignored.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::oracle::aggregator::Aggregation;
use crate::oracle::fx::FxRateTable;
use crate::oracle::global::GlobalAverage;
use crate::types::{quantize, CollectedVia};

/// 24h means looked up from history, keyed by currency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayAverages {
    pub local: HashMap<String, Decimal>,
    pub global: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotAverages {
    pub last: Decimal,
    pub ask: Decimal,
    pub bid: Decimal,
    pub total_vol: Decimal,
    #[serde(rename = "24h_avg")]
    pub day_avg: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub ask: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub last: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeEntry {
    pub rates: ExchangeRates,
    pub volume_btc: Decimal,
    pub volume_percent: Decimal,
    /// Whether the quote was fetched this tick or served from cache
    pub source: CollectedVia,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencySnapshot {
    pub averages: SnapshotAverages,
    pub exchanges: BTreeMap<String, ExchangeEntry>,
    pub global_averages: Option<GlobalAverage>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub timestamp: DateTime<Utc>,
    pub currencies: BTreeMap<String, CurrencySnapshot>,
    /// Absent when the FX table was unavailable for this run
    pub global_averages: Option<BTreeMap<String, GlobalAverage>>,
    pub ignored: BTreeMap<String, String>,
    /// Raw aggregation, kept for the history store
    #[serde(skip)]
    pub aggregation: Aggregation,
    /// FX table the global averages were computed with
    #[serde(skip)]
    pub fx: Option<FxRateTable>,
}

impl IndexSnapshot {
    pub fn build(
        aggregation: Aggregation,
        timestamp: DateTime<Utc>,
        display_names: &HashMap<String, String>,
        ignored: BTreeMap<String, String>,
        day_averages: &DayAverages,
    ) -> Self {
        let global_averages = aggregation.global_averages.clone().map(|mut globals| {
            for (code, global) in globals.iter_mut() {
                global.day_average = day_averages.global.get(code).copied();
            }
            globals
        });

        let currencies = aggregation
            .averages
            .values()
            .map(|avg| {
                let exchanges = aggregation
                    .shares_for(&avg.currency)
                    .map(|share| {
                        let quote = &share.quote;
                        let entry = ExchangeEntry {
                            rates: ExchangeRates {
                                ask: quote.ask,
                                bid: quote.bid,
                                last: quote.last,
                            },
                            volume_btc: quantize(quote.effective_volume()),
                            volume_percent: share.volume_percent,
                            source: quote.collected_via,
                            display_name: display_names
                                .get(&quote.source_id)
                                .cloned()
                                .unwrap_or_else(|| quote.source_id.clone()),
                        };
                        (quote.source_id.clone(), entry)
                    })
                    .collect();

                let snapshot = CurrencySnapshot {
                    averages: SnapshotAverages {
                        last: avg.last,
                        ask: avg.ask,
                        bid: avg.bid,
                        total_vol: avg.total_volume,
                        day_avg: day_averages
                            .local
                            .get(&avg.currency)
                            .copied()
                            .unwrap_or_else(|| quantize(Decimal::ZERO)),
                    },
                    exchanges,
                    global_averages: global_averages
                        .as_ref()
                        .and_then(|g| g.get(&avg.currency).cloned()),
                    timestamp,
                };
                (avg.currency.clone(), snapshot)
            })
            .collect();

        Self {
            timestamp,
            currencies,
            global_averages,
            ignored,
            aggregation,
            fx: None,
        }
    }

    pub fn with_fx(mut self, fx: Option<FxRateTable>) -> Self {
        self.fx = fx;
        self
    }

    pub fn currency(&self, code: &str) -> Option<&CurrencySnapshot> {
        self.currencies.get(code)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
