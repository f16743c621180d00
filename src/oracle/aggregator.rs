//! Oracle Aggregator - volume-weighted averages across sources
//!
//! Pure functions over the live quote set. Every sum is quantized to two
//! decimals, half to even. Weighted averages are quantized after each
//! partial accumulation, so the result follows quote order (source
//! configuration order); callers must keep that order stable.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::oracle::fx::FxRateTable;
use crate::oracle::global::{global_averages, GlobalAverage};
use crate::types::{percent_of, quantize, saturating_sum, Quote};

/// Per-currency volume totals for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    pub currency: String,
    pub total_volume: Decimal,
    pub total_volume_with_ask: Decimal,
    pub total_volume_with_bid: Decimal,
}

impl CurrencyTotals {
    fn empty(currency: &str) -> Self {
        Self {
            currency: currency.to_string(),
            total_volume: Decimal::ZERO,
            total_volume_with_ask: Decimal::ZERO,
            total_volume_with_bid: Decimal::ZERO,
        }
    }
}

/// A quote together with its weight inside its currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceShare {
    pub quote: Quote,
    pub volume_percent: Decimal,
    /// Only set when the quote carries an ask
    pub volume_percent_ask: Option<Decimal>,
    /// Only set when the quote carries a bid
    pub volume_percent_bid: Option<Decimal>,
}

/// Weighted average prices for one currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyAverage {
    pub currency: String,
    pub last: Decimal,
    pub ask: Decimal,
    pub bid: Decimal,
    pub total_volume: Decimal,
}

/// Everything one aggregation run produces
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregation {
    pub totals: BTreeMap<String, CurrencyTotals>,
    pub shares: Vec<SourceShare>,
    pub averages: BTreeMap<String, CurrencyAverage>,
    /// `None` when no FX table was available for the run
    pub global_averages: Option<BTreeMap<String, GlobalAverage>>,
}

/// Sum volumes per currency, overall and restricted to quotes with an
/// ask / bid. Missing or non-positive volume contributes zero but the
/// currency is still listed.
pub fn compute_totals(quotes: &[Quote]) -> BTreeMap<String, CurrencyTotals> {
    let mut totals: BTreeMap<String, CurrencyTotals> = BTreeMap::new();

    for quote in quotes {
        let entry = totals
            .entry(quote.currency.clone())
            .or_insert_with(|| CurrencyTotals::empty(&quote.currency));
        let volume = quote.effective_volume();
        entry.total_volume = saturating_sum([entry.total_volume, volume]);
        if quote.ask.is_some() {
            entry.total_volume_with_ask = saturating_sum([entry.total_volume_with_ask, volume]);
        }
        if quote.bid.is_some() {
            entry.total_volume_with_bid = saturating_sum([entry.total_volume_with_bid, volume]);
        }
    }

    for entry in totals.values_mut() {
        entry.total_volume = quantize(entry.total_volume);
        entry.total_volume_with_ask = quantize(entry.total_volume_with_ask);
        entry.total_volume_with_bid = quantize(entry.total_volume_with_bid);
    }
    totals
}

/// Each quote's share of its currency's volume, in percent.
pub fn compute_shares(
    quotes: &[Quote],
    totals: &BTreeMap<String, CurrencyTotals>,
) -> Vec<SourceShare> {
    quotes
        .iter()
        .map(|quote| {
            let totals = totals
                .get(&quote.currency)
                .cloned()
                .unwrap_or_else(|| CurrencyTotals::empty(&quote.currency));
            let volume = quote.effective_volume();
            SourceShare {
                volume_percent: percent_of(volume, totals.total_volume),
                volume_percent_ask: quote
                    .ask
                    .map(|_| percent_of(volume, totals.total_volume_with_ask)),
                volume_percent_bid: quote
                    .bid
                    .map(|_| percent_of(volume, totals.total_volume_with_bid)),
                quote: quote.clone(),
            }
        })
        .collect()
}

/// Fold `value * percent / 100` into `acc`, quantizing the running sum.
/// A term that does not fit is left out.
fn accumulate(acc: Decimal, value: Decimal, percent: Decimal) -> Decimal {
    let sum = value
        .checked_mul(percent)
        .and_then(|term| acc.checked_add(term / Decimal::ONE_HUNDRED));
    match sum {
        Some(sum) => quantize(sum),
        None => {
            warn!(value = %value, percent = %percent, "Weighted term overflowed, skipped");
            acc
        }
    }
}

/// Volume-weighted last/ask/bid per currency. A field no quote carries
/// averages to zero.
pub fn weighted_averages(
    shares: &[SourceShare],
    totals: &BTreeMap<String, CurrencyTotals>,
) -> BTreeMap<String, CurrencyAverage> {
    let mut averages: BTreeMap<String, CurrencyAverage> = totals
        .values()
        .map(|t| {
            (
                t.currency.clone(),
                CurrencyAverage {
                    currency: t.currency.clone(),
                    last: quantize(Decimal::ZERO),
                    ask: quantize(Decimal::ZERO),
                    bid: quantize(Decimal::ZERO),
                    total_volume: t.total_volume,
                },
            )
        })
        .collect();

    for share in shares {
        let Some(avg) = averages.get_mut(&share.quote.currency) else {
            continue;
        };
        if let Some(last) = share.quote.last {
            avg.last = accumulate(avg.last, last, share.volume_percent);
        }
        if let (Some(ask), Some(pct)) = (share.quote.ask, share.volume_percent_ask) {
            avg.ask = accumulate(avg.ask, ask, pct);
        }
        if let (Some(bid), Some(pct)) = (share.quote.bid, share.volume_percent_bid) {
            avg.bid = accumulate(avg.bid, bid, pct);
        }
    }
    averages
}

/// Run the whole pipeline. Without an FX table the global averages are
/// omitted rather than defaulted.
pub fn aggregate(quotes: &[Quote], fx: Option<&FxRateTable>) -> Aggregation {
    let totals = compute_totals(quotes);
    let shares = compute_shares(quotes, &totals);
    let averages = weighted_averages(&shares, &totals);
    let global_averages = fx.map(|table| global_averages(&averages, &totals, table));

    Aggregation {
        totals,
        shares,
        averages,
        global_averages,
    }
}

impl Aggregation {
    /// Shares belonging to one currency, in fold order
    pub fn shares_for<'a>(&'a self, currency: &'a str) -> impl Iterator<Item = &'a SourceShare> + 'a {
        self.shares.iter().filter(move |s| s.quote.currency == currency)
    }

    pub fn total_volume(&self) -> Decimal {
        quantize(saturating_sum(self.totals.values().map(|t| t.total_volume)))
    }
}
