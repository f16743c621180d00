//! Global averages - one price per fiat currency, traded or not
//!
//! Each traded currency's weighted average is converted into the target
//! currency through the FX table and blended by that currency's share of
//! the overall volume.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::oracle::aggregator::{CurrencyAverage, CurrencyTotals};
use crate::oracle::fx::FxRateTable;
use crate::types::{percent_of, quantize, saturating_sum};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalAverage {
    pub currency: String,
    pub last: Decimal,
    pub ask: Decimal,
    pub bid: Decimal,
    /// Volume across every blended currency
    pub volume: Decimal,
    /// This currency's own share of that volume (zero if not traded)
    pub volume_percent: Decimal,
    /// 24h mean of this global average, filled in from history
    #[serde(default)]
    pub day_average: Option<Decimal>,
}

/// Share of the combined volume per traded currency, restricted to the
/// currencies the FX table can convert.
pub fn global_volume_percents(
    totals: &BTreeMap<String, CurrencyTotals>,
    fx: &FxRateTable,
) -> BTreeMap<String, Decimal> {
    let convertible: Vec<&CurrencyTotals> = totals
        .values()
        .filter(|t| fx.cross_rate(&t.currency, &t.currency).is_some())
        .collect();
    let combined = saturating_sum(convertible.iter().map(|t| t.total_volume));

    convertible
        .into_iter()
        .map(|t| (t.currency.clone(), percent_of(t.total_volume, combined)))
        .collect()
}

/// `acc + price * weight`, quantized, or `None` when it does not fit.
fn blend(acc: Decimal, price: Decimal, weight: Decimal) -> Option<Decimal> {
    price
        .checked_mul(weight)
        .and_then(|term| acc.checked_add(term))
        .map(quantize)
}

/// Blend every traded currency's average into each FX-known currency.
pub fn global_averages(
    averages: &BTreeMap<String, CurrencyAverage>,
    totals: &BTreeMap<String, CurrencyTotals>,
    fx: &FxRateTable,
) -> BTreeMap<String, GlobalAverage> {
    let percents = global_volume_percents(totals, fx);
    let combined_volume = quantize(saturating_sum(
        percents
            .keys()
            .filter_map(|c| totals.get(c))
            .map(|t| t.total_volume),
    ));

    fx.currencies()
        .map(|target| {
            let mut global = GlobalAverage {
                currency: target.clone(),
                last: quantize(Decimal::ZERO),
                ask: quantize(Decimal::ZERO),
                bid: quantize(Decimal::ZERO),
                volume: combined_volume,
                volume_percent: percents
                    .get(target)
                    .copied()
                    .unwrap_or_else(|| quantize(Decimal::ZERO)),
                day_average: None,
            };

            for (traded, percent) in &percents {
                let (Some(avg), Some(cross)) = (averages.get(traded), fx.cross_rate(target, traded))
                else {
                    continue;
                };
                let weight = (*percent / Decimal::ONE_HUNDRED).checked_mul(cross);
                let fields = [
                    (&mut global.last, avg.last),
                    (&mut global.ask, avg.ask),
                    (&mut global.bid, avg.bid),
                ];
                for (acc, price) in fields {
                    match weight.and_then(|w| blend(*acc, price, w)) {
                        Some(sum) => *acc = sum,
                        None => warn!(
                            target_currency = %target,
                            traded = %traded,
                            "Global average term overflowed, skipped"
                        ),
                    }
                }
            }

            (target.clone(), global)
        })
        .collect()
}
