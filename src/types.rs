//! Core types used throughout the index
//!
//! Defines the normalized quote record, source identifiers and the
//! fixed-point helpers every monetary value passes through.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fractional digits kept for every price, volume and percentage.
pub const DEC_PLACES: u32 = 2;

/// Largest magnitude accepted for a price or volume reported by a venue.
pub const MAX_QUOTE_VALUE: Decimal = dec!(1000000000000000);

/// Quantize to two fractional digits, rounding half to even.
///
/// The result always carries a scale of exactly two so it renders as
/// `100.00` rather than `100`.
pub fn quantize(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(DEC_PLACES, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(DEC_PLACES);
    rounded
}

/// `100 * part / whole`, quantized. Zero when `whole` is not positive.
pub fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return quantize(Decimal::ZERO);
    }
    let percent = Decimal::ONE_HUNDRED
        .checked_mul(part)
        .and_then(|scaled| scaled.checked_div(whole))
        // Divide first when the product does not fit
        .or_else(|| {
            part.checked_div(whole)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        });
    quantize(percent.unwrap_or(Decimal::ZERO))
}

/// Sum of non-negative amounts, pinned at `Decimal::MAX` instead of
/// overflowing.
pub fn saturating_sum(values: impl IntoIterator<Item = Decimal>) -> Decimal {
    values
        .into_iter()
        .fold(Decimal::ZERO, |acc, v| acc.checked_add(v).unwrap_or(Decimal::MAX))
}

/// How a quote reached the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectedVia {
    /// Returned by the adapter during this tick
    Live,
    /// Served from the poller cache
    Cache,
}

impl fmt::Display for CollectedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectedVia::Live => write!(f, "live"),
            CollectedVia::Cache => write!(f, "cache"),
        }
    }
}

/// One normalized price/volume record for a (source, currency) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Configured source identifier (e.g. "bitstamp")
    pub source_id: String,
    /// Settlement currency code, upper case (e.g. "USD")
    pub currency: String,
    /// Best ask, if the venue publishes one
    pub ask: Option<Decimal>,
    /// Best bid, if the venue publishes one
    pub bid: Option<Decimal>,
    /// Last traded price
    pub last: Option<Decimal>,
    /// Traded volume in the base asset
    pub volume: Option<Decimal>,
    pub collected_via: CollectedVia,
}

impl Quote {
    pub fn new(source_id: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            currency: currency.into().to_uppercase(),
            ask: None,
            bid: None,
            last: None,
            volume: None,
            collected_via: CollectedVia::Live,
        }
    }

    pub fn with_ask(mut self, ask: Decimal) -> Self {
        self.ask = Some(ask);
        self
    }

    pub fn with_bid(mut self, bid: Decimal) -> Self {
        self.bid = Some(bid);
        self
    }

    pub fn with_last(mut self, last: Decimal) -> Self {
        self.last = Some(last);
        self
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Same quote re-tagged with a different collection path
    pub fn tagged(&self, via: CollectedVia) -> Self {
        Self {
            collected_via: via,
            ..self.clone()
        }
    }

    /// First field whose magnitude is above [`MAX_QUOTE_VALUE`]
    pub fn out_of_range(&self) -> Option<(&'static str, Decimal)> {
        [
            ("ask", self.ask),
            ("bid", self.bid),
            ("last", self.last),
            ("volume", self.volume),
        ]
        .into_iter()
        .find_map(|(field, value)| {
            value
                .filter(|v| v.abs() > MAX_QUOTE_VALUE)
                .map(|v| (field, v))
        })
    }

    /// Volume as it counts toward totals: absent or non-positive is zero.
    pub fn effective_volume(&self) -> Decimal {
        match self.volume {
            Some(v) if v > Decimal::ZERO => v,
            _ => Decimal::ZERO,
        }
    }
}

/// Static per-source configuration handed to adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique identifier, also the key in every output map
    pub id: String,
    /// Human readable name for published output
    pub display_name: String,
    /// Poll interval override in seconds; falls back to the poller default
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// Permanently disabled sources are never called
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Markets served by the generic HTTP ticker adapter
    #[serde(default)]
    pub markets: Vec<MarketMapping>,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            poll_interval_secs: None,
            enabled: true,
            markets: Vec::new(),
        }
    }
}

/// Where one currency's ticker lives on a venue and how to read it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMapping {
    pub currency: String,
    pub url: String,
    /// JSON pointers (RFC 6901) into the ticker response
    #[serde(default)]
    pub ask: Option<String>,
    #[serde(default)]
    pub bid: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_rounds_half_to_even() {
        assert_eq!(quantize(dec!(0.125)), dec!(0.12));
        assert_eq!(quantize(dec!(0.135)), dec!(0.14));
        assert_eq!(quantize(dec!(-0.125)), dec!(-0.12));
    }

    #[test]
    fn quantize_pads_scale() {
        assert_eq!(quantize(dec!(100)).to_string(), "100.00");
        assert_eq!(quantize(dec!(3.1)).to_string(), "3.10");
    }

    #[test]
    fn percent_of_zero_whole_is_zero() {
        assert_eq!(percent_of(dec!(5), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(percent_of(dec!(1), dec!(4)), dec!(25.00));
    }

    #[test]
    fn effective_volume_ignores_missing_and_negative() {
        let q = Quote::new("a", "usd");
        assert_eq!(q.currency, "USD");
        assert_eq!(q.effective_volume(), Decimal::ZERO);
        assert_eq!(q.clone().with_volume(dec!(-1)).effective_volume(), Decimal::ZERO);
        assert_eq!(q.with_volume(dec!(2.5)).effective_volume(), dec!(2.5));
    }

    #[test]
    fn percent_of_huge_amounts_does_not_overflow() {
        let huge = Decimal::from_scientific("1e27").unwrap();
        assert_eq!(percent_of(huge, huge), dec!(100.00));
        assert_eq!(percent_of(huge, huge * dec!(4)), dec!(25.00));
    }

    #[test]
    fn saturating_sum_pins_at_max() {
        assert_eq!(saturating_sum([dec!(1), dec!(2.5)]), dec!(3.5));
        assert_eq!(saturating_sum([Decimal::MAX, dec!(1)]), Decimal::MAX);
    }

    #[test]
    fn out_of_range_names_the_field() {
        let sane = Quote::new("a", "USD").with_last(dec!(65000)).with_volume(dec!(1200));
        assert_eq!(sane.out_of_range(), None);

        let volume = Decimal::from_scientific("1e27").unwrap();
        let huge = sane.with_volume(volume);
        assert_eq!(huge.out_of_range(), Some(("volume", volume)));
    }
}
