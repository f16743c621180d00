//! High / low / mean over a window of minute samples

use rust_decimal::Decimal;

use crate::types::{quantize, saturating_sum};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rollup {
    pub high: Decimal,
    pub low: Decimal,
    sum: Decimal,
    samples: u32,
}

impl Rollup {
    fn new(value: Decimal) -> Self {
        Self {
            high: value,
            low: value,
            sum: value,
            samples: 1,
        }
    }

    fn update(&mut self, value: Decimal) {
        self.high = self.high.max(value);
        self.low = self.low.min(value);
        self.sum = saturating_sum([self.sum, value]);
        self.samples += 1;
    }

    /// `None` for an empty window
    pub fn over(values: impl IntoIterator<Item = Decimal>) -> Option<Self> {
        let mut iter = values.into_iter();
        let mut rollup = Self::new(iter.next()?);
        for value in iter {
            rollup.update(value);
        }
        Some(rollup)
    }

    pub fn average(&self) -> Decimal {
        quantize(self.sum / Decimal::from(self.samples))
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }
}

/// Quantized arithmetic mean, `None` when there is nothing to average
pub fn mean(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    Rollup::over(values).map(|r| r.average())
}
