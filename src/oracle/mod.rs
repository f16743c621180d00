//! Oracle module - multi-venue BTC reference price
//!
//! Polls every configured exchange, keeps a per-source cache so short
//! outages don't move the index, and folds the surviving quotes into
//! volume-weighted averages per fiat currency.

pub mod aggregator;
pub mod fx;
pub mod global;
pub mod poller;
pub mod snapshot;
pub mod sources;

pub use aggregator::{aggregate, Aggregation, CurrencyAverage, CurrencyTotals, SourceShare};
pub use fx::{FxRateCache, FxRateSource, FxRateTable, HttpFxRateSource};
pub use global::GlobalAverage;
pub use poller::{PollSnapshot, PollerSettings, QuotePoller, SourceCacheEntry, SourceState};
pub use snapshot::{CurrencySnapshot, DayAverages, IndexSnapshot};
pub use sources::{AdapterRegistry, HttpTickerAdapter, SourceAdapter};
