//! Configuration types and re-exports

pub use super::{AppConfig, FxConfig, HistoryConfig, PollerConfig, ServiceConfig};
pub use crate::types::{MarketMapping, SourceConfig};
