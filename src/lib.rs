//! PriceIndex Library
//!
//! Multi-venue BTC reference price: quote polling, volume-weighted
//! aggregation and downsampled CSV history

pub mod clock;
pub mod config;
pub mod error;
pub mod handoff;
pub mod oracle;
pub mod persistence;
pub mod service;
pub mod types;
