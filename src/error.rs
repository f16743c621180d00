//! Typed failures at the component seams
//!
//! Everything here is recoverable: the poller turns a `SourceError` into
//! stale-cache serving or an ignore entry, and an `FxError` only removes
//! global averages from the run that hit it.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single adapter call
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("disabled in configuration")]
    Disabled,

    #[error("no adapter registered")]
    NoAdapter,
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            SourceError::Status(status.as_u16())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

/// Failure to obtain a usable FX rate table
#[derive(Debug, Error)]
pub enum FxError {
    #[error("fx transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("fx rate source returned HTTP {0}")]
    Status(u16),

    #[error("invalid rate for {currency}: {reason}")]
    Malformed { currency: String, reason: String },

    #[error("fx rate table is empty")]
    Empty,
}
