//! Source adapters - one capability per venue
//!
//! An adapter turns a venue's wire response into normalized quotes. The
//! poller never looks adapters up by name convention; every source id is
//! bound explicitly in an [`AdapterRegistry`].

mod http_ticker;

pub use http_ticker::HttpTickerAdapter;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SourceError;
use crate::types::{Quote, SourceConfig};

/// Trait for quote source adapters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch the current quotes for a source. A venue may return one quote
    /// per settlement currency it trades.
    async fn fetch(&self, config: &SourceConfig) -> Result<Vec<Quote>, SourceError>;
}

/// Explicit source id -> adapter binding
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source_id: impl Into<String>, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(source_id.into(), adapter);
    }

    pub fn with(mut self, source_id: impl Into<String>, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(source_id, adapter);
        self
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(source_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Bind every configured source that declares markets to the generic
    /// HTTP ticker adapter. Sources without markets are left for the caller.
    pub fn from_configs(configs: &[SourceConfig], client: reqwest::Client) -> Self {
        let ticker: Arc<dyn SourceAdapter> = Arc::new(HttpTickerAdapter::with_client(client));
        let mut registry = Self::new();
        for config in configs.iter().filter(|c| !c.markets.is_empty()) {
            registry.register(config.id.clone(), Arc::clone(&ticker));
        }
        registry
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.adapters.keys().collect();
        ids.sort();
        f.debug_struct("AdapterRegistry").field("sources", &ids).finish()
    }
}
