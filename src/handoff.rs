//! Handoff store between pipeline stages
//!
//! The poller publishes its merged quotes here, the aggregator reads them
//! and publishes the computed snapshot, and the history loop (or anything
//! serving the index) reads the latest snapshot. Each publish replaces the
//! whole value, so readers never see a half-written tick.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::oracle::{IndexSnapshot, PollSnapshot};

#[async_trait]
pub trait HandoffStore: Send + Sync {
    async fn publish_quotes(&self, quotes: PollSnapshot) -> Result<()>;

    async fn latest_quotes(&self) -> Result<Option<Arc<PollSnapshot>>>;

    async fn publish_snapshot(&self, snapshot: IndexSnapshot) -> Result<()>;

    async fn latest_snapshot(&self) -> Result<Option<Arc<IndexSnapshot>>>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryHandoffStore {
    quotes: RwLock<Option<Arc<PollSnapshot>>>,
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
}

impl MemoryHandoffStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HandoffStore for MemoryHandoffStore {
    async fn publish_quotes(&self, quotes: PollSnapshot) -> Result<()> {
        *self.quotes.write().await = Some(Arc::new(quotes));
        Ok(())
    }

    async fn latest_quotes(&self) -> Result<Option<Arc<PollSnapshot>>> {
        Ok(self.quotes.read().await.clone())
    }

    async fn publish_snapshot(&self, snapshot: IndexSnapshot) -> Result<()> {
        *self.snapshot.write().await = Some(Arc::new(snapshot));
        Ok(())
    }

    async fn latest_snapshot(&self) -> Result<Option<Arc<IndexSnapshot>>> {
        Ok(self.snapshot.read().await.clone())
    }
}
