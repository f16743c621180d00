//! priceindex - multi-venue BTC reference price service

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use priceindex::clock::{Clock, SystemClock};
use priceindex::config::AppConfig;
use priceindex::handoff::{HandoffStore, MemoryHandoffStore};
use priceindex::oracle::{AdapterRegistry, FxRateCache, FxRateSource, HttpFxRateSource, QuotePoller};
use priceindex::persistence::HistoryStore;
use priceindex::service::{IndexService, ServiceParts, ServiceTicks};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_target(true).with_level(true).json())
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(config.service.log_json);
    info!(config = %config.digest(), "Starting priceindex {}", env!("CARGO_PKG_VERSION"));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.poller.fetch_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let registry = AdapterRegistry::from_configs(&config.sources, client.clone());
    for source in config.sources.iter().filter(|s| registry.get(&s.id).is_none()) {
        warn!(source = %source.id, "No adapter for source, it will be reported as ignored");
    }
    let poller = QuotePoller::new(config.sources.clone(), &registry, config.poller.settings());

    let fx_cache = Arc::new(FxRateCache::new(config.fx.refresh_every(), config.fx.max_age()));
    let fx_source: Option<Arc<dyn FxRateSource>> = config.fx.enabled.then(|| {
        Arc::new(HttpFxRateSource::with_client(client.clone(), config.fx.url.clone()).with_base(config.fx.base.clone()))
            as Arc<dyn FxRateSource>
    });

    let history = if config.history.enabled {
        let store = HistoryStore::open(&config.history.data_dir, config.history.policy())
            .context("Failed to open history store")?;
        Some(Arc::new(store))
    } else {
        None
    };

    let handoff: Arc<dyn HandoffStore> = Arc::new(MemoryHandoffStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let service = IndexService::spawn(ServiceParts {
        poller,
        handoff,
        fx_cache,
        fx_source,
        history,
        clock,
        ticks: ServiceTicks {
            poll: Duration::from_secs(config.service.poll_tick_secs),
            aggregate: Duration::from_secs(config.service.aggregate_tick_secs),
            fx_check: Duration::from_secs(60),
            history: Duration::from_secs(config.service.history_tick_secs),
        },
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    service.shutdown().await
}
