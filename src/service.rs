//! Service wiring - the four long-running loops
//!
//! Poller, aggregator, FX refresher and history each run on their own
//! timer and only talk through the [`HandoffStore`], the FX cache and the
//! shared 24h averages. A single watch channel stops all of them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::handoff::HandoffStore;
use crate::oracle::{aggregate, FxRateCache, FxRateSource, IndexSnapshot, QuotePoller};
use crate::persistence::{HistoryStore, HistoryTickReport, SharedDayAverages};

/// Loop periods
#[derive(Debug, Clone)]
pub struct ServiceTicks {
    pub poll: Duration,
    pub aggregate: Duration,
    pub fx_check: Duration,
    pub history: Duration,
}

impl Default for ServiceTicks {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(5),
            aggregate: Duration::from_secs(5),
            fx_check: Duration::from_secs(60),
            history: Duration::from_secs(60),
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Resolves once shutdown is requested or the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// One aggregator step: read the latest quotes, aggregate, publish.
/// Returns the published snapshot, or `None` before the first poll.
pub async fn aggregate_once(
    handoff: &dyn HandoffStore,
    fx: &FxRateCache,
    day_averages: &SharedDayAverages,
    display_names: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Result<Option<Arc<IndexSnapshot>>> {
    let Some(quotes) = handoff.latest_quotes().await? else {
        debug!("No quotes published yet");
        return Ok(None);
    };

    let table = fx.current(now);
    if table.is_none() {
        debug!("FX table unavailable, global averages omitted");
    }
    let day = day_averages.read().map(|g| g.clone()).unwrap_or_default();

    let snapshot = IndexSnapshot::build(
        aggregate(&quotes.active, table.as_ref()),
        now,
        display_names,
        quotes.ignored.clone(),
        &day,
    )
    .with_fx(table);

    debug!(
        currencies = snapshot.currencies.len(),
        ignored = snapshot.ignored.len(),
        "Snapshot computed"
    );
    handoff.publish_snapshot(snapshot).await?;
    handoff.latest_snapshot().await
}

/// One history step over the latest published snapshot
pub async fn history_once(
    history: Arc<HistoryStore>,
    handoff: &dyn HandoffStore,
    now: DateTime<Utc>,
) -> Result<Option<HistoryTickReport>> {
    let Some(snapshot) = handoff.latest_snapshot().await? else {
        debug!("No snapshot published yet");
        return Ok(None);
    };
    let report = tokio::task::spawn_blocking(move || history.tick(&snapshot, now))
        .await
        .context("History tick panicked")?;
    Ok(Some(report))
}

pub async fn run_poller(
    mut poller: QuotePoller,
    handoff: Arc<dyn HandoffStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);
    info!(sources = poller.entries().count(), "Poller started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = poller.poll(clock.now()).await;
                if let Err(e) = handoff.publish_quotes(snapshot).await {
                    warn!(error = %e, "Failed to publish quotes");
                }
            }
            _ = stopped(&mut shutdown) => break,
        }
    }
    info!("Poller stopped");
}

pub async fn run_aggregator(
    handoff: Arc<dyn HandoffStore>,
    fx: Arc<FxRateCache>,
    day_averages: SharedDayAverages,
    display_names: HashMap<String, String>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = aggregate_once(
                    handoff.as_ref(),
                    &fx,
                    &day_averages,
                    &display_names,
                    clock.now(),
                )
                .await;
                if let Err(e) = result {
                    warn!(error = %e, "Aggregation step failed");
                }
            }
            _ = stopped(&mut shutdown) => break,
        }
    }
    info!("Aggregator stopped");
}

pub async fn run_fx_refresher(
    cache: Arc<FxRateCache>,
    source: Arc<dyn FxRateSource>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.now();
                if cache.is_due(now) {
                    // Failures are logged by the cache, which keeps the old table.
                    let _ = cache.refresh(source.as_ref(), now).await;
                }
            }
            _ = stopped(&mut shutdown) => break,
        }
    }
    info!(source = source.name(), "FX refresher stopped");
}

pub async fn run_history(
    history: Arc<HistoryStore>,
    handoff: Arc<dyn HandoffStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = history_once(Arc::clone(&history), handoff.as_ref(), clock.now()).await;
                if let Err(e) = result {
                    warn!(error = %e, "History step failed");
                }
            }
            _ = stopped(&mut shutdown) => break,
        }
    }
    info!("History loop stopped");
}

/// Everything [`IndexService::spawn`] needs
pub struct ServiceParts {
    pub poller: QuotePoller,
    pub handoff: Arc<dyn HandoffStore>,
    pub fx_cache: Arc<FxRateCache>,
    /// Without a source the FX cache keeps whatever it was seeded with
    pub fx_source: Option<Arc<dyn FxRateSource>>,
    pub history: Option<Arc<HistoryStore>>,
    pub clock: Arc<dyn Clock>,
    pub ticks: ServiceTicks,
}

/// Running service: loop handles plus the shutdown switch
pub struct IndexService {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    handoff: Arc<dyn HandoffStore>,
}

impl IndexService {
    pub fn spawn(parts: ServiceParts) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let ServiceParts {
            poller,
            handoff,
            fx_cache,
            fx_source,
            history,
            clock,
            ticks,
        } = parts;

        let display_names = poller.display_names();
        let day_averages = history
            .as_ref()
            .map(|h| h.shared_day_averages())
            .unwrap_or_default();

        let mut handles = Vec::with_capacity(4);
        handles.push(tokio::spawn(run_poller(
            poller,
            Arc::clone(&handoff),
            Arc::clone(&clock),
            ticks.poll,
            rx.clone(),
        )));
        handles.push(tokio::spawn(run_aggregator(
            Arc::clone(&handoff),
            Arc::clone(&fx_cache),
            day_averages,
            display_names,
            Arc::clone(&clock),
            ticks.aggregate,
            rx.clone(),
        )));
        if let Some(source) = fx_source {
            handles.push(tokio::spawn(run_fx_refresher(
                fx_cache,
                source,
                Arc::clone(&clock),
                ticks.fx_check,
                rx.clone(),
            )));
        }
        if let Some(history) = history {
            handles.push(tokio::spawn(run_history(
                history,
                Arc::clone(&handoff),
                clock,
                ticks.history,
                rx,
            )));
        }

        info!(tasks = handles.len(), "Index service started");
        Self {
            shutdown,
            handles,
            handoff,
        }
    }

    pub fn handoff(&self) -> Arc<dyn HandoffStore> {
        Arc::clone(&self.handoff)
    }

    /// Signal every loop and wait for them to finish
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            handle.await.context("Service task panicked")?;
        }
        info!("Index service stopped");
        Ok(())
    }
}
