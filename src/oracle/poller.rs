//! Quote Poller - per-source cache with negative caching
//!
//! Each configured source owns one [`SourceCacheEntry`]. On every tick the
//! poller decides per source whether to call its adapter, serve the cached
//! quotes, or report the source as ignored. All sources are refreshed
//! concurrently and the tick only completes once every source is resolved,
//! so consumers always see one coherent [`PollSnapshot`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::oracle::sources::{AdapterRegistry, SourceAdapter};
use crate::types::{CollectedVia, Quote, SourceConfig};

/// Timing knobs shared by every source
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Used when a source has no poll interval of its own
    pub default_poll_interval: ChronoDuration,
    /// How long a failing source keeps serving its last good quotes
    pub ignore_timeout: ChronoDuration,
    /// Upper bound for a single adapter call
    pub fetch_timeout: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            default_poll_interval: ChronoDuration::seconds(60),
            ignore_timeout: ChronoDuration::minutes(30),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Health of a source as seen by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Live,
    StaleCache,
    Ignored,
}

/// Process-lifetime poll state for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCacheEntry {
    pub source_id: String,
    pub last_call_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub cached_quotes: Vec<Quote>,
    pub ignore_reason: Option<String>,
    pub consecutive_failures: u32,
}

impl SourceCacheEntry {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            last_call_at: None,
            last_success_at: None,
            cached_quotes: Vec::new(),
            ignore_reason: None,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> SourceState {
        if self.ignore_reason.is_some() {
            SourceState::Ignored
        } else if self.consecutive_failures > 0 {
            SourceState::StaleCache
        } else {
            SourceState::Live
        }
    }

    fn serve_cached(&self) -> RefreshOutcome {
        match &self.ignore_reason {
            Some(reason) => RefreshOutcome::Ignored(reason.clone()),
            None => RefreshOutcome::Quotes(
                self.cached_quotes
                    .iter()
                    .map(|q| q.tagged(CollectedVia::Cache))
                    .collect(),
            ),
        }
    }

    fn ignore(&mut self, reason: String) -> RefreshOutcome {
        self.cached_quotes.clear();
        self.ignore_reason = Some(reason.clone());
        RefreshOutcome::Ignored(reason)
    }
}

/// Result of refreshing one source
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Quotes to aggregate, tagged live or cache
    Quotes(Vec<Quote>),
    /// Excluded from aggregation, with the reason
    Ignored(String),
}

/// Merged result of one poll tick
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollSnapshot {
    pub collected_at: Option<DateTime<Utc>>,
    /// Quotes in source configuration order
    pub active: Vec<Quote>,
    pub ignored: BTreeMap<String, String>,
}

impl PollSnapshot {
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Reject adapter results the aggregator can't use: values out of range,
/// or more than one quote for a currency.
fn check_quotes(quotes: Vec<Quote>) -> Result<Vec<Quote>, SourceError> {
    let mut seen = HashSet::new();
    for quote in &quotes {
        if let Some((field, value)) = quote.out_of_range() {
            return Err(SourceError::Malformed(format!(
                "{} {field} {value} is out of range",
                quote.currency
            )));
        }
        if !seen.insert(quote.currency.clone()) {
            return Err(SourceError::Malformed(format!(
                "more than one {} quote",
                quote.currency
            )));
        }
    }
    Ok(quotes)
}

struct SourceSlot {
    config: SourceConfig,
    adapter: Option<Arc<dyn SourceAdapter>>,
    entry: SourceCacheEntry,
}

impl SourceSlot {
    fn poll_interval(&self, settings: &PollerSettings) -> ChronoDuration {
        self.config
            .poll_interval_secs
            .map(|secs| ChronoDuration::seconds(secs as i64))
            .unwrap_or(settings.default_poll_interval)
    }

    async fn refresh(&mut self, settings: &PollerSettings, now: DateTime<Utc>) -> RefreshOutcome {
        if !self.config.enabled {
            return self.entry.ignore(SourceError::Disabled.to_string());
        }
        let Some(adapter) = self.adapter.clone() else {
            return self.entry.ignore(SourceError::NoAdapter.to_string());
        };

        if let Some(last_call) = self.entry.last_call_at {
            if now < last_call + self.poll_interval(settings) {
                return self.entry.serve_cached();
            }
        }

        let result = match timeout(settings.fetch_timeout, adapter.fetch(&self.config)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(settings.fetch_timeout)),
        };

        match result.and_then(check_quotes) {
            Ok(quotes) => self.on_success(quotes, now),
            Err(e) => self.on_failure(e, settings, now),
        }
    }

    fn on_success(&mut self, quotes: Vec<Quote>, now: DateTime<Utc>) -> RefreshOutcome {
        let quotes: Vec<Quote> = quotes
            .into_iter()
            .map(|mut q| {
                q.source_id = self.config.id.clone();
                q.collected_via = CollectedVia::Live;
                q
            })
            .collect();

        if self.entry.ignore_reason.is_some() || self.entry.consecutive_failures > 0 {
            info!(
                source = %self.config.id,
                failures = self.entry.consecutive_failures,
                "Source recovered"
            );
        }

        let entry = &mut self.entry;
        entry.last_call_at = Some(now);
        entry.last_success_at = Some(now);
        entry.cached_quotes = quotes.clone();
        entry.consecutive_failures = 0;
        entry.ignore_reason = None;

        debug!(source = %self.config.id, quotes = quotes.len(), "Fetched live quotes");
        RefreshOutcome::Quotes(quotes)
    }

    fn on_failure(
        &mut self,
        error: SourceError,
        settings: &PollerSettings,
        now: DateTime<Utc>,
    ) -> RefreshOutcome {
        let entry = &mut self.entry;
        entry.last_call_at = Some(now);
        entry.consecutive_failures += 1;

        match entry.last_success_at {
            Some(last_success) if now - last_success < settings.ignore_timeout => {
                warn!(
                    source = %self.config.id,
                    error = %error,
                    failures = entry.consecutive_failures,
                    cache_age_secs = (now - last_success).num_seconds(),
                    "Source fetch failed, serving cached quotes"
                );
                entry.serve_cached()
            }
            last_success => {
                let since = last_success
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                warn!(
                    source = %self.config.id,
                    error = %error,
                    failures = entry.consecutive_failures,
                    last_success = %since,
                    "Source unreachable past grace period, ignoring"
                );
                entry.ignore(format!("unreachable since {since}"))
            }
        }
    }
}

/// Owns every source's cache entry; one writer per entry.
pub struct QuotePoller {
    slots: Vec<SourceSlot>,
    settings: PollerSettings,
}

impl QuotePoller {
    pub fn new(
        configs: Vec<SourceConfig>,
        registry: &AdapterRegistry,
        settings: PollerSettings,
    ) -> Self {
        let slots = configs
            .into_iter()
            .map(|config| SourceSlot {
                adapter: registry.get(&config.id),
                entry: SourceCacheEntry::new(config.id.clone()),
                config,
            })
            .collect();
        Self { slots, settings }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// Refresh a single source by id
    pub async fn refresh(&mut self, source_id: &str, now: DateTime<Utc>) -> Option<RefreshOutcome> {
        let settings = &self.settings;
        let slot = self.slots.iter_mut().find(|s| s.config.id == source_id)?;
        Some(slot.refresh(settings, now).await)
    }

    /// Refresh every source concurrently and merge the results.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> PollSnapshot {
        let settings = &self.settings;
        let outcomes = join_all(
            self.slots
                .iter_mut()
                .map(|slot| slot.refresh(settings, now)),
        )
        .await;

        let mut snapshot = PollSnapshot {
            collected_at: Some(now),
            ..PollSnapshot::default()
        };
        for (slot, outcome) in self.slots.iter().zip(outcomes) {
            match outcome {
                RefreshOutcome::Quotes(quotes) => snapshot.active.extend(quotes),
                RefreshOutcome::Ignored(reason) => {
                    snapshot.ignored.insert(slot.config.id.clone(), reason);
                }
            }
        }

        info!(
            quotes = snapshot.active.len(),
            ignored = snapshot.ignored.len(),
            sources = self.slots.len(),
            "Poll tick complete"
        );
        snapshot
    }

    pub fn entry(&self, source_id: &str) -> Option<&SourceCacheEntry> {
        self.slots
            .iter()
            .find(|s| s.config.id == source_id)
            .map(|s| &s.entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SourceCacheEntry> {
        self.slots.iter().map(|s| &s.entry)
    }

    /// Source id -> display name, for published output
    pub fn display_names(&self) -> HashMap<String, String> {
        self.slots
            .iter()
            .map(|s| (s.config.id.clone(), s.config.display_name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::sources::MockSourceAdapter;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn settings() -> PollerSettings {
        PollerSettings {
            default_poll_interval: ChronoDuration::seconds(60),
            ignore_timeout: ChronoDuration::seconds(600),
            fetch_timeout: Duration::from_millis(200),
        }
    }

    fn usd_quote() -> Quote {
        Quote::new("venue", "USD")
            .with_last(dec!(100))
            .with_volume(dec!(2))
    }

    /// Adapter that succeeds once, then fails forever
    fn flaky_adapter() -> MockSourceAdapter {
        let calls = AtomicUsize::new(0);
        let mut adapter = MockSourceAdapter::new();
        adapter.expect_fetch().returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![usd_quote()])
            } else {
                Err(SourceError::Transport("connection refused".to_string()))
            }
        });
        adapter
    }

    fn poller_with(adapter: MockSourceAdapter) -> QuotePoller {
        let registry = AdapterRegistry::new().with("venue", Arc::new(adapter));
        QuotePoller::new(
            vec![SourceConfig::new("venue", "Venue")],
            &registry,
            settings(),
        )
    }

    #[tokio::test]
    async fn success_returns_live_quotes() {
        let mut adapter = MockSourceAdapter::new();
        adapter.expect_fetch().returning(|_| Ok(vec![usd_quote()]));
        let mut poller = poller_with(adapter);

        let snapshot = poller.poll(t0()).await;
        assert_eq!(snapshot.active.len(), 1);
        assert_eq!(snapshot.active[0].collected_via, CollectedVia::Live);
        assert!(snapshot.ignored.is_empty());

        let entry = poller.entry("venue").unwrap();
        assert_eq!(entry.last_success_at, Some(t0()));
        assert_eq!(entry.state(), SourceState::Live);
    }

    #[tokio::test]
    async fn poll_interval_serves_cache_without_calling_adapter() {
        let mut adapter = MockSourceAdapter::new();
        adapter
            .expect_fetch()
            .times(2)
            .returning(|_| Ok(vec![usd_quote()]));
        let mut poller = poller_with(adapter);

        poller.poll(t0()).await;
        let cached = poller.poll(t0() + ChronoDuration::seconds(30)).await;
        assert_eq!(cached.active.len(), 1);
        assert_eq!(cached.active[0].collected_via, CollectedVia::Cache);

        let live = poller.poll(t0() + ChronoDuration::seconds(60)).await;
        assert_eq!(live.active[0].collected_via, CollectedVia::Live);
    }

    #[tokio::test]
    async fn per_source_interval_overrides_default() {
        let mut adapter = MockSourceAdapter::new();
        adapter
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(vec![usd_quote()]));
        let registry = AdapterRegistry::new().with("venue", Arc::new(adapter));
        let mut config = SourceConfig::new("venue", "Venue");
        config.poll_interval_secs = Some(300);
        let mut poller = QuotePoller::new(vec![config], &registry, settings());

        poller.poll(t0()).await;
        let snapshot = poller.poll(t0() + ChronoDuration::seconds(120)).await;
        assert_eq!(snapshot.active[0].collected_via, CollectedVia::Cache);
    }

    #[tokio::test]
    async fn failure_within_grace_serves_stale_cache() {
        let mut poller = poller_with(flaky_adapter());
        poller.poll(t0()).await;

        let at = t0() + ChronoDuration::seconds(599);
        let snapshot = poller.poll(at).await;
        assert_eq!(snapshot.active.len(), 1);
        assert_eq!(snapshot.active[0].collected_via, CollectedVia::Cache);
        assert_eq!(snapshot.active[0].last, Some(dec!(100)));
        assert!(snapshot.ignored.is_empty());

        let entry = poller.entry("venue").unwrap();
        assert_eq!(entry.consecutive_failures, 1);
        assert_eq!(entry.last_call_at, Some(at));
        assert_eq!(entry.state(), SourceState::StaleCache);
    }

    #[tokio::test]
    async fn failure_past_grace_ignores_source() {
        let mut poller = poller_with(flaky_adapter());
        poller.poll(t0()).await;

        let snapshot = poller.poll(t0() + ChronoDuration::seconds(601)).await;
        assert!(snapshot.active.is_empty());
        let reason = snapshot.ignored.get("venue").unwrap();
        assert_eq!(reason, "unreachable since 2024-03-01 12:00:00 UTC");

        let entry = poller.entry("venue").unwrap();
        assert!(entry.cached_quotes.is_empty());
        assert_eq!(entry.state(), SourceState::Ignored);

        // Still ignored while waiting for the next poll window
        let waiting = poller.poll(t0() + ChronoDuration::seconds(630)).await;
        assert!(waiting.active.is_empty());
        assert!(waiting.ignored.contains_key("venue"));
    }

    #[tokio::test]
    async fn never_successful_source_is_ignored_on_first_failure() {
        let mut adapter = MockSourceAdapter::new();
        adapter
            .expect_fetch()
            .returning(|_| Err(SourceError::Malformed("bad json".to_string())));
        let mut poller = poller_with(adapter);

        let snapshot = poller.poll(t0()).await;
        assert_eq!(
            snapshot.ignored.get("venue").map(String::as_str),
            Some("unreachable since never")
        );
    }

    #[tokio::test]
    async fn ignored_source_returns_after_one_success() {
        let calls = AtomicUsize::new(0);
        let mut adapter = MockSourceAdapter::new();
        adapter.expect_fetch().times(2).returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SourceError::Status(500))
            } else {
                Ok(vec![usd_quote()])
            }
        });
        let mut poller = poller_with(adapter);

        assert!(poller.poll(t0()).await.ignored.contains_key("venue"));
        let back = poller.poll(t0() + ChronoDuration::seconds(60)).await;
        assert_eq!(back.active.len(), 1);
        assert!(back.ignored.is_empty());
        assert_eq!(poller.entry("venue").unwrap().ignore_reason, None);
    }

    #[tokio::test]
    async fn disabled_source_never_calls_adapter() {
        let mut adapter = MockSourceAdapter::new();
        adapter.expect_fetch().never();
        let registry = AdapterRegistry::new().with("venue", Arc::new(adapter));
        let mut config = SourceConfig::new("venue", "Venue");
        config.enabled = false;
        let mut poller = QuotePoller::new(vec![config], &registry, settings());

        let snapshot = poller.poll(t0()).await;
        assert!(snapshot.active.is_empty());
        assert_eq!(
            snapshot.ignored.get("venue").map(String::as_str),
            Some("disabled in configuration")
        );
    }

    #[tokio::test]
    async fn unregistered_source_is_ignored() {
        let mut poller = QuotePoller::new(
            vec![SourceConfig::new("orphan", "Orphan")],
            &AdapterRegistry::new(),
            settings(),
        );
        let snapshot = poller.poll(t0()).await;
        assert_eq!(
            snapshot.ignored.get("orphan").map(String::as_str),
            Some("no adapter registered")
        );
    }

    struct SlowAdapter;

    #[async_trait::async_trait]
    impl SourceAdapter for SlowAdapter {
        async fn fetch(&self, _config: &SourceConfig) -> Result<Vec<Quote>, SourceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![usd_quote()])
        }
    }

    #[tokio::test]
    async fn timeout_only_affects_the_slow_source() {
        let mut fast = MockSourceAdapter::new();
        fast.expect_fetch().returning(|_| {
            Ok(vec![Quote::new("fast", "EUR")
                .with_last(dec!(90))
                .with_volume(dec!(1))])
        });
        let registry = AdapterRegistry::new()
            .with("slow", Arc::new(SlowAdapter))
            .with("fast", Arc::new(fast));
        let mut poller = QuotePoller::new(
            vec![
                SourceConfig::new("slow", "Slow"),
                SourceConfig::new("fast", "Fast"),
            ],
            &registry,
            settings(),
        );

        let snapshot = poller.poll(t0()).await;
        assert_eq!(snapshot.active.len(), 1);
        assert_eq!(snapshot.active[0].source_id, "fast");
        assert!(snapshot.ignored.contains_key("slow"));
        assert_eq!(poller.entry("slow").unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn out_of_range_values_count_as_a_failure() {
        let mut adapter = MockSourceAdapter::new();
        adapter.expect_fetch().returning(|_| {
            Ok(vec![Quote::new("venue", "USD")
                .with_last(dec!(100))
                .with_volume(Decimal::from_scientific("1e27").unwrap())])
        });
        let mut poller = poller_with(adapter);

        let snapshot = poller.poll(t0()).await;
        assert!(snapshot.active.is_empty());
        assert_eq!(
            snapshot.ignored.get("venue").map(String::as_str),
            Some("unreachable since never")
        );
        assert_eq!(poller.entry("venue").unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn bad_payload_after_success_serves_previous_quotes() {
        let calls = AtomicUsize::new(0);
        let mut adapter = MockSourceAdapter::new();
        adapter.expect_fetch().returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![usd_quote()])
            } else {
                Ok(vec![usd_quote().with_volume(Decimal::MAX)])
            }
        });
        let mut poller = poller_with(adapter);
        poller.poll(t0()).await;

        let snapshot = poller.poll(t0() + ChronoDuration::seconds(60)).await;
        assert_eq!(snapshot.active.len(), 1);
        assert_eq!(snapshot.active[0].volume, Some(dec!(2)));
        assert_eq!(snapshot.active[0].collected_via, CollectedVia::Cache);
    }

    #[tokio::test]
    async fn two_quotes_in_one_currency_are_rejected() {
        let mut adapter = MockSourceAdapter::new();
        adapter.expect_fetch().returning(|_| {
            Ok(vec![
                usd_quote().with_volume(dec!(1)),
                usd_quote().with_volume(dec!(3)),
            ])
        });
        let mut poller = poller_with(adapter);

        let snapshot = poller.poll(t0()).await;
        assert!(snapshot.active.is_empty());
        assert!(snapshot.ignored.contains_key("venue"));
    }

    #[tokio::test]
    async fn quotes_are_stamped_with_configured_source_id() {
        let mut adapter = MockSourceAdapter::new();
        adapter
            .expect_fetch()
            .returning(|_| Ok(vec![Quote::new("whatever", "USD").with_last(dec!(1))]));
        let mut poller = poller_with(adapter);
        let snapshot = poller.poll(t0()).await;
        assert_eq!(snapshot.active[0].source_id, "venue");
    }
}
