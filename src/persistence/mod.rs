//! CSV History Store
//!
//! Downsamples the live index into per-currency sliding-window series under
//! `{data_dir}/history/{CUR}/`. Every series is read, extended and rewritten
//! whole on each tick; a tick whose gate is still closed leaves the file
//! untouched.

mod rollup;
mod series;
mod wide;

pub use rollup::{mean, Rollup};
pub use series::{
    format_datetime, parse_datetime, read_rows, write_rows, DailyRow, HourlyRow, MinuteRow,
    DATETIME_FORMAT,
};
pub use wide::WideTable;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::oracle::{DayAverages, GlobalAverage, IndexSnapshot};
use crate::types::quantize;
use series::newest;
use wide::DATETIME_COLUMN;

const GLOBAL_AVERAGE_COLUMN: &str = "global average";
const TOTAL_VOLUME_COLUMN: &str = "total_volume";
const EXCHANGE_VOLUME_SUFFIX: &str = " BTC volume";
const EXCHANGE_PERCENT_SUFFIX: &str = " %";

/// Window, gate and retention for every series
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPolicy {
    pub minute_gate: ChronoDuration,
    pub minute_retention: ChronoDuration,
    pub hourly_window: ChronoDuration,
    pub hourly_gate: ChronoDuration,
    pub hourly_retention: ChronoDuration,
    pub daily_window: ChronoDuration,
    pub daily_gate: ChronoDuration,
    pub volumes_gate: ChronoDuration,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            minute_gate: ChronoDuration::seconds(120),
            minute_retention: ChronoDuration::hours(24),
            hourly_window: ChronoDuration::hours(1),
            hourly_gate: ChronoDuration::hours(2),
            hourly_retention: ChronoDuration::days(30),
            daily_window: ChronoDuration::hours(24),
            daily_gate: ChronoDuration::days(2),
            volumes_gate: ChronoDuration::days(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Minute,
    GlobalMinute,
    GlobalLight,
    Hourly,
    Daily,
    Volumes,
}

impl SeriesKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            SeriesKind::Minute => "per_minute_24h_sliding_window.csv",
            SeriesKind::GlobalMinute => "per_minute_24h_global_average_sliding_window.csv",
            SeriesKind::GlobalLight => "per_minute_24h_global_average_light.csv",
            SeriesKind::Hourly => "per_hour_monthly_sliding_window.csv",
            SeriesKind::Daily => "per_day_all_time_history.csv",
            SeriesKind::Volumes => "volumes.csv",
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeriesKind::Minute => "minute",
            SeriesKind::GlobalMinute => "global_minute",
            SeriesKind::GlobalLight => "global_light",
            SeriesKind::Hourly => "hourly",
            SeriesKind::Daily => "daily",
            SeriesKind::Volumes => "volumes",
        };
        write!(f, "{}", name)
    }
}

/// What one history tick did
#[derive(Debug, Clone, Default)]
pub struct HistoryTickReport {
    pub written: Vec<(String, SeriesKind)>,
    /// Currency -> error, for currencies whose update failed
    pub failed: BTreeMap<String, String>,
}

impl HistoryTickReport {
    pub fn wrote(&self, currency: &str, kind: SeriesKind) -> bool {
        self.written.iter().any(|(c, k)| c == currency && *k == kind)
    }
}

pub type SharedDayAverages = Arc<RwLock<DayAverages>>;

fn gate_open(newest: Option<DateTime<Utc>>, now: DateTime<Utc>, gate: ChronoDuration) -> bool {
    newest.map_or(true, |at| now - at >= gate)
}

/// Owns the history directory. Only its own tick writes there.
#[derive(Debug)]
pub struct HistoryStore {
    root: PathBuf,
    policy: HistoryPolicy,
    day_averages: SharedDayAverages,
}

impl HistoryStore {
    /// Open (creating if needed) `{data_dir}/history` and warm the 24h
    /// averages from whatever is already on disk.
    pub fn open(data_dir: impl AsRef<Path>, policy: HistoryPolicy) -> Result<Self> {
        let root = data_dir.as_ref().join("history");
        fs::create_dir_all(&root).context("Failed to create history directory")?;

        let store = Self {
            root,
            policy,
            day_averages: Arc::new(RwLock::new(DayAverages::default())),
        };

        let mut warmed = 0;
        for entry in fs::read_dir(&store.root).context("Failed to list history directory")? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let currency = entry.file_name().to_string_lossy().to_string();
            match store.refresh_day_averages(&currency, None) {
                Ok(()) => warmed += 1,
                Err(e) => warn!(currency = %currency, error = %e, "Failed to load history"),
            }
        }
        info!(root = %store.root.display(), currencies = warmed, "History store opened");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &HistoryPolicy {
        &self.policy
    }

    pub fn series_path(&self, currency: &str, kind: SeriesKind) -> PathBuf {
        self.root.join(currency).join(kind.file_name())
    }

    pub fn day_averages(&self) -> DayAverages {
        self.day_averages
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Handle for readers outside the history loop
    pub fn shared_day_averages(&self) -> SharedDayAverages {
        Arc::clone(&self.day_averages)
    }

    pub fn load_minute(&self, currency: &str) -> Result<Vec<MinuteRow>> {
        read_rows(&self.series_path(currency, SeriesKind::Minute))
    }

    pub fn load_global_light(&self, currency: &str) -> Result<Vec<MinuteRow>> {
        read_rows(&self.series_path(currency, SeriesKind::GlobalLight))
    }

    pub fn load_hourly(&self, currency: &str) -> Result<Vec<HourlyRow>> {
        read_rows(&self.series_path(currency, SeriesKind::Hourly))
    }

    pub fn load_daily(&self, currency: &str) -> Result<Vec<DailyRow>> {
        read_rows(&self.series_path(currency, SeriesKind::Daily))
    }

    pub fn load_volumes(&self, currency: &str) -> Result<WideTable> {
        WideTable::read(&self.series_path(currency, SeriesKind::Volumes))
    }

    pub fn load_global_minute(&self, currency: &str) -> Result<WideTable> {
        WideTable::read(&self.series_path(currency, SeriesKind::GlobalMinute))
    }

    /// Run every series for every currency in `snapshot`. A failing
    /// currency is logged and reported; the others still run.
    pub fn tick(&self, snapshot: &IndexSnapshot, now: DateTime<Utc>) -> HistoryTickReport {
        let mut currencies: Vec<&String> = snapshot.currencies.keys().collect();
        if let Some(globals) = &snapshot.global_averages {
            currencies.extend(globals.keys());
        }
        currencies.sort();
        currencies.dedup();

        let mut report = HistoryTickReport::default();
        for currency in currencies {
            match self.tick_currency(currency, snapshot, now) {
                Ok(kinds) => {
                    for kind in kinds {
                        debug!(currency = %currency, series = %kind, "History row written");
                        report.written.push((currency.clone(), kind));
                    }
                }
                Err(e) => {
                    warn!(currency = %currency, error = %e, "History update failed");
                    report.failed.insert(currency.clone(), format!("{:#}", e));
                }
            }
        }

        info!(
            rows = report.written.len(),
            failed = report.failed.len(),
            "History tick complete"
        );
        report
    }

    fn tick_currency(
        &self,
        currency: &str,
        snapshot: &IndexSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeriesKind>> {
        fs::create_dir_all(self.root.join(currency))
            .with_context(|| format!("Failed to create history directory for {}", currency))?;

        let mut written = Vec::new();

        if let Some(local) = snapshot.currencies.get(currency) {
            let minute = self.series_path(currency, SeriesKind::Minute);
            if self.append_minute_sample(&minute, local.averages.last, now)? {
                written.push(SeriesKind::Minute);
            }
            if self.write_hourly(currency, now)? {
                written.push(SeriesKind::Hourly);
            }
            if self.write_daily(currency, local.averages.total_vol, now)? {
                written.push(SeriesKind::Daily);
            }
            if self.write_volumes(currency, snapshot, now)? {
                written.push(SeriesKind::Volumes);
            }
        }

        let global = snapshot
            .global_averages
            .as_ref()
            .and_then(|g| g.get(currency));
        if let Some(global) = global {
            if self.write_global_minute(currency, global, snapshot, now)? {
                written.push(SeriesKind::GlobalMinute);
            }
            let light = self.series_path(currency, SeriesKind::GlobalLight);
            if self.append_minute_sample(&light, global.last, now)? {
                written.push(SeriesKind::GlobalLight);
            }
        }

        self.refresh_day_averages(currency, Some(now))?;
        Ok(written)
    }

    /// Minute and light series: one `(datetime, average)` row per gate
    fn append_minute_sample(&self, path: &Path, value: Decimal, now: DateTime<Utc>) -> Result<bool> {
        let mut rows: Vec<MinuteRow> = read_rows(path)?;
        if !gate_open(newest(&rows), now, self.policy.minute_gate) {
            return Ok(false);
        }

        rows.push(MinuteRow {
            datetime: now,
            average: value,
        });
        let cutoff = now - self.policy.minute_retention;
        rows.retain(|r| r.datetime >= cutoff);
        write_rows(path, &rows)?;
        Ok(true)
    }

    /// Minute averages inside `[now - window, now]`
    fn minute_window(&self, currency: &str, now: DateTime<Utc>, window: ChronoDuration) -> Result<Option<Rollup>> {
        let start = now - window;
        let minute = self.load_minute(currency)?;
        Ok(Rollup::over(
            minute
                .iter()
                .filter(|r| r.datetime >= start && r.datetime <= now)
                .map(|r| r.average),
        ))
    }

    fn write_hourly(&self, currency: &str, now: DateTime<Utc>) -> Result<bool> {
        let path = self.series_path(currency, SeriesKind::Hourly);
        let mut rows: Vec<HourlyRow> = read_rows(&path)?;
        if !gate_open(newest(&rows), now, self.policy.hourly_gate) {
            return Ok(false);
        }
        let Some(rollup) = self.minute_window(currency, now, self.policy.hourly_window)? else {
            return Ok(false);
        };

        rows.push(HourlyRow {
            datetime: now,
            high: rollup.high,
            low: rollup.low,
            average: rollup.average(),
        });
        let cutoff = now - self.policy.hourly_retention;
        rows.retain(|r| r.datetime >= cutoff);
        write_rows(&path, &rows)?;
        Ok(true)
    }

    fn write_daily(&self, currency: &str, volume: Decimal, now: DateTime<Utc>) -> Result<bool> {
        let path = self.series_path(currency, SeriesKind::Daily);
        let mut rows: Vec<DailyRow> = read_rows(&path)?;
        if !gate_open(newest(&rows), now, self.policy.daily_gate) {
            return Ok(false);
        }
        let Some(rollup) = self.minute_window(currency, now, self.policy.daily_window)? else {
            return Ok(false);
        };

        rows.push(DailyRow {
            datetime: now,
            high: rollup.high,
            low: rollup.low,
            average: rollup.average(),
            volume,
        });
        write_rows(&path, &rows)?;
        Ok(true)
    }

    /// Per-exchange volume and share. Columns only ever grow. Each new row
    /// lists every exchange seen so far, at zero when it is absent now;
    /// rows written before an exchange first appeared keep blank cells.
    fn write_volumes(&self, currency: &str, snapshot: &IndexSnapshot, now: DateTime<Utc>) -> Result<bool> {
        let Some(local) = snapshot.currencies.get(currency) else {
            return Ok(false);
        };
        let path = self.series_path(currency, SeriesKind::Volumes);
        let mut table = WideTable::read(&path)?;
        if !gate_open(table.newest()?, now, self.policy.volumes_gate) {
            return Ok(false);
        }

        let mut cells = vec![(TOTAL_VOLUME_COLUMN.to_string(), local.averages.total_vol.to_string())];
        for (source_id, exchange) in &local.exchanges {
            cells.push((
                format!("{}{}", source_id, EXCHANGE_VOLUME_SUFFIX),
                exchange.volume_btc.to_string(),
            ));
            cells.push((
                format!("{}{}", source_id, EXCHANGE_PERCENT_SUFFIX),
                exchange.volume_percent.to_string(),
            ));
        }
        let zero = quantize(Decimal::ZERO).to_string();
        let absent: Vec<String> = table
            .headers
            .iter()
            .filter_map(|h| h.strip_suffix(EXCHANGE_VOLUME_SUFFIX))
            .filter(|id| !local.exchanges.contains_key(*id))
            .map(String::from)
            .collect();
        for source_id in absent {
            cells.push((format!("{}{}", source_id, EXCHANGE_VOLUME_SUFFIX), zero.clone()));
            cells.push((format!("{}{}", source_id, EXCHANGE_PERCENT_SUFFIX), zero.clone()));
        }
        table.push_row(now, cells);
        table.write(&path)?;
        Ok(true)
    }

    /// For target `currency`: every convertible traded currency's volume,
    /// average and cross rate, plus the target's own global average.
    fn write_global_minute(
        &self,
        currency: &str,
        global: &GlobalAverage,
        snapshot: &IndexSnapshot,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let path = self.series_path(currency, SeriesKind::GlobalMinute);
        let mut table = WideTable::read(&path)?;
        if !gate_open(table.newest()?, now, self.policy.minute_gate) {
            return Ok(false);
        }

        let mut cells = Vec::new();
        if let Some(fx) = &snapshot.fx {
            for (traded, totals) in &snapshot.aggregation.totals {
                let (Some(rate), Some(avg)) = (
                    fx.cross_rate(currency, traded),
                    snapshot.aggregation.averages.get(traded),
                ) else {
                    continue;
                };
                cells.push((format!("{} volume", traded), totals.total_volume.to_string()));
                cells.push((format!("{} average", traded), avg.last.to_string()));
                cells.push((format!("{} rate", traded), rate.round_dp(8).normalize().to_string()));
            }
        }
        cells.push((GLOBAL_AVERAGE_COLUMN.to_string(), global.last.to_string()));

        table.push_row(now, cells);
        table.retain_since(now - self.policy.minute_retention)?;
        table.drop_unused_columns(&[DATETIME_COLUMN, GLOBAL_AVERAGE_COLUMN]);
        table.write(&path)?;
        Ok(true)
    }

    /// Recompute the in-memory 24h means for one currency. With `now`, only
    /// rows inside the retention window count.
    fn refresh_day_averages(&self, currency: &str, now: Option<DateTime<Utc>>) -> Result<()> {
        let since = now.map(|n| n - self.policy.minute_retention);
        let in_window = |r: &&MinuteRow| since.map_or(true, |s| r.datetime >= s);

        let local = mean(self.load_minute(currency)?.iter().filter(in_window).map(|r| r.average));
        let global = mean(
            self.load_global_light(currency)?
                .iter()
                .filter(in_window)
                .map(|r| r.average),
        );

        let mut guard = self
            .day_averages
            .write()
            .map_err(|_| anyhow!("day average lock poisoned"))?;
        match local {
            Some(v) => guard.local.insert(currency.to_string(), v),
            None => guard.local.remove(currency),
        };
        match global {
            Some(v) => guard.global.insert(currency.to_string(), v),
            None => guard.global.remove(currency),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{aggregate, FxRateTable};
    use crate::types::Quote;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "priceindex_history_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn snapshot_at(now: DateTime<Utc>, quotes: &[Quote], with_fx: bool) -> IndexSnapshot {
        let fx = with_fx.then(|| FxRateTable::from_rates(now, [("USD", dec!(1)), ("EUR", dec!(0.9))]));
        IndexSnapshot::build(
            aggregate(quotes, fx.as_ref()),
            now,
            &HashMap::new(),
            BTreeMap::new(),
            &DayAverages::default(),
        )
        .with_fx(fx)
    }

    fn usd(last: Decimal) -> Vec<Quote> {
        vec![Quote::new("bitstamp", "USD").with_last(last).with_volume(dec!(2))]
    }

    #[test]
    fn minute_series_is_gated_and_pruned() {
        let dir = temp_data_dir("minute_gate");
        let store = HistoryStore::open(&dir, HistoryPolicy::default()).unwrap();

        let report = store.tick(&snapshot_at(t0(), &usd(dec!(100)), false), t0());
        assert!(report.wrote("USD", SeriesKind::Minute));

        let at = t0() + ChronoDuration::seconds(60);
        let report = store.tick(&snapshot_at(at, &usd(dec!(101)), false), at);
        assert!(!report.wrote("USD", SeriesKind::Minute));
        assert_eq!(store.load_minute("USD").unwrap().len(), 1);

        let at = t0() + ChronoDuration::seconds(121);
        let report = store.tick(&snapshot_at(at, &usd(dec!(102)), false), at);
        assert!(report.wrote("USD", SeriesKind::Minute));
        let rows = store.load_minute("USD").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].datetime, at);
        assert_eq!(rows[1].average, dec!(102));

        let at = t0() + ChronoDuration::hours(24) + ChronoDuration::seconds(61);
        store.tick(&snapshot_at(at, &usd(dec!(103)), false), at);
        let rows = store.load_minute("USD").unwrap();
        assert!(rows.iter().all(|r| at - r.datetime <= ChronoDuration::hours(24)));
        assert_eq!(rows.len(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn hourly_uses_last_hour_and_two_hour_gate() {
        let dir = temp_data_dir("hourly");
        let store = HistoryStore::open(&dir, HistoryPolicy::default()).unwrap();

        // Seed minute rows spanning 87 minutes; only the last hour counts.
        let seeded: Vec<MinuteRow> = [(0, dec!(50)), (40, dec!(100)), (70, dec!(104)), (87, dec!(98))]
            .into_iter()
            .map(|(m, v)| MinuteRow {
                datetime: t0() + ChronoDuration::minutes(m),
                average: v,
            })
            .collect();
        write_rows(&store.series_path("USD", SeriesKind::Minute), &seeded).unwrap();

        let at = t0() + ChronoDuration::minutes(90);
        let report = store.tick(&snapshot_at(at, &usd(dec!(102)), false), at);
        assert!(report.wrote("USD", SeriesKind::Hourly));

        let hourly = store.load_hourly("USD").unwrap();
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].high, dec!(104));
        assert_eq!(hourly[0].low, dec!(98));
        // 100, 104, 98, 102
        assert_eq!(hourly[0].average, dec!(101));

        let at = at + ChronoDuration::hours(1);
        assert!(!store.tick(&snapshot_at(at, &usd(dec!(100)), false), at).wrote("USD", SeriesKind::Hourly));
        let at = at + ChronoDuration::hours(1);
        assert!(store.tick(&snapshot_at(at, &usd(dec!(100)), false), at).wrote("USD", SeriesKind::Hourly));
        assert_eq!(store.load_hourly("USD").unwrap().len(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn hourly_rows_older_than_thirty_days_are_pruned() {
        let dir = temp_data_dir("hourly_retention");
        let store = HistoryStore::open(&dir, HistoryPolicy::default()).unwrap();

        let seeded: Vec<HourlyRow> = [
            t0() - ChronoDuration::days(31),
            t0() - ChronoDuration::days(29),
            t0() - ChronoDuration::hours(3),
        ]
        .into_iter()
        .map(|datetime| HourlyRow {
            datetime,
            high: dec!(100),
            low: dec!(100),
            average: dec!(100),
        })
        .collect();
        write_rows(&store.series_path("USD", SeriesKind::Hourly), &seeded).unwrap();

        let report = store.tick(&snapshot_at(t0(), &usd(dec!(100)), false), t0());
        assert!(report.wrote("USD", SeriesKind::Hourly));

        let hourly = store.load_hourly("USD").unwrap();
        let stamps: Vec<DateTime<Utc>> = hourly.iter().map(|r| r.datetime).collect();
        assert_eq!(
            stamps,
            vec![
                t0() - ChronoDuration::days(29),
                t0() - ChronoDuration::hours(3),
                t0()
            ]
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn daily_row_carries_volume_and_waits_two_days() {
        let dir = temp_data_dir("daily");
        let store = HistoryStore::open(&dir, HistoryPolicy::default()).unwrap();

        store.tick(&snapshot_at(t0(), &usd(dec!(100)), false), t0());
        let daily = store.load_daily("USD").unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].volume, dec!(2));
        assert_eq!(daily[0].average, dec!(100));

        let at = t0() + ChronoDuration::days(1);
        assert!(!store.tick(&snapshot_at(at, &usd(dec!(100)), false), at).wrote("USD", SeriesKind::Daily));
        let at = t0() + ChronoDuration::days(2);
        assert!(store.tick(&snapshot_at(at, &usd(dec!(100)), false), at).wrote("USD", SeriesKind::Daily));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn volume_columns_only_grow() {
        let dir = temp_data_dir("volumes");
        let store = HistoryStore::open(&dir, HistoryPolicy::default()).unwrap();

        store.tick(&snapshot_at(t0(), &usd(dec!(100)), false), t0());

        let at = t0() + ChronoDuration::days(2);
        let quotes = vec![
            Quote::new("bitstamp", "USD").with_last(dec!(100)).with_volume(dec!(1)),
            Quote::new("kraken", "USD").with_last(dec!(100)).with_volume(dec!(3)),
        ];
        store.tick(&snapshot_at(at, &quotes, false), at);

        let table = store.load_volumes("USD").unwrap();
        assert_eq!(
            table.headers,
            vec![
                "datetime",
                "total_volume",
                "bitstamp BTC volume",
                "bitstamp %",
                "kraken BTC volume",
                "kraken %"
            ]
        );
        assert_eq!(table.column("kraken %"), vec![None, Some("75.00")]);
        assert_eq!(table.column("bitstamp %"), vec![Some("100.00"), Some("25.00")]);

        // bitstamp drops out but keeps its columns, filled with zeros.
        let at = t0() + ChronoDuration::days(4);
        let quotes = vec![Quote::new("kraken", "USD").with_last(dec!(100)).with_volume(dec!(5))];
        store.tick(&snapshot_at(at, &quotes, false), at);

        let table = store.load_volumes("USD").unwrap();
        assert_eq!(table.headers.len(), 6);
        assert_eq!(table.column("bitstamp BTC volume"), vec![Some("2.00"), Some("1.00"), Some("0.00")]);
        assert_eq!(table.column("bitstamp %"), vec![Some("100.00"), Some("25.00"), Some("0.00")]);
        assert_eq!(table.column("kraken %"), vec![None, Some("75.00"), Some("100.00")]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn global_series_follow_the_fx_table() {
        let dir = temp_data_dir("global");
        let store = HistoryStore::open(&dir, HistoryPolicy::default()).unwrap();

        let report = store.tick(&snapshot_at(t0(), &usd(dec!(100)), true), t0());
        assert!(report.wrote("EUR", SeriesKind::GlobalMinute));
        assert!(report.wrote("EUR", SeriesKind::GlobalLight));
        assert!(!report.wrote("EUR", SeriesKind::Minute));

        let light = store.load_global_light("EUR").unwrap();
        assert_eq!(light[0].average, dec!(90));

        let table = store.load_global_minute("EUR").unwrap();
        assert_eq!(table.column("USD rate"), vec![Some("0.9")]);
        assert_eq!(table.column("USD average"), vec![Some("100.00")]);
        assert_eq!(table.column("global average"), vec![Some("90.00")]);

        assert_eq!(store.day_averages().global.get("EUR"), Some(&dec!(90)));

        // Without FX no global rows are written.
        let at = t0() + ChronoDuration::minutes(5);
        let report = store.tick(&snapshot_at(at, &usd(dec!(100)), false), at);
        assert!(!report.wrote("EUR", SeriesKind::GlobalLight));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn day_averages_survive_reopen() {
        let dir = temp_data_dir("reopen");
        {
            let store = HistoryStore::open(&dir, HistoryPolicy::default()).unwrap();
            store.tick(&snapshot_at(t0(), &usd(dec!(100)), false), t0());
            let at = t0() + ChronoDuration::minutes(3);
            store.tick(&snapshot_at(at, &usd(dec!(103)), false), at);
            assert_eq!(store.day_averages().local.get("USD"), Some(&dec!(101.50)));
        }

        let store = HistoryStore::open(&dir, HistoryPolicy::default()).unwrap();
        assert_eq!(store.day_averages().local.get("USD"), Some(&dec!(101.50)));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn failing_currency_does_not_stop_the_others() {
        let dir = temp_data_dir("isolation");
        let store = HistoryStore::open(&dir, HistoryPolicy::default()).unwrap();
        // A plain file where the EUR directory should be.
        fs::write(store.root().join("EUR"), "not a directory").unwrap();

        let quotes = vec![
            Quote::new("a", "USD").with_last(dec!(100)).with_volume(dec!(1)),
            Quote::new("b", "EUR").with_last(dec!(90)).with_volume(dec!(1)),
        ];
        let report = store.tick(&snapshot_at(t0(), &quotes, false), t0());

        assert!(report.failed.contains_key("EUR"));
        assert!(report.wrote("USD", SeriesKind::Minute));
        assert_eq!(store.load_minute("USD").unwrap().len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }
}
