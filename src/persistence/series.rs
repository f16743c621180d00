//! Row types and whole-file CSV helpers for the history series

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), DATETIME_FORMAT)
        .with_context(|| format!("Invalid datetime '{}'", raw))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Serde adapter for the `datetime` column
pub mod datetime_format {
    use super::DATETIME_FORMAT;
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.format(DATETIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(raw.trim(), DATETIME_FORMAT)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(serde::de::Error::custom)
    }
}

/// One sample of a minute-resolution series (local or light global)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteRow {
    #[serde(with = "datetime_format")]
    pub datetime: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub average: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRow {
    #[serde(with = "datetime_format")]
    pub datetime: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub average: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRow {
    #[serde(with = "datetime_format")]
    pub datetime: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub average: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

/// Rows carrying a sample time
pub trait Timestamped {
    fn datetime(&self) -> DateTime<Utc>;
}

impl Timestamped for MinuteRow {
    fn datetime(&self) -> DateTime<Utc> {
        self.datetime
    }
}

impl Timestamped for HourlyRow {
    fn datetime(&self) -> DateTime<Utc> {
        self.datetime
    }
}

impl Timestamped for DailyRow {
    fn datetime(&self) -> DateTime<Utc> {
        self.datetime
    }
}

pub fn newest<T: Timestamped>(rows: &[T]) -> Option<DateTime<Utc>> {
    rows.iter().map(Timestamped::datetime).max()
}

/// Load a whole series. A missing file is an empty series.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: T = result.with_context(|| format!("Failed to parse row in {}", path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Replace a whole series with `rows`
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    replace_file(path, |file| {
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    })
}

/// Write through a sibling temp file and rename it over `path`, so a reader
/// sees either the old or the new series.
pub fn replace_file(path: &Path, write: impl FnOnce(File) -> Result<()>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("csv.tmp");
    let file = File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    write(file).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}
