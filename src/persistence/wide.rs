//! Tables whose columns depend on what was traded when each row was taken
//!
//! Rows are kept as column -> cell maps; a cell a row never had is written
//! empty.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use super::series::{format_datetime, parse_datetime, replace_file};

pub const DATETIME_COLUMN: &str = "datetime";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideTable {
    pub headers: Vec<String>,
    pub rows: Vec<HashMap<String, String>>,
}

impl WideTable {
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .with_context(|| format!("Failed to read header of {}", path.display()))?
            .iter()
            .map(String::from)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("Failed to parse row in {}", path.display()))?;
            let row = headers
                .iter()
                .zip(record.iter())
                .filter(|(_, cell)| !cell.is_empty())
                .map(|(h, cell)| (h.clone(), cell.to_string()))
                .collect();
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        replace_file(path, |file| {
            let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
            writer.write_record(&self.headers)?;
            for row in &self.rows {
                writer.write_record(
                    self.headers
                        .iter()
                        .map(|h| row.get(h).map(String::as_str).unwrap_or("")),
                )?;
            }
            writer.flush()?;
            Ok(())
        })
    }

    fn ensure_column(&mut self, name: &str) {
        if !self.headers.iter().any(|h| h == name) {
            self.headers.push(name.to_string());
        }
    }

    /// Append a row stamped `at`; unseen columns are added after the
    /// existing ones, in the order given.
    pub fn push_row(&mut self, at: DateTime<Utc>, cells: Vec<(String, String)>) {
        self.ensure_column(DATETIME_COLUMN);
        let mut row = HashMap::with_capacity(cells.len() + 1);
        row.insert(DATETIME_COLUMN.to_string(), format_datetime(&at));
        for (column, value) in cells {
            self.ensure_column(&column);
            row.insert(column, value);
        }
        self.rows.push(row);
    }

    pub fn newest(&self) -> Result<Option<DateTime<Utc>>> {
        let mut newest = None;
        for row in &self.rows {
            let Some(raw) = row.get(DATETIME_COLUMN) else {
                continue;
            };
            let at = parse_datetime(raw)?;
            if newest.map_or(true, |n| at > n) {
                newest = Some(at);
            }
        }
        Ok(newest)
    }

    /// Drop rows stamped before `cutoff`
    pub fn retain_since(&mut self, cutoff: DateTime<Utc>) -> Result<()> {
        let mut kept = Vec::with_capacity(self.rows.len());
        for row in self.rows.drain(..) {
            let keep = match row.get(DATETIME_COLUMN) {
                Some(raw) => parse_datetime(raw)? >= cutoff,
                None => false,
            };
            if keep {
                kept.push(row);
            }
        }
        self.rows = kept;
        Ok(())
    }

    /// Keep only the columns some row still fills, plus `always`
    pub fn drop_unused_columns(&mut self, always: &[&str]) {
        let rows = &self.rows;
        self.headers.retain(|h| {
            always.contains(&h.as_str()) || rows.iter().any(|r| r.contains_key(h))
        });
    }

    pub fn column(&self, name: &str) -> Vec<Option<&str>> {
        self.rows
            .iter()
            .map(|r| r.get(name).map(String::as_str))
            .collect()
    }
}
