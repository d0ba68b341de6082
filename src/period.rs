// ⏰ Billing Period - Which rows belong to the month being invoiced
//
// Date cells arrive in whatever format the provider felt like that month.
// Fallback chain (first hit wins):
//   (a) ISO 8601 parsed directly
//   (b) a literal YYYY-MM-DD anywhere in the cell ("13:00:53 PDT 2025-05-31")
//   (c) MM/DD/YYYY or M/D/YY (two-digit years are 20xx)
// A cell that matches none of these is out of range. Never silently dropped.

use crate::error::{PipelineError, Result};
use crate::parser::{get_parser, UsageFile};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("valid regex"));

static US_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b").expect("valid regex"));

const NAIVE_ISO_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// ============================================================================
// BILLING PERIOD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    pub const MIN_YEAR: i32 = 2000;
    pub const MAX_YEAR: i32 = 2100;

    /// Validated constructor: 1 ≤ month ≤ 12, 2000 ≤ year ≤ 2100
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) {
            return Err(PipelineError::InvalidPeriod { year, month });
        }
        Ok(BillingPeriod { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// "2025-05"
    pub fn label(&self) -> String {
        format!("{}-{:02}", self.year, self.month)
    }
}

// ============================================================================
// DATE PARSING
// ============================================================================

/// Parse a usage timestamp cell through the fallback chain
pub fn parse_usage_date(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }

    parse_iso(cell)
        .or_else(|| parse_embedded_iso(cell))
        .or_else(|| parse_us(cell))
}

fn parse_iso(cell: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        return Some(dt.date_naive());
    }
    if let Ok(d) = NaiveDate::parse_from_str(cell, "%Y-%m-%d") {
        return Some(d);
    }
    NAIVE_ISO_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(cell, fmt).ok())
        .map(|dt| dt.date())
}

fn parse_embedded_iso(cell: &str) -> Option<NaiveDate> {
    let caps = ISO_DATE_RE.captures(cell)?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_us(cell: &str) -> Option<NaiveDate> {
    let caps = US_DATE_RE.captures(cell)?;
    let month = caps[1].parse().ok()?;
    let day = caps[2].parse().ok()?;
    let year_raw = &caps[3];
    let mut year: i32 = year_raw.parse().ok()?;
    if year_raw.len() == 2 {
        year += 2000;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

// ============================================================================
// PERIOD CHECKS
// ============================================================================

/// Row counts for one file against one period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeriodCheck {
    pub in_range: usize,
    pub out_of_range: usize,
    pub total: usize,
}

impl PeriodCheck {
    /// Every data row inside the period (an empty file passes)
    pub fn all_within(&self) -> bool {
        self.out_of_range == 0
    }
}

/// One row outside the period, for highlighting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfRangeRow {
    /// 1-based, header is row 1
    pub row_number: usize,
    pub raw_value: String,
}

/// Column holding the record timestamp for the file's kind
pub fn date_column(file: &UsageFile) -> Option<usize> {
    let parser = get_parser(file.kind)?;
    file.column_loose(parser.date_columns())
}

/// Per-row verdict: (row index, raw cell, in period?)
///
/// Without a date column every row is out of range.
fn row_verdicts<'a>(
    file: &'a UsageFile,
    period: &'a BillingPeriod,
) -> impl Iterator<Item = (usize, &'a str, bool)> + 'a {
    let column = date_column(file);
    if column.is_none() {
        tracing::warn!(
            path = %file.path.display(),
            kind = file.kind.name(),
            "no date column found; every row counts as out of range"
        );
    }

    file.rows.iter().enumerate().map(move |(idx, row)| match column {
        Some(col) => {
            let raw = file.cell(row, col);
            let inside = parse_usage_date(raw).is_some_and(|d| period.contains(d));
            (idx, raw, inside)
        }
        None => (idx, "", false),
    })
}

/// Count in/out rows of a loaded file
pub fn check_period(file: &UsageFile, period: &BillingPeriod) -> PeriodCheck {
    let mut check = PeriodCheck::default();
    for (_, _, inside) in row_verdicts(file, period) {
        check.total += 1;
        if inside {
            check.in_range += 1;
        } else {
            check.out_of_range += 1;
        }
    }

    tracing::debug!(
        path = %file.path.display(),
        period = %period.label(),
        in_range = check.in_range,
        out_of_range = check.out_of_range,
        "period check"
    );
    check
}

/// Rows outside the period as (row number, raw cell) pairs
pub fn find_out_of_range_rows(file: &UsageFile, period: &BillingPeriod) -> Vec<OutOfRangeRow> {
    row_verdicts(file, period)
        .filter(|(_, _, inside)| !inside)
        .map(|(idx, raw, _)| OutOfRangeRow {
            row_number: idx + 2,
            raw_value: raw.to_string(),
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
