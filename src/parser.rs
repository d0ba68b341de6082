// 🏗️ Usage File Parser
// Classifies provider exports (calls vs messages) and pulls the source phone
//
// Strategy mirrors the per-source parser pattern:
// - UsageKind identifies WHAT a file is (decided from headers only)
// - UsageParser is the per-kind capability (date columns + billing rule)
// - get_parser(kind) is the factory

use crate::error::{PipelineError, Result};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// CORE TYPES
// ============================================================================

/// UsageKind - Which provider export a file is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UsageKind {
    Calls,
    Messages,
    Unknown,
}

impl UsageKind {
    /// Human-readable name for reports
    pub fn name(&self) -> &'static str {
        match self {
            UsageKind::Calls => "calls",
            UsageKind::Messages => "messages",
            UsageKind::Unknown => "unknown",
        }
    }

    /// Token appended to line-item descriptions
    pub fn label_token(&self) -> Option<&'static str> {
        match self {
            UsageKind::Calls => Some("VOICE"),
            UsageKind::Messages => Some("SMS"),
            UsageKind::Unknown => None,
        }
    }

    pub fn is_billable(&self) -> bool {
        !matches!(self, UsageKind::Unknown)
    }
}

// Header tokens (already normalized)
const DURATION_TOKENS: &[&str] = &["duration"];
const SEGMENT_TOKENS: &[&str] = &["numsegments", "numofsegments"];
const CALL_TOKENS: &[&str] = &["starttime", "endtime", "callsid", "answeredby", "callstatus"];
const MESSAGE_TOKENS: &[&str] = &["sentdate", "messagedate", "smsstatus", "body"];

// Source-number columns, in preference order
const CALLED_COLUMNS: &[&str] = &["to", "called"];
const CALLER_COLUMNS: &[&str] = &["from", "caller", "sender", "callerid", "source"];

/// Normalize a header: lowercase, drop whitespace, underscores and dashes
///
/// "Start Time" → "starttime", "num_segments" → "numsegments"
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Decide the kind of a file from its header row
///
/// Policy (business rule, not mechanism):
/// 1. duration only → Calls, segment count only → Messages, both → Unknown
/// 2. neither → broader call/message token sets; exactly one side must hit
///
/// Pure function of the header list.
pub fn classify_headers<S: AsRef<str>>(headers: &[S]) -> UsageKind {
    if headers.is_empty() {
        return UsageKind::Unknown;
    }

    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
    let has_any = |tokens: &[&str]| normalized.iter().any(|h| tokens.contains(&h.as_str()));

    let has_duration = has_any(DURATION_TOKENS);
    let has_segments = has_any(SEGMENT_TOKENS);

    match (has_duration, has_segments) {
        (true, false) => return UsageKind::Calls,
        (false, true) => return UsageKind::Messages,
        (true, true) => return UsageKind::Unknown,
        (false, false) => {}
    }

    match (has_any(CALL_TOKENS), has_any(MESSAGE_TOKENS)) {
        (true, false) => UsageKind::Calls,
        (false, true) => UsageKind::Messages,
        _ => UsageKind::Unknown,
    }
}

/// Normalize a phone to digits with an optional leading "+"
///
/// Returns an empty string when the raw value carries no digits.
pub fn normalize_phone(raw: &str) -> String {
    let raw = raw.trim();
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    if raw.starts_with('+') {
        format!("+{}", digits)
    } else {
        digits
    }
}

/// Index of the first header matching a candidate, candidates tried in order
pub fn find_column(normalized_headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|cand| normalized_headers.iter().position(|h| h == cand))
}

// ============================================================================
// USAGE FILE
// ============================================================================

/// UsageFile - One classified provider export, fully loaded
///
/// Immutable after `open`. Row numbers used in reports are 1-based with the
/// header as row 1, so `rows[i]` is file row `i + 2`.
#[derive(Debug, Clone)]
pub struct UsageFile {
    pub path: PathBuf,
    pub kind: UsageKind,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    normalized_headers: Vec<String>,
}

impl UsageFile {
    /// Read and classify a CSV export (BOM and non-UTF-8 bytes tolerated)
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|source| PipelineError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(path, &bytes)
    }

    /// Parse already-read bytes; `path` is kept for provenance only
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_start_matches('\u{feff}');

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = reader.records();
        let headers: Vec<String> = match records.next() {
            Some(first) => first
                .map_err(|source| PipelineError::MalformedCsv {
                    path: path.to_path_buf(),
                    source,
                })?
                .iter()
                .map(|h| h.trim().to_string())
                .collect(),
            None => Vec::new(),
        };

        let mut rows = Vec::new();
        for (idx, result) in records.enumerate() {
            let record = result.map_err(|source| PipelineError::MalformedCsv {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::trace!(row = idx + 2, "read row");
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }

        let kind = classify_headers(&headers);
        let normalized_headers = headers.iter().map(|h| normalize_header(h)).collect();

        tracing::debug!(
            path = %path.display(),
            kind = kind.name(),
            rows = rows.len(),
            "classified usage file"
        );

        Ok(UsageFile {
            path: path.to_path_buf(),
            kind,
            headers,
            rows,
            normalized_headers,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv")
            .to_string()
    }

    /// Exact header lookup, candidates in priority order
    pub fn column(&self, candidates: &[&str]) -> Option<usize> {
        find_column(&self.normalized_headers, candidates)
    }

    /// Exact lookup first, then the first header containing a candidate token
    pub fn column_loose(&self, candidates: &[&str]) -> Option<usize> {
        self.column(candidates).or_else(|| {
            candidates.iter().find_map(|cand| {
                self.normalized_headers
                    .iter()
                    .position(|h| h.contains(cand))
            })
        })
    }

    /// Cell text for a row/column; missing cells read as ""
    pub fn cell<'a>(&'a self, row: &'a [String], column: usize) -> &'a str {
        row.get(column).map(|s| s.as_str()).unwrap_or("")
    }

    /// First non-empty value in the source-number column, normalized
    ///
    /// Calls prefer the called (provider-owned) number, messages the sender.
    /// An empty string means "unmatched", not failure.
    pub fn source_identifier(&self) -> String {
        let preference: [&[&str]; 2] = match self.kind {
            UsageKind::Calls => [CALLED_COLUMNS, CALLER_COLUMNS],
            UsageKind::Messages | UsageKind::Unknown => [CALLER_COLUMNS, CALLED_COLUMNS],
        };

        let Some(column) = preference.iter().find_map(|cands| self.column(cands)) else {
            tracing::debug!(path = %self.path.display(), "no source-number column");
            return String::new();
        };

        self.rows
            .iter()
            .map(|row| self.cell(row, column).trim())
            .find(|v| !v.is_empty())
            .map(normalize_phone)
            .unwrap_or_default()
    }
}

/// Extract the source identifier of a file on disk
///
/// `kind` overrides the header-derived kind so callers can pass a kind they
/// already settled on.
pub fn extract_source_identifier(path: &Path, kind: UsageKind) -> Result<String> {
    let mut file = UsageFile::open(path)?;
    file.kind = kind;
    Ok(file.source_identifier())
}

// ============================================================================
// PER-KIND PARSERS
// ============================================================================

/// UsageParser - What differs between calls and messages exports
pub trait UsageParser: Send + Sync {
    fn kind(&self) -> UsageKind;

    /// Normalized header tokens that may hold the record timestamp, in priority order
    fn date_columns(&self) -> &'static [&'static str];

    /// Billed units contributed by one in-period row
    fn billed_units(&self, file: &UsageFile, row: &[String]) -> u64;
}

/// Calls: flat one unit per call
pub struct CallsParser;

impl UsageParser for CallsParser {
    fn kind(&self) -> UsageKind {
        UsageKind::Calls
    }

    fn date_columns(&self) -> &'static [&'static str] {
        &["starttime", "start", "calldate"]
    }

    fn billed_units(&self, _file: &UsageFile, _row: &[String]) -> u64 {
        1
    }
}

/// Messages: two provider segments make one billed unit
pub struct MessagesParser;

impl UsageParser for MessagesParser {
    fn kind(&self) -> UsageKind {
        UsageKind::Messages
    }

    fn date_columns(&self) -> &'static [&'static str] {
        &["sentdate", "date", "timestamp"]
    }

    fn billed_units(&self, file: &UsageFile, row: &[String]) -> u64 {
        let segments = file
            .column(SEGMENT_TOKENS)
            .and_then(|col| parse_segment_count(file.cell(row, col)));
        billed_units_for_segments(segments)
    }
}

/// Segment counts are integers, but some exports write "3.0"
fn parse_segment_count(cell: &str) -> Option<u64> {
    let cell = cell.trim();
    cell.parse::<u64>().ok().or_else(|| {
        cell.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
    })
}

/// ceil(n / 2) for n ≥ 1; zero or missing bills as 1 (billing policy)
pub fn billed_units_for_segments(segments: Option<u64>) -> u64 {
    match segments {
        Some(n) if n >= 1 => n.div_ceil(2),
        _ => 1,
    }
}

/// Factory: parser for a kind, None for Unknown
pub fn get_parser(kind: UsageKind) -> Option<Box<dyn UsageParser>> {
    match kind {
        UsageKind::Calls => Some(Box::new(CallsParser)),
        UsageKind::Messages => Some(Box::new(MessagesParser)),
        UsageKind::Unknown => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================
