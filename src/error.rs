// 🚨 Error Taxonomy
// Typed failures of the usage → invoice pipeline
//
// Not everything that "goes wrong" is an error here:
// - ambiguous headers      → UsageKind::Unknown
// - no registry match      → Option<MatchResult>::None
// - unparsable date cell   → counted as an out-of-range row

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A usage file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A usage file was read but is not parseable as delimited text.
    #[error("Malformed CSV in {path}: {source}")]
    MalformedCsv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Billing period outside 1..=12 / 2000..=2100.
    #[error("Invalid billing period: {year}-{month:02}")]
    InvalidPeriod { year: i32, month: u32 },

    /// The organization registry snapshot could not be loaded.
    #[error("Registry error: {0}")]
    Registry(String),

    /// One or more files have rows outside the selected month/year.
    #[error("Some files are not within the selected month/year: {}", .files.join(", "))]
    OutOfPeriod { files: Vec<String> },

    /// Writing an export artifact failed.
    #[error("Failed to export {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_file_display() {
        let err = PipelineError::UnreadableFile {
            path: PathBuf::from("/exports/calls_may.csv"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/exports/calls_may.csv"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_invalid_period_display() {
        let err = PipelineError::InvalidPeriod { year: 2025, month: 13 };
        assert_eq!(err.to_string(), "Invalid billing period: 2025-13");
    }

    #[test]
    fn test_out_of_period_lists_every_file() {
        let err = PipelineError::OutOfPeriod {
            files: vec!["a.csv".to_string(), "b.csv".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("a.csv"));
        assert!(msg.contains("b.csv"));
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: PipelineError = json_err.into();
        assert!(matches!(err, PipelineError::Json(_)));
    }
}
