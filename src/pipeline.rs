// 🔁 Billing Pipeline - files → report → period gate → aggregate → line items
//
// Data flows strictly forward. Per-file failures become statuses in the
// report; only the period gate can stop a run, and it names every
// offending file when it does.

use crate::aggregator::{AggregationInput, AggregationOutcome, BillingAggregator, FileFailure};
use crate::config::BillingConfig;
use crate::entities::{MatchResult, OrganizationRegistry};
use crate::error::{PipelineError, Result};
use crate::invoice::Invoice;
use crate::line_items::{LineItemBuilder, PhoneMap};
use crate::matcher::OrganizationMatcher;
use crate::parser::{UsageFile, UsageKind};
use crate::period::{check_period, find_out_of_range_rows, BillingPeriod, OutOfRangeRow, PeriodCheck};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// PER-FILE REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Ready,
    SkippedUnknownKind,
    Unreadable(String),
}

/// Classification + match report for one file, shown before aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: UsageKind,
    /// Normalized source identifier ("" when none)
    pub phone: String,
    pub match_result: Option<MatchResult>,
    pub breadcrumb: Option<String>,
    /// SHA-256 of the file bytes
    pub fingerprint: Option<String>,
    pub row_count: usize,
    pub status: FileStatus,
}

impl FileReport {
    fn unreadable(path: &Path, reason: String) -> Self {
        FileReport {
            path: path.to_path_buf(),
            file_name: file_name(path),
            kind: UsageKind::Unknown,
            phone: String::new(),
            match_result: None,
            breadcrumb: None,
            fingerprint: None,
            row_count: 0,
            status: FileStatus::Unreadable(reason),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == FileStatus::Ready
    }

    /// Why this file contributes nothing to a run, if it doesn't
    pub fn failure(&self) -> Option<FileFailure> {
        let reason = match &self.status {
            FileStatus::Ready => return None,
            FileStatus::SkippedUnknownKind => "unknown usage kind".to_string(),
            FileStatus::Unreadable(e) => e.clone(),
        };
        Some(FileFailure {
            path: self.path.clone(),
            reason,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.csv")
        .to_string()
}

/// Classify, extract the source phone, and match it against the registry
pub fn identify_file(path: &Path, matcher: &OrganizationMatcher<'_>) -> FileReport {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read usage file");
            return FileReport::unreadable(path, e.to_string());
        }
    };

    let fingerprint = format!("{:x}", Sha256::digest(&bytes));

    let file = match UsageFile::from_bytes(path, &bytes) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot parse usage file");
            return FileReport::unreadable(path, e.to_string());
        }
    };

    let phone = file.source_identifier();
    let match_result = if phone.is_empty() {
        None
    } else {
        matcher.match_phone(&phone)
    };
    let breadcrumb = match_result.as_ref().map(|m| m.breadcrumb());

    let status = if file.kind.is_billable() {
        FileStatus::Ready
    } else {
        FileStatus::SkippedUnknownKind
    };

    tracing::info!(
        file = %file.file_name(),
        kind = file.kind.name(),
        phone = %phone,
        matched = breadcrumb.as_deref().unwrap_or("-"),
        "identified usage file"
    );

    FileReport {
        path: path.to_path_buf(),
        file_name: file.file_name(),
        kind: file.kind,
        phone,
        match_result,
        breadcrumb,
        fingerprint: Some(fingerprint),
        row_count: file.rows.len(),
        status,
    }
}

pub fn identify_files(paths: &[PathBuf], matcher: &OrganizationMatcher<'_>) -> Vec<FileReport> {
    paths.iter().map(|p| identify_file(p, matcher)).collect()
}

// ============================================================================
// PERIOD GATE
// ============================================================================

/// {in, out, total} for one file on disk
pub fn check_file_period(path: &Path, period: &BillingPeriod) -> Result<PeriodCheck> {
    let file = UsageFile::open(path)?;
    Ok(check_period(&file, period))
}

/// (row number, raw cell) pairs outside the period for one file on disk
pub fn out_of_range_rows(path: &Path, period: &BillingPeriod) -> Result<Vec<OutOfRangeRow>> {
    let file = UsageFile::open(path)?;
    Ok(find_out_of_range_rows(&file, period))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidation {
    pub file_name: String,
    pub check: PeriodCheck,
}

/// Check every ready file; any file with out-of-period rows blocks the run
pub fn validate_period(reports: &[FileReport], period: &BillingPeriod) -> Result<Vec<FileValidation>> {
    let mut validations = Vec::new();
    let mut offending = Vec::new();

    for report in reports.iter().filter(|r| r.is_ready()) {
        match check_file_period(&report.path, period) {
            Ok(check) => {
                if !check.all_within() {
                    offending.push(report.file_name.clone());
                }
                validations.push(FileValidation {
                    file_name: report.file_name.clone(),
                    check,
                });
            }
            // identified fine but vanished since: the aggregator records it
            Err(e) => {
                tracing::warn!(file = %report.file_name, error = %e, "cannot re-read file for period check");
            }
        }
    }

    if !offending.is_empty() {
        tracing::warn!(
            period = %period.label(),
            files = offending.len(),
            "files outside the selected period; line items not generated"
        );
        return Err(PipelineError::OutOfPeriod { files: offending });
    }

    Ok(validations)
}

// ============================================================================
// BILLING RUN
// ============================================================================

/// Everything the export adapter and the preview surface need from one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRun {
    pub invoice: Invoice,
    pub reports: Vec<FileReport>,
    pub validations: Vec<FileValidation>,
    pub aggregation: AggregationOutcome,
}

/// Run the whole pipeline for one billing period
///
/// `registry` is the caller-owned snapshot; `overrides` maps site labels to
/// last-4 digits and beats every other phone source.
pub fn run_billing(
    paths: &[PathBuf],
    registry: &OrganizationRegistry,
    period: BillingPeriod,
    config: &BillingConfig,
    overrides: &HashMap<String, String>,
) -> Result<BillingRun> {
    let matcher = OrganizationMatcher::new(registry);

    let reports = identify_files(paths, &matcher);
    let validations = validate_period(&reports, &period)?;

    let inputs: Vec<AggregationInput> = reports
        .iter()
        .filter(|r| r.is_ready())
        .map(|r| AggregationInput::from_match(r.path.clone(), r.kind, r.match_result.as_ref()))
        .collect();
    let mut aggregation = BillingAggregator::new(period).aggregate(&inputs);

    // files skipped before aggregation come first, in input order
    let mut failures: Vec<FileFailure> = reports.iter().filter_map(FileReport::failure).collect();
    failures.append(&mut aggregation.failures);
    aggregation.failures = failures;

    // matched-file phones travel on each aggregate row
    let phones = PhoneMap::new()
        .with_overrides(overrides)
        .with_registry(registry);

    let builder = LineItemBuilder::new(&matcher, &phones);
    let mut invoice = Invoice::new(period, config.tax_rate);
    invoice.extend_line_items(builder.build(
        &aggregation.rows_for(UsageKind::Calls),
        config.voice_unit_price,
    ));
    invoice.extend_line_items(builder.build(
        &aggregation.rows_for(UsageKind::Messages),
        config.sms_unit_price,
    ));
    invoice.infer_bill_to(&matcher);

    tracing::info!(
        period = %period.label(),
        files = reports.len(),
        items = invoice.line_items.len(),
        total = invoice.totals.total,
        "billing run complete"
    );

    Ok(BillingRun {
        invoice,
        reports,
        validations,
        aggregation,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Client, Division, Site};
    use tempfile::TempDir;

    fn registry() -> OrganizationRegistry {
        OrganizationRegistry::new(vec![Client {
            name: "Sante Medical".to_string(),
            address: "7370 N Palm Ave".to_string(),
            contact: String::new(),
            divisions: vec![Division {
                name: "Fresno".to_string(),
                sites: vec![
                    Site::new("Cardiology", "555-111-2222"),
                    Site::new("Lobby", "555-867-5309"),
                ],
            }],
        }])
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn may() -> BillingPeriod {
        BillingPeriod::new(2025, 5).unwrap()
    }

    #[test]
    fn test_identify_file_matches_by_phone() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "calls.csv",
            "From,To,Duration,Start Time\n+15550001111,+1 555 867 5309,30,2025-05-01\n",
        );
        let reg = registry();
        let matcher = OrganizationMatcher::new(&reg);

        let report = identify_file(&path, &matcher);
        assert_eq!(report.kind, UsageKind::Calls);
        assert_eq!(report.phone, "+15558675309");
        assert_eq!(report.match_result.as_ref().map(|m| m.site_name.as_str()), Some("Lobby"));
        assert_eq!(
            report.breadcrumb.as_deref(),
            Some("Sante Medical > Fresno > Lobby (-5309)")
        );
        assert_eq!(report.fingerprint.as_ref().map(|f| f.len()), Some(64));
        assert!(report.is_ready());
    }

    #[test]
    fn test_identify_unreadable_and_unknown() {
        let dir = TempDir::new().unwrap();
        let unknown = write(&dir, "other.csv", "Name,Amount\nfoo,1\n");
        let reg = registry();
        let matcher = OrganizationMatcher::new(&reg);

        let reports = identify_files(&[dir.path().join("missing.csv"), unknown], &matcher);
        assert!(matches!(reports[0].status, FileStatus::Unreadable(_)));
        assert_eq!(reports[1].status, FileStatus::SkippedUnknownKind);
        assert!(reports[1].match_result.is_none());
    }

    #[test]
    fn test_period_gate_lists_every_offending_file() {
        let dir = TempDir::new().unwrap();
        let ok = write(&dir, "ok.csv", "To,Duration,Start Time\n5558675309,1,2025-05-01\n");
        let bad_a = write(&dir, "bad_a.csv", "To,Duration,Start Time\n5558675309,1,2025-04-01\n");
        let bad_b = write(&dir, "bad_b.csv", "From,NumSegments,Sent Date\n5558675309,1,garbage\n");
        let reg = registry();
        let matcher = OrganizationMatcher::new(&reg);

        let reports = identify_files(&[ok, bad_a, bad_b], &matcher);
        let err = validate_period(&reports, &may()).unwrap_err();
        match err {
            PipelineError::OutOfPeriod { files } => {
                assert_eq!(files, vec!["bad_a.csv".to_string(), "bad_b.csv".to_string()]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_out_of_range_rows_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "calls.csv",
            "To,Duration,Start Time\nx,1,2025-05-01\nx,1,2025-06-01\nx,1,2025-05-09\n",
        );

        let rows = out_of_range_rows(&path, &may()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_number, 3);

        let check = check_file_period(&path, &may()).unwrap();
        assert_eq!(check.total, 3);
        assert_eq!(check.in_range, 2);
    }

    #[test]
    fn test_run_billing_end_to_end() {
        let dir = TempDir::new().unwrap();
        let mut calls = String::from("From,To,Duration,Start Time\n");
        for day in 1..=7 {
            calls.push_str(&format!("+15550001111,5558675309,30,2025-05-{:02} 09:00:00\n", day));
        }
        let calls = write(&dir, "calls.csv", &calls);
        let sms = write(
            &dir,
            "sms.csv",
            "From,To,Body,NumSegments,Sent Date\n\
             (555) 111-2222,+15550009999,hi,3,13:00:53 PDT 2025-05-31\n\
             (555) 111-2222,+15550009999,hi,1,05/02/2025\n",
        );
        let stray = write(
            &dir,
            "stray.csv",
            "From,To,Duration,Start Time\n+15550001111,5550004242,30,2025-05-03\n",
        );
        let unknown = write(&dir, "notes.csv", "Name\nfoo\n");

        let run = run_billing(
            &[sms, calls, stray, unknown],
            &registry(),
            may(),
            &BillingConfig::default(),
            &HashMap::new(),
        )
        .unwrap();

        let descriptions: Vec<&str> = run
            .invoice
            .line_items
            .iter()
            .map(|li| li.description.as_str())
            .collect();
        assert_eq!(
            descriptions,
            vec!["Lobby VOICE (-5309)", "Unassigned VOICE", "Cardiology SMS (-2222)"]
        );
        assert_eq!(run.invoice.line_items[0].quantity, 7);
        assert_eq!(run.invoice.line_items[2].quantity, 3);
        assert_eq!(run.invoice.totals.total, 1.54);
        assert_eq!(run.invoice.bill_to.as_ref().map(|b| b.name.as_str()), Some("Sante Medical"));
        assert_eq!(run.reports[3].status, FileStatus::SkippedUnknownKind);
        assert_eq!(run.aggregation.failures.len(), 1);
        assert_eq!(run.aggregation.failures[0].reason, "unknown usage kind");
    }

    #[test]
    fn test_run_billing_reports_unreadable_files_as_failures() {
        let dir = TempDir::new().unwrap();
        let ok = write(&dir, "ok.csv", "To,Duration,Start Time
5558675309,30,2025-05-01
");
        let missing = dir.path().join("missing.csv");

        let run = run_billing(
            &[ok, missing.clone()],
            &registry(),
            may(),
            &BillingConfig::default(),
            &HashMap::new(),
        )
        .unwrap();

        assert_eq!(run.invoice.line_items.len(), 1);
        assert_eq!(run.aggregation.failures.len(), 1);
        assert_eq!(run.aggregation.failures[0].path, missing);
        assert!(matches!(run.reports[1].status, FileStatus::Unreadable(_)));
    }

    #[test]
    fn test_run_billing_same_named_sites() {
        let reg = OrganizationRegistry::new(vec![Client {
            name: "Valley Health".to_string(),
            address: String::new(),
            contact: String::new(),
            divisions: vec![
                Division {
                    name: "East".to_string(),
                    sites: vec![Site::new("Front Desk", "555-999-0001")],
                },
                Division {
                    name: "West".to_string(),
                    sites: vec![Site::new("Front Desk", "555-999-0002")],
                },
            ],
        }]);
        let dir = TempDir::new().unwrap();
        let east_a = write(&dir, "east_a.csv", "To,Duration,Start Time
5559990001,30,2025-05-01
");
        let east_b = write(&dir, "east_b.csv", "To,Duration,Start Time
5559990001,30,2025-05-02
");
        let west = write(&dir, "west.csv", "To,Duration,Start Time
5559990002,30,2025-05-03
");

        let run = run_billing(
            &[west, east_a, east_b],
            &reg,
            may(),
            &BillingConfig::default(),
            &HashMap::new(),
        )
        .unwrap();

        let lines: Vec<(&str, u64)> = run
            .invoice
            .line_items
            .iter()
            .map(|li| (li.description.as_str(), li.quantity))
            .collect();
        assert_eq!(
            lines,
            vec![("Front Desk VOICE (-0001)", 2), ("Front Desk VOICE (-0002)", 1)]
        );
        assert_eq!(run.invoice.bill_to.as_ref().map(|b| b.name.as_str()), Some("Valley Health"));
    }

    #[test]
    fn test_run_billing_override_wins() {
        let dir = TempDir::new().unwrap();
        let calls = write(
            &dir,
            "calls.csv",
            "To,Duration,Start Time\n5558675309,30,2025-05-01\n",
        );
        let mut overrides = HashMap::new();
        overrides.insert("Lobby".to_string(), "0001".to_string());

        let run = run_billing(&[calls], &registry(), may(), &BillingConfig::default(), &overrides).unwrap();
        assert_eq!(run.invoice.line_items[0].description, "Lobby VOICE (-0001)");
    }

    #[test]
    fn test_run_billing_blocked_by_period() {
        let dir = TempDir::new().unwrap();
        let calls = write(&dir, "april.csv", "To,Duration,Start Time\n5558675309,30,2025-04-30\n");

        let err = run_billing(&[calls], &registry(), may(), &BillingConfig::default(), &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::OutOfPeriod { .. }));
    }
}
