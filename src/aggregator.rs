// 📊 Billing Aggregator - usage rows → billed quantity per site
//
// One run walks three stages:
//   COLLECT: open every input file (unreadable files are recorded, not fatal)
//   FILTER:  keep rows whose timestamp falls in the billing period
//   SUM:     apply the kind's billing rule per kept row, summed per site
//
// Output is keyed by (kind, site label, site path) in a BTreeMap, so repeated
// runs over the same inputs produce the same rows in the same order. Two
// registry sites sharing a name stay separate rows through their path.

use crate::entities::MatchResult;
use crate::parser::{get_parser, UsageFile, UsageKind, UsageParser};
use crate::period::{date_column, parse_usage_date, BillingPeriod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Label for files no registry site could be attributed to
pub const UNASSIGNED_LABEL: &str = "Unassigned";

// ============================================================================
// TYPES
// ============================================================================

/// One file to bill, already classified and attributed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationInput {
    pub path: PathBuf,
    pub kind: UsageKind,
    pub site_label: String,
    /// "Client > Division > Site" when attributed to a registry site
    pub site_path: Option<String>,
    /// Last-4 the file was matched on
    pub matched_last4: Option<String>,
}

impl AggregationInput {
    /// Attribute by label only (blank or missing → unassigned)
    pub fn new(path: PathBuf, kind: UsageKind, site_label: Option<&str>) -> Self {
        AggregationInput {
            path,
            kind,
            site_label: site_label
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(UNASSIGNED_LABEL)
                .to_string(),
            site_path: None,
            matched_last4: None,
        }
    }

    /// Attribute to the registry site a file was matched to
    pub fn from_match(path: PathBuf, kind: UsageKind, matched: Option<&MatchResult>) -> Self {
        let mut input = Self::new(path, kind, matched.map(|m| m.site_name.as_str()));
        if let Some(m) = matched.filter(|m| !m.site_name.trim().is_empty()) {
            input.site_path = Some(m.site_path());
            input.matched_last4 = m.matched_phone_last4.clone();
        }
        input
    }
}

/// Billed quantity for one site and kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub site_label: String,
    pub site_path: Option<String>,
    /// First matched last-4 among the files summed into this row
    pub matched_last4: Option<String>,
    pub kind: UsageKind,
    pub billed_quantity: u64,
}

impl AggregateRow {
    pub fn is_unassigned(&self) -> bool {
        self.site_path.is_none() && self.site_label == UNASSIGNED_LABEL
    }
}

/// Per-file contribution, for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContribution {
    pub path: PathBuf,
    pub site_label: String,
    pub site_path: Option<String>,
    pub kind: UsageKind,
    pub rows_in_period: usize,
    pub rows_discarded: usize,
    pub billed_quantity: u64,
}

/// A file that contributed nothing because it could not be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationStage {
    Collect,
    Filter,
    Sum,
    Done,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationOutcome {
    pub rows: Vec<AggregateRow>,
    pub contributions: Vec<FileContribution>,
    pub failures: Vec<FileFailure>,
}

impl AggregationOutcome {
    pub fn rows_for(&self, kind: UsageKind) -> Vec<AggregateRow> {
        self.rows.iter().filter(|r| r.kind == kind).cloned().collect()
    }
}

// ============================================================================
// RUN STATE
// ============================================================================

struct Collected {
    input: AggregationInput,
    file: UsageFile,
    parser: Box<dyn UsageParser>,
}

struct Filtered {
    collected: Collected,
    kept: Vec<usize>,
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct BillingAggregator {
    period: BillingPeriod,
}

impl BillingAggregator {
    pub fn new(period: BillingPeriod) -> Self {
        BillingAggregator { period }
    }

    pub fn period(&self) -> BillingPeriod {
        self.period
    }

    /// Run COLLECT → FILTER → SUM over the inputs
    pub fn aggregate(&self, inputs: &[AggregationInput]) -> AggregationOutcome {
        let mut outcome = AggregationOutcome::default();

        self.enter(AggregationStage::Collect);
        let collected = self.collect(inputs, &mut outcome.failures);

        self.enter(AggregationStage::Filter);
        let filtered: Vec<Filtered> = collected.into_iter().map(|c| self.filter(c)).collect();

        self.enter(AggregationStage::Sum);
        type SiteKey = (UsageKind, String, Option<String>);
        let mut totals: BTreeMap<SiteKey, (u64, Option<String>)> = BTreeMap::new();
        for f in &filtered {
            let contribution = self.sum(f);
            let entry = totals
                .entry((
                    contribution.kind,
                    contribution.site_label.clone(),
                    contribution.site_path.clone(),
                ))
                .or_insert((0, None));
            entry.0 += contribution.billed_quantity;
            if entry.1.is_none() {
                entry.1 = f.collected.input.matched_last4.clone();
            }
            outcome.contributions.push(contribution);
        }

        outcome.rows = totals
            .into_iter()
            .map(|((kind, site_label, site_path), (billed_quantity, matched_last4))| AggregateRow {
                site_label,
                site_path,
                matched_last4,
                kind,
                billed_quantity,
            })
            .collect();

        self.enter(AggregationStage::Done);
        tracing::info!(
            period = %self.period.label(),
            files = inputs.len(),
            failed = outcome.failures.len(),
            rows = outcome.rows.len(),
            "aggregation complete"
        );
        outcome
    }

    fn enter(&self, stage: AggregationStage) {
        tracing::debug!(?stage, period = %self.period.label(), "aggregation stage");
    }

    fn collect(&self, inputs: &[AggregationInput], failures: &mut Vec<FileFailure>) -> Vec<Collected> {
        let mut collected = Vec::with_capacity(inputs.len());

        for input in inputs {
            let Some(parser) = get_parser(input.kind) else {
                tracing::warn!(path = %input.path.display(), "skipping file of unknown kind");
                failures.push(FileFailure {
                    path: input.path.clone(),
                    reason: "unknown usage kind".to_string(),
                });
                continue;
            };

            match UsageFile::open(&input.path) {
                Ok(mut file) => {
                    file.kind = input.kind;
                    collected.push(Collected {
                        input: input.clone(),
                        file,
                        parser,
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %input.path.display(), error = %e, "skipping unreadable file");
                    failures.push(FileFailure {
                        path: input.path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        collected
    }

    fn filter(&self, collected: Collected) -> Filtered {
        let kept = match date_column(&collected.file) {
            Some(col) => collected
                .file
                .rows
                .iter()
                .enumerate()
                .filter(|(_, row)| {
                    parse_usage_date(collected.file.cell(row, col))
                        .is_some_and(|d| self.period.contains(d))
                })
                .map(|(idx, _)| idx)
                .collect(),
            None => {
                tracing::warn!(
                    path = %collected.input.path.display(),
                    "no date column; no rows billed"
                );
                Vec::new()
            }
        };

        Filtered { collected, kept }
    }

    fn sum(&self, filtered: &Filtered) -> FileContribution {
        let c = &filtered.collected;
        let billed_quantity: u64 = filtered
            .kept
            .iter()
            .map(|&idx| c.parser.billed_units(&c.file, &c.file.rows[idx]))
            .sum();

        tracing::debug!(
            path = %c.input.path.display(),
            site = %c.input.site_label,
            kind = c.input.kind.name(),
            billed_quantity,
            "file summed"
        );

        FileContribution {
            path: c.input.path.clone(),
            site_label: c.input.site_label.clone(),
            site_path: c.input.site_path.clone(),
            kind: c.input.kind,
            rows_in_period: filtered.kept.len(),
            rows_discarded: c.file.rows.len() - filtered.kept.len(),
            billed_quantity,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
