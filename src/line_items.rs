// 🧾 Line-Item Builder & Decorator
//
// (site label, quantity) → ordered, human-labeled invoice lines.
//
// Ordering: sites known to the registry first, in registry traversal order;
// everything else afterwards, sorted lexicographically.
// Decoration: " (-DDDD)" from the first phone layer that knows the site.
// The unassigned bucket is never decorated.

use crate::aggregator::AggregateRow;
use crate::entities::OrganizationRegistry;
use crate::matcher::{normalize_label, OrganizationMatcher};
use crate::parser::UsageKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

static DECORATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([-–]\d{4}\)\s*$").expect("valid regex"));

// ============================================================================
// LINE ITEM
// ============================================================================

/// Round to cents, half away from zero
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u64,
    pub unit_price: f64,
    pub amount: f64,

    /// Registry site the line bills, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_path: Option<String>,
}

impl LineItem {
    /// amount = quantity × unit_price, rounded to cents
    pub fn new(description: &str, quantity: u64, unit_price: f64) -> Self {
        LineItem {
            description: description.trim().to_string(),
            quantity,
            unit_price,
            amount: round_cents(quantity as f64 * unit_price),
            site_path: None,
        }
    }

    pub fn with_site_path(mut self, site_path: Option<String>) -> Self {
        self.site_path = site_path;
        self
    }
}

// ============================================================================
// PHONE MAP
// ============================================================================

/// Where a decoration phone came from, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PhoneSource {
    Override,
    MatchedFile,
    Registry,
}

impl PhoneSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneSource::Override => "override",
            PhoneSource::MatchedFile => "matched_file",
            PhoneSource::Registry => "registry",
        }
    }
}

fn is_last4(value: &str) -> bool {
    value.len() == 4 && value.chars().all(|c| c.is_ascii_digit())
}

/// Layered site → last-4 lookup
///
/// Keys are normalized labels. Values that are not exactly four digits are
/// dropped on insert.
#[derive(Debug, Clone, Default)]
pub struct PhoneMap {
    layers: BTreeMap<PhoneSource, HashMap<String, String>>,
}

impl PhoneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one entry; within a layer the first entry for a site sticks
    pub fn insert(&mut self, source: PhoneSource, label: &str, last4: &str) {
        let last4 = last4.trim();
        if !is_last4(last4) {
            tracing::debug!(label, last4, source = source.as_str(), "ignoring malformed last-4");
            return;
        }
        let key = normalize_label(label);
        if key.is_empty() {
            return;
        }
        self.layers
            .entry(source)
            .or_default()
            .entry(key)
            .or_insert_with(|| last4.to_string());
    }

    /// Caller-supplied label → last-4 overrides
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (label, last4) in overrides {
            self.insert(PhoneSource::Override, label, last4);
        }
        self
    }

    /// Registry site phones; a name shared by sites with different phones is left out
    pub fn with_registry(mut self, registry: &OrganizationRegistry) -> Self {
        let mut seen: HashMap<String, Option<String>> = HashMap::new();
        for site in registry.sites() {
            let key = normalize_label(&site.site.name);
            let phone = site.site.phone_last4();
            seen.entry(key)
                .and_modify(|existing| {
                    if *existing != phone {
                        *existing = None;
                    }
                })
                .or_insert(phone);
        }

        let layer = self.layers.entry(PhoneSource::Registry).or_default();
        for (key, phone) in seen {
            if let Some(last4) = phone {
                layer.insert(key, last4);
            }
        }
        self
    }

    /// Resolve a label; logs which source won when sources disagree
    ///
    /// `matched_last4` and `site_last4` belong to one specific site and take
    /// the place of the label-keyed MatchedFile and Registry layers, which
    /// cannot tell same-named sites apart.
    pub fn resolve(
        &self,
        label: &str,
        matched_last4: Option<&str>,
        site_last4: Option<&str>,
    ) -> Option<(String, PhoneSource)> {
        let key = normalize_label(label);
        if key.is_empty() {
            return None;
        }

        let sources = [PhoneSource::Override, PhoneSource::MatchedFile, PhoneSource::Registry];
        let mut hits = sources.into_iter().filter_map(|source| {
            let own = match source {
                PhoneSource::Override => None,
                PhoneSource::MatchedFile => matched_last4,
                PhoneSource::Registry => site_last4,
            };
            own.filter(|v| is_last4(v))
                .or_else(|| {
                    self.layers
                        .get(&source)
                        .and_then(|layer| layer.get(&key))
                        .map(String::as_str)
                })
                .map(|v| (v, source))
        });

        let (winner, source) = hits.next()?;
        for (other, other_source) in hits {
            if other != winner {
                tracing::info!(
                    site = %key,
                    winner = source.as_str(),
                    winner_last4 = %winner,
                    overridden = other_source.as_str(),
                    overridden_last4 = %other,
                    "phone sources disagree; higher-priority source wins"
                );
            }
        }

        Some((winner.to_string(), source))
    }
}

// ============================================================================
// DESCRIPTIONS
// ============================================================================

/// "<label> <KIND>", unless the label already ends with that kind token
pub fn describe(label: &str, kind: UsageKind) -> String {
    let label = label.trim();
    let Some(token) = kind.label_token() else {
        return label.to_string();
    };

    let ends_with_token = label
        .split_whitespace()
        .last()
        .is_some_and(|w| w.eq_ignore_ascii_case(token));

    if ends_with_token {
        label.to_string()
    } else {
        format!("{} {}", label, token)
    }
}

/// Already carries a "(-DDDD)" suffix
pub fn is_decorated(description: &str) -> bool {
    DECORATED_RE.is_match(description)
}

/// Append " (-DDDD)" when a last-4 is known; idempotent
pub fn decorate(description: &str, last4: Option<&str>) -> String {
    let description = description.trim();
    if description.is_empty() || is_decorated(description) {
        return description.to_string();
    }

    match last4 {
        Some(l4) => format!("{} (-{})", description, l4),
        None => description.to_string(),
    }
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct LineItemBuilder<'a> {
    matcher: &'a OrganizationMatcher<'a>,
    phones: &'a PhoneMap,
}

impl<'a> LineItemBuilder<'a> {
    pub fn new(matcher: &'a OrganizationMatcher<'a>, phones: &'a PhoneMap) -> Self {
        LineItemBuilder { matcher, phones }
    }

    /// Order aggregate rows: registry order first, leftovers sorted by label
    ///
    /// Rows carrying a site path belong to exactly that site; label-only rows
    /// go to the first site with the same normalized name.
    pub fn order<'r>(&self, rows: &'r [AggregateRow]) -> Vec<&'r AggregateRow> {
        let mut remaining: Vec<&'r AggregateRow> = rows.iter().collect();
        let mut ordered = Vec::with_capacity(rows.len());

        for site in self.matcher.sites() {
            let path = site.path();
            let name = normalize_label(&site.site.name);
            let (hits, rest): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|row| match &row.site_path {
                    Some(p) => *p == path,
                    None => !row.is_unassigned() && normalize_label(&row.site_label) == name,
                });
            ordered.extend(hits);
            remaining = rest;
        }

        remaining.sort_by(|a, b| a.site_label.cmp(&b.site_label));
        ordered.extend(remaining);
        ordered
    }

    /// "<label> <KIND> (-DDDD)" for one row
    fn description(&self, row: &AggregateRow) -> String {
        let description = describe(&row.site_label, row.kind);
        if row.is_unassigned() {
            return description;
        }

        let site_last4 = row
            .site_path
            .as_deref()
            .and_then(|p| self.matcher.find_path(p))
            .and_then(|s| s.site.phone_last4());
        let resolved = self
            .phones
            .resolve(&row.site_label, row.matched_last4.as_deref(), site_last4.as_deref());

        decorate(&description, resolved.as_ref().map(|(l4, _)| l4.as_str()))
    }

    /// One decorated line item per row with quantity > 0
    pub fn build(&self, rows: &[AggregateRow], unit_price: f64) -> Vec<LineItem> {
        self.order(rows)
            .into_iter()
            .filter(|row| row.billed_quantity > 0)
            .map(|row| {
                LineItem::new(&self.description(row), row.billed_quantity, unit_price)
                    .with_site_path(row.site_path.clone())
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
