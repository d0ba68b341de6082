// 🏷️ Organization Matcher - source phone or label → site
//
// Two strategies:
// 1. Phone: last-4 of registry phone == last-4 of identifier, first site in
//    traversal order wins
// 2. Label: one normalization pass, then exact → substring (longest overlap)
//
// Ambiguity is "no match", never a guess.

use crate::entities::{last4, MatchResult, OrganizationRegistry, SiteRef};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static DECORATION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(\s*[-–]?\s*\d{4}\s*\)\s*$").expect("valid regex"));

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const KIND_SUFFIXES: &[&str] = &[" VOICE", " SMS"];

/// Shortest normalized label allowed to participate in substring matching
const MIN_SUBSTRING_LEN: usize = 3;

/// Normalize a site label for comparison
///
/// Precedence:
/// 1. drop a trailing "(-DDDD)" decoration
/// 2. em/en dash is a separator; keep the left segment
/// 3. uppercase, collapse whitespace
/// 4. strip a trailing VOICE / SMS qualifier (and dangling dashes)
pub fn normalize_label(label: &str) -> String {
    let undecorated = DECORATION_SUFFIX_RE.replace(label, "");
    let left = undecorated
        .split(['—', '–'])
        .next()
        .unwrap_or_default();

    let upper = left.to_uppercase();
    let mut normalized = WHITESPACE_RE.replace_all(upper.trim(), " ").into_owned();

    for suffix in KIND_SUFFIXES {
        if let Some(stripped) = normalized.strip_suffix(suffix) {
            normalized = stripped.to_string();
            break;
        }
    }

    normalized
        .trim_end_matches(|c: char| c == '-' || c.is_whitespace())
        .to_string()
}

// ============================================================================
// MATCHER
// ============================================================================

/// Lookup structures built once per registry snapshot
pub struct OrganizationMatcher<'a> {
    sites: Vec<SiteRef<'a>>,
    /// normalized site name → indices into `sites`
    by_name: HashMap<String, Vec<usize>>,
}

impl<'a> OrganizationMatcher<'a> {
    pub fn new(registry: &'a OrganizationRegistry) -> Self {
        let sites: Vec<SiteRef<'a>> = registry.sites().collect();
        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, site) in sites.iter().enumerate() {
            let key = normalize_label(&site.site.name);
            if !key.is_empty() {
                by_name.entry(key).or_default().push(idx);
            }
        }

        OrganizationMatcher {
            sites,
            by_name,
        }
    }

    /// Sites in traversal order
    pub fn sites(&self) -> &[SiteRef<'a>] {
        &self.sites
    }

    /// Last-4 phone match; first site in traversal order wins
    pub fn match_phone(&self, identifier: &str) -> Option<MatchResult> {
        let wanted = last4(identifier)?;

        let hit = self
            .sites
            .iter()
            .find(|s| s.site.phone_last4().as_deref() == Some(wanted.as_str()));

        match hit {
            Some(site) => {
                tracing::debug!(
                    identifier,
                    site = %site.site.name,
                    "phone matched by last-4"
                );
                Some(site.to_match(Some(wanted)))
            }
            None => {
                tracing::debug!(identifier, "no site with matching last-4");
                None
            }
        }
    }

    /// Site by its "Client > Division > Site" path
    pub fn find_path(&self, path: &str) -> Option<&SiteRef<'a>> {
        self.sites.iter().find(|s| s.path() == path)
    }

    /// Label match: exact normalized name, then longest substring overlap
    pub fn match_label(&self, label: &str) -> Option<MatchResult> {
        self.find_label(label)
            .map(|site| site.to_match(site.site.phone_last4()))
    }

    /// Site reference behind a label, same rules as `match_label`
    pub fn find_label(&self, label: &str) -> Option<&SiteRef<'a>> {
        let key = normalize_label(label);
        if key.is_empty() {
            return None;
        }

        if let Some(indices) = self.by_name.get(&key) {
            return self.unique(indices, label);
        }

        self.substring_match(&key, label)
    }

    fn unique(&self, indices: &[usize], label: &str) -> Option<&SiteRef<'a>> {
        match indices {
            [only] => self.sites.get(*only),
            _ => {
                tracing::warn!(label, candidates = indices.len(), "ambiguous site label");
                None
            }
        }
    }

    /// Containment either way; the longest overlapping known name wins,
    /// a tie between different names is ambiguous
    fn substring_match(&self, key: &str, label: &str) -> Option<&SiteRef<'a>> {
        if key.len() < MIN_SUBSTRING_LEN {
            return None;
        }

        let mut best: Option<(usize, &String)> = None;
        let mut tied = false;

        for name in self.by_name.keys() {
            if name.len() < MIN_SUBSTRING_LEN {
                continue;
            }
            if !(name.contains(key) || key.contains(name.as_str())) {
                continue;
            }
            let overlap = name.len().min(key.len());
            match best {
                Some((len, _)) if overlap < len => {}
                Some((len, _)) if overlap == len => tied = true,
                _ => {
                    best = Some((overlap, name));
                    tied = false;
                }
            }
        }

        let (_, name) = best?;
        if tied {
            tracing::warn!(label, "substring match tied between sites");
            return None;
        }
        tracing::debug!(label, site = %name, "site matched by substring");
        self.unique(&self.by_name[name], label)
    }
}

// ============================================================================
// TESTS
// ============================================================================
