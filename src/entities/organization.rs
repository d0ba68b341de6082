// 🏢 Organization Entities - client → division → site
//
// The registry is an immutable snapshot: loaded once by the caller, passed by
// reference into every stage, never mutated by the pipeline.
// Declared order is significant: it is the traversal order for phone
// matching and for line-item ordering.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// ENTITIES
// ============================================================================

/// Site - lowest organizational unit; owns a phone line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,

    /// Free-form, as typed into the registry ("555-867-5309", "+1 (555) ...")
    #[serde(default)]
    pub phone: String,
}

impl Site {
    pub fn new(name: &str, phone: &str) -> Self {
        Site {
            name: name.to_string(),
            phone: phone.to_string(),
        }
    }

    /// Trailing four digits of the phone, if it has at least four
    pub fn phone_last4(&self) -> Option<String> {
        last4(&self.phone)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Division {
    pub name: String,

    #[serde(default)]
    pub sites: Vec<Site>,
}

/// Client - top-level organization (the invoice's bill-to)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,

    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub contact: String,

    #[serde(default)]
    pub divisions: Vec<Division>,
}

/// Trailing four digits of any phone-ish string
pub fn last4(raw: &str) -> Option<String> {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    Some(digits[digits.len() - 4..].iter().collect())
}

// ============================================================================
// MATCH RESULT
// ============================================================================

/// Where a file or label landed in the hierarchy
///
/// Transient: attached to a file report or line item, never stored alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub client_name: String,
    pub division_name: String,
    pub site_name: String,
    pub matched_phone_last4: Option<String>,
}

fn join_path(parts: [&str; 3]) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" > ")
}

impl MatchResult {
    /// "Client > Division > Site", the site's identity within a snapshot
    pub fn site_path(&self) -> String {
        join_path([self.client_name.as_str(), self.division_name.as_str(), self.site_name.as_str()])
    }

    /// "Client > Division > Site (-1234)"
    pub fn breadcrumb(&self) -> String {
        let path = self.site_path();
        match &self.matched_phone_last4 {
            Some(l4) => format!("{} (-{})", path, l4),
            None => path,
        }
    }
}

// ============================================================================
// REGISTRY SNAPSHOT
// ============================================================================

/// Borrowed view of one site with its ancestors
#[derive(Debug, Clone, Copy)]
pub struct SiteRef<'a> {
    pub client: &'a Client,
    pub division: &'a Division,
    pub site: &'a Site,
}

impl<'a> SiteRef<'a> {
    /// Same form as `MatchResult::site_path`
    pub fn path(&self) -> String {
        join_path([self.client.name.as_str(), self.division.name.as_str(), self.site.name.as_str()])
    }

    pub fn to_match(&self, matched_phone_last4: Option<String>) -> MatchResult {
        MatchResult {
            client_name: self.client.name.clone(),
            division_name: self.division.name.clone(),
            site_name: self.site.name.clone(),
            matched_phone_last4,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    clients: Vec<Client>,
}

/// OrganizationRegistry - read-only snapshot of all clients
#[derive(Debug, Clone, Default)]
pub struct OrganizationRegistry {
    clients: Vec<Client>,
}

impl OrganizationRegistry {
    pub fn new(clients: Vec<Client>) -> Self {
        OrganizationRegistry { clients }
    }

    /// Parse the registry document: {"version": 1, "clients": [...]}
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: RegistryDocument = serde_json::from_str(json)
            .map_err(|e| PipelineError::Registry(format!("invalid registry document: {}", e)))?;
        Ok(OrganizationRegistry::new(doc.clients))
    }

    /// Load the snapshot from disk (the single load boundary of a run)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Registry(format!("failed to read {}: {}", path.display(), e))
        })?;
        let registry = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            clients = registry.clients.len(),
            sites = registry.site_count(),
            "loaded organization registry"
        );
        Ok(registry)
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    /// Every site in declared client → division → site order
    pub fn sites(&self) -> impl Iterator<Item = SiteRef<'_>> {
        self.clients.iter().flat_map(|client| {
            client.divisions.iter().flat_map(move |division| {
                division.sites.iter().map(move |site| SiteRef {
                    client,
                    division,
                    site,
                })
            })
        })
    }

    pub fn site_count(&self) -> usize {
        self.sites().count()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "version": 1,
        "clients": [
            {
                "id": "c1",
                "name": "Community Medical Group",
                "address": "1 Main St",
                "divisions": [
                    {"name": "Primary Care", "sites": [
                        {"name": "North Clinic", "phone": "555-111-2222"},
                        {"name": "West Clinic", "phone": "555-333-4444"}
                    ]}
                ]
            },
            {"name": "Fresno Digestive Health"}
        ]
    }"#;

    #[test]
    fn test_load_registry_document() {
        let registry = OrganizationRegistry::from_json_str(DOC).unwrap();
        assert_eq!(registry.clients().len(), 2);
        assert_eq!(registry.site_count(), 2);
        assert_eq!(registry.clients()[1].divisions.len(), 0);
    }

    #[test]
    fn test_invalid_document_is_registry_error() {
        let err = OrganizationRegistry::from_json_str("{nope").unwrap_err();
        assert!(matches!(err, PipelineError::Registry(_)));
    }

    #[test]
    fn test_sites_in_declared_order() {
        let registry = OrganizationRegistry::from_json_str(DOC).unwrap();
        let names: Vec<&str> = registry.sites().map(|s| s.site.name.as_str()).collect();
        assert_eq!(names, vec!["North Clinic", "West Clinic"]);
    }

    #[test]
    fn test_last4() {
        assert_eq!(last4("555-867-5309"), Some("5309".to_string()));
        assert_eq!(last4("+1 (555) 867-5309"), Some("5309".to_string()));
        assert_eq!(last4("123"), None);
        assert_eq!(last4(""), None);
    }

    #[test]
    fn test_breadcrumb() {
        let m = MatchResult {
            client_name: "CMG".to_string(),
            division_name: "Primary Care".to_string(),
            site_name: "North Clinic".to_string(),
            matched_phone_last4: Some("2222".to_string()),
        };
        assert_eq!(m.breadcrumb(), "CMG > Primary Care > North Clinic (-2222)");

        let bare = MatchResult {
            division_name: String::new(),
            matched_phone_last4: None,
            ..m
        };
        assert_eq!(bare.breadcrumb(), "CMG > North Clinic");
        assert_eq!(bare.site_path(), "CMG > North Clinic");
    }

    #[test]
    fn test_site_ref_path_matches_match_result() {
        let registry = OrganizationRegistry::from_json_str(DOC).unwrap();
        let site = registry.sites().nth(1).unwrap();
        assert_eq!(site.path(), "Community Medical Group > Primary Care > West Clinic");
        assert_eq!(site.to_match(None).site_path(), site.path());
    }
}
