// 📄 Invoice - in-memory document handed to the export adapter
//
// Holds ordered line items plus run-level totals. Persistence is the
// caller's concern; this module only keeps the numbers consistent.

use crate::line_items::{round_cents, LineItem};
use crate::matcher::OrganizationMatcher;
use crate::period::BillingPeriod;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillTo {
    pub name: String,
    pub address: String,
    pub contact: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceType {
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub invoice_type: InvoiceType,
    /// Human-facing number printed on the document
    pub invoice_number: Option<u64>,
    /// Issue date
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub period: BillingPeriod,
    pub bill_to: Option<BillTo>,
    pub tax_rate: f64,
    pub line_items: Vec<LineItem>,
    pub totals: InvoiceTotals,
    #[serde(default)]
    pub notes: String,
}

impl Invoice {
    /// New monthly invoice with a fresh UUID, issued today, no lines
    pub fn new(period: BillingPeriod, tax_rate: f64) -> Self {
        Invoice {
            id: Uuid::new_v4(),
            invoice_type: InvoiceType::Monthly,
            invoice_number: None,
            date: Local::now().date_naive(),
            created_at: Utc::now(),
            period,
            bill_to: None,
            tax_rate,
            line_items: Vec::new(),
            totals: InvoiceTotals::default(),
            notes: String::new(),
        }
    }

    pub fn with_invoice_number(mut self, invoice_number: Option<u64>) -> Self {
        self.invoice_number = invoice_number;
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.trim().to_string();
        self
    }

    pub fn add_line_item(&mut self, item: LineItem) {
        self.line_items.push(item);
        self.recalc_totals();
    }

    pub fn extend_line_items(&mut self, items: impl IntoIterator<Item = LineItem>) {
        self.line_items.extend(items);
        self.recalc_totals();
    }

    pub fn set_tax_rate(&mut self, tax_rate: f64) {
        self.tax_rate = tax_rate;
        self.recalc_totals();
    }

    /// subtotal = Σ amount, tax = subtotal × rate, all rounded to cents
    pub fn recalc_totals(&mut self) {
        let subtotal = round_cents(self.line_items.iter().map(|li| li.amount).sum());
        let tax = round_cents(subtotal * self.tax_rate);
        self.totals = InvoiceTotals {
            subtotal,
            tax,
            total: round_cents(subtotal + tax),
        };
    }

    /// Bill-to from the client owning the first line item that names a known site
    ///
    /// A line's site path wins over its description, which is ambiguous
    /// when sites share a name.
    pub fn infer_bill_to(&mut self, matcher: &OrganizationMatcher<'_>) -> Option<&BillTo> {
        let site = self.line_items.iter().find_map(|li| {
            li.site_path
                .as_deref()
                .and_then(|p| matcher.find_path(p))
                .or_else(|| matcher.find_label(&li.description))
        })?;

        tracing::debug!(client = %site.client.name, "inferred bill-to");
        self.bill_to = Some(BillTo {
            name: site.client.name.clone(),
            address: site.client.address.clone(),
            contact: site.client.contact.clone(),
        });
        self.bill_to.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Client, Division, OrganizationRegistry, Site};

    fn may() -> BillingPeriod {
        BillingPeriod::new(2025, 5).unwrap()
    }

    #[test]
    fn test_totals_follow_line_items() {
        let mut inv = Invoice::new(may(), 0.0);
        inv.add_line_item(LineItem::new("Lobby VOICE", 336, 0.14));
        inv.add_line_item(LineItem::new("Lobby SMS", 10, 0.14));

        assert_eq!(inv.totals.subtotal, 48.44);
        assert_eq!(inv.totals.tax, 0.0);
        assert_eq!(inv.totals.total, 48.44);
    }

    #[test]
    fn test_tax_rate() {
        let mut inv = Invoice::new(may(), 0.0);
        inv.add_line_item(LineItem::new("Lobby VOICE", 100, 1.0));
        inv.set_tax_rate(0.0725);

        assert_eq!(inv.totals.subtotal, 100.0);
        assert_eq!(inv.totals.tax, 7.25);
        assert_eq!(inv.totals.total, 107.25);
    }

    #[test]
    fn test_invoice_ids_are_unique() {
        assert_ne!(Invoice::new(may(), 0.0).id, Invoice::new(may(), 0.0).id);
    }

    #[test]
    fn test_invoice_metadata() {
        let issued = NaiveDate::from_ymd_opt(2025, 9, 16).unwrap();
        let inv = Invoice::new(may(), 0.0)
            .with_invoice_number(Some(24))
            .with_date(issued)
            .with_notes("  Net 30 ");

        assert_eq!(inv.invoice_number, Some(24));
        assert_eq!(inv.notes, "Net 30");

        let json = serde_json::to_value(&inv).unwrap();
        assert_eq!(json["type"], "monthly");
        assert_eq!(json["date"], "2025-09-16");
        assert_eq!(json["invoice_number"], 24);
        assert_eq!(json["id"], inv.id.to_string());

        let back: Invoice = serde_json::from_value(json).unwrap();
        assert_eq!(back.date, issued);
        assert_eq!(back.id, inv.id);
    }

    #[test]
    fn test_infer_bill_to() {
        let reg = OrganizationRegistry::new(vec![Client {
            name: "Sante Foundation Medical Group".to_string(),
            address: "7370 N Palm Ave STE 101".to_string(),
            contact: "billing@client.com".to_string(),
            divisions: vec![Division {
                name: "Fresno".to_string(),
                sites: vec![Site::new("CCHLS", "555-000-9990")],
            }],
        }]);
        let matcher = OrganizationMatcher::new(&reg);

        let mut inv = Invoice::new(may(), 0.0);
        inv.add_line_item(LineItem::new("Unassigned VOICE", 3, 0.14));
        inv.add_line_item(LineItem::new("CCHLS VOICE (-9990)", 336, 0.14));

        let bill_to = inv.infer_bill_to(&matcher).unwrap();
        assert_eq!(bill_to.name, "Sante Foundation Medical Group");
        assert_eq!(bill_to.contact, "billing@client.com");
    }

    #[test]
    fn test_infer_bill_to_without_known_sites() {
        let reg = OrganizationRegistry::default();
        let matcher = OrganizationMatcher::new(&reg);
        let mut inv = Invoice::new(may(), 0.0);
        inv.add_line_item(LineItem::new("Unassigned VOICE", 3, 0.14));

        assert!(inv.infer_bill_to(&matcher).is_none());
        assert!(inv.bill_to.is_none());
    }

    #[test]
    fn test_infer_bill_to_by_site_path() {
        let front_desk = |client: &str| Client {
            name: client.to_string(),
            address: String::new(),
            contact: String::new(),
            divisions: vec![Division {
                name: "Main".to_string(),
                sites: vec![Site::new("Front Desk", "")],
            }],
        };
        let reg = OrganizationRegistry::new(vec![front_desk("Alpha Care"), front_desk("Beta Care")]);
        let matcher = OrganizationMatcher::new(&reg);

        let mut inv = Invoice::new(may(), 0.0);
        inv.add_line_item(
            LineItem::new("Front Desk VOICE", 1, 0.14)
                .with_site_path(Some("Beta Care > Main > Front Desk".to_string())),
        );

        assert_eq!(inv.infer_bill_to(&matcher).map(|b| b.name.as_str()), Some("Beta Care"));
    }
}
