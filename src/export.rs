// 📤 CSV export adapter
//
// The only export adapter implemented here. Template filling and PDF
// rendering live outside this crate and consume the same Invoice.

use crate::error::{PipelineError, Result};
use crate::invoice::Invoice;
use csv::Writer;
use std::path::Path;

/// Write the header block, `Description,Qty,Unit Price,Amount` rows, then totals
pub fn export_invoice_csv(invoice: &Invoice, path: &Path) -> Result<()> {
    let to_err = |source: csv::Error| PipelineError::Export {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = Writer::from_path(path).map_err(to_err)?;
    write_invoice(&mut writer, invoice).map_err(to_err)?;
    writer.flush()?;

    tracing::info!(
        path = %path.display(),
        items = invoice.line_items.len(),
        total = invoice.totals.total,
        "exported invoice csv"
    );
    Ok(())
}

fn write_invoice<W: std::io::Write>(writer: &mut Writer<W>, invoice: &Invoice) -> csv::Result<()> {
    // every record is four fields wide
    let mut header = Vec::new();
    if let Some(number) = invoice.invoice_number {
        header.push(("Invoice Number", number.to_string()));
    }
    header.push(("Date", invoice.date.format("%-m/%-d/%Y").to_string()));
    header.push(("Period", invoice.period.label()));
    if let Some(bill_to) = &invoice.bill_to {
        header.push(("Bill To", bill_to.name.clone()));
    }
    if !invoice.notes.is_empty() {
        header.push(("Notes", invoice.notes.clone()));
    }
    for (label, value) in header {
        writer.write_record([label.to_string(), value, String::new(), String::new()])?;
    }

    writer.write_record(["Description", "Qty", "Unit Price", "Amount"])?;

    for item in &invoice.line_items {
        writer.write_record([
            item.description.clone(),
            item.quantity.to_string(),
            format!("{:.2}", item.unit_price),
            format!("{:.2}", item.amount),
        ])?;
    }

    let totals = [
        ("Subtotal", invoice.totals.subtotal),
        ("Tax", invoice.totals.tax),
        ("Total", invoice.totals.total),
    ];
    for (label, value) in totals {
        writer.write_record([label.to_string(), String::new(), String::new(), format!("{:.2}", value)])?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::BillTo;
    use crate::line_items::LineItem;
    use crate::period::BillingPeriod;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn test_export_invoice_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invoice.csv");

        let mut invoice = Invoice::new(BillingPeriod::new(2025, 5).unwrap(), 0.0)
            .with_date(NaiveDate::from_ymd_opt(2025, 9, 16).unwrap());
        invoice.add_line_item(LineItem::new("CCHLS VOICE (-9990)", 336, 0.14));

        export_invoice_csv(&invoice, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "Date,9/16/2025,,");
        assert_eq!(lines[1], "Period,2025-05,,");
        assert_eq!(lines[2], "Description,Qty,Unit Price,Amount");
        assert_eq!(lines[3], "CCHLS VOICE (-9990),336,0.14,47.04");
        assert_eq!(lines[6], "Total,,,47.04");
    }

    #[test]
    fn test_export_writes_invoice_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invoice.csv");

        let mut invoice = Invoice::new(BillingPeriod::new(2025, 8).unwrap(), 0.0)
            .with_invoice_number(Some(24))
            .with_date(NaiveDate::from_ymd_opt(2025, 9, 16).unwrap())
            .with_notes("Net 30");
        invoice.bill_to = Some(BillTo {
            name: "Sante Medical".to_string(),
            address: String::new(),
            contact: String::new(),
        });

        export_invoice_csv(&invoice, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(
            &lines[..6],
            &[
                "Invoice Number,24,,",
                "Date,9/16/2025,,",
                "Period,2025-08,,",
                "Bill To,Sante Medical,,",
                "Notes,Net 30,,",
                "Description,Qty,Unit Price,Amount",
            ]
        );
    }

    #[test]
    fn test_export_to_missing_dir_fails() {
        let invoice = Invoice::new(BillingPeriod::new(2025, 5).unwrap(), 0.0);
        let err = export_invoice_csv(&invoice, Path::new("/no/such/dir/invoice.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::Export { .. }));
    }
}
