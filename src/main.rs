use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use usage_invoicing::config::{setup_logging, Cli, Command};
use usage_invoicing::{
    check_file_period, export_invoice_csv, identify_files, out_of_range_rows, run_billing,
    BillingConfig, BillingPeriod, FileStatus, OrganizationMatcher, OrganizationRegistry,
    PipelineError,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level)?;
    tracing::debug!("usage-invoicing v{}", usage_invoicing::VERSION);

    match cli.command {
        Command::Identify { registry, json, files } => {
            let registry = OrganizationRegistry::from_file(&registry)?;
            let matcher = OrganizationMatcher::new(&registry);
            let reports = identify_files(&files, &matcher);

            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for r in &reports {
                    let status = match &r.status {
                        FileStatus::Ready => "ok".to_string(),
                        FileStatus::SkippedUnknownKind => "unknown kind".to_string(),
                        FileStatus::Unreadable(e) => format!("error: {}", e),
                    };
                    println!(
                        "{:<40} {:<9} {:<16} {:<50} {}",
                        r.file_name,
                        r.kind.name(),
                        r.phone,
                        r.breadcrumb.as_deref().unwrap_or("(unassigned)"),
                        status
                    );
                }
            }
        }

        Command::Check { year, month, files } => {
            let period = BillingPeriod::new(year, month)?;
            let mut bad = Vec::new();

            for path in &files {
                match check_file_period(path, &period) {
                    Ok(check) => {
                        println!(
                            "{:<40} in={} out={} rows={}",
                            path.display(),
                            check.in_range,
                            check.out_of_range,
                            check.total
                        );
                        if !check.all_within() {
                            bad.push(path.display().to_string());
                        }
                    }
                    Err(e) => {
                        println!("{:<40} error: {}", path.display(), e);
                        bad.push(path.display().to_string());
                    }
                }
            }

            if !bad.is_empty() {
                eprintln!("\nSome files are not within {}:", period.label());
                for name in &bad {
                    eprintln!("  - {}", name);
                }
                std::process::exit(1);
            }
        }

        Command::Rows { year, month, file } => {
            let period = BillingPeriod::new(year, month)?;
            let rows = out_of_range_rows(&file, &period)
                .with_context(|| format!("Failed to check {}", file.display()))?;
            for row in &rows {
                println!("{:>6}  {}", row.row_number, row.raw_value);
            }
            println!("{} out-of-range row(s)", rows.len());
        }

        Command::Invoice {
            registry,
            year,
            month,
            overrides,
            config,
            voice_price,
            sms_price,
            tax_rate,
            invoice_number,
            date,
            notes,
            out,
            files,
        } => {
            let period = BillingPeriod::new(year, month)?;
            let registry = OrganizationRegistry::from_file(&registry)?;

            let config = match config {
                Some(path) => BillingConfig::from_file(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => BillingConfig::default(),
            }
            .with_overrides(voice_price, sms_price, tax_rate);

            let overrides = match overrides {
                Some(path) => load_overrides(&path)?,
                None => HashMap::new(),
            };

            let mut run = match run_billing(&files, &registry, period, &config, &overrides) {
                Ok(run) => run,
                Err(PipelineError::OutOfPeriod { files }) => {
                    eprintln!("Validation failed. Some files are not within {}:", period.label());
                    for name in &files {
                        eprintln!("  - {}", name);
                    }
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            };

            for failure in &run.aggregation.failures {
                eprintln!("skipped {}: {}", failure.path.display(), failure.reason);
            }

            let mut invoice = run.invoice.with_invoice_number(invoice_number);
            if let Some(date) = date {
                invoice = invoice.with_date(date);
            }
            if let Some(notes) = notes {
                invoice = invoice.with_notes(&notes);
            }
            run.invoice = invoice;

            if let Some(number) = run.invoice.invoice_number {
                println!("Invoice #{}  ({})", number, run.invoice.date);
            }
            if let Some(bill_to) = &run.invoice.bill_to {
                println!("Bill to: {}", bill_to.name);
            }
            for item in &run.invoice.line_items {
                println!(
                    "{:<50} {:>8} {:>8.2} {:>10.2}",
                    item.description, item.quantity, item.unit_price, item.amount
                );
            }
            println!("{:<50} {:>8} {:>8} {:>10.2}", "Subtotal", "", "", run.invoice.totals.subtotal);
            println!("{:<50} {:>8} {:>8} {:>10.2}", "Tax", "", "", run.invoice.totals.tax);
            println!("{:<50} {:>8} {:>8} {:>10.2}", "Total", "", "", run.invoice.totals.total);

            if let Some(out) = out {
                export_invoice_csv(&run.invoice, &out)?;
                println!("Exported CSV: {}", out.display());
            }
        }
    }

    Ok(())
}

fn load_overrides(path: &Path) -> Result<HashMap<String, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read overrides {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse overrides {}", path.display()))
}
