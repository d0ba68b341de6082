// ⚙️ Configuration - billing prices, CLI settings, logging bootstrap

use crate::error::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// BILLING CONFIG
// ============================================================================

pub const DEFAULT_VOICE_UNIT_PRICE: f64 = 0.14;
pub const DEFAULT_SMS_UNIT_PRICE: f64 = 0.14;

fn default_voice_price() -> f64 {
    DEFAULT_VOICE_UNIT_PRICE
}

fn default_sms_price() -> f64 {
    DEFAULT_SMS_UNIT_PRICE
}

/// Prices and tax applied to a billing run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_voice_price")]
    pub voice_unit_price: f64,

    #[serde(default = "default_sms_price")]
    pub sms_unit_price: f64,

    #[serde(default)]
    pub tax_rate: f64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        BillingConfig {
            voice_unit_price: DEFAULT_VOICE_UNIT_PRICE,
            sms_unit_price: DEFAULT_SMS_UNIT_PRICE,
            tax_rate: 0.0,
        }
    }
}

impl BillingConfig {
    /// Load from a JSON file; missing keys fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// CLI flags win over file values
    pub fn with_overrides(
        mut self,
        voice_unit_price: Option<f64>,
        sms_unit_price: Option<f64>,
        tax_rate: Option<f64>,
    ) -> Self {
        if let Some(p) = voice_unit_price {
            self.voice_unit_price = p;
        }
        if let Some(p) = sms_unit_price {
            self.sms_unit_price = p;
        }
        if let Some(t) = tax_rate {
            self.tax_rate = t;
        }
        self
    }
}

// ============================================================================
// CLI
// ============================================================================

/// Turn monthly provider usage exports into invoice line items
#[derive(Parser, Debug)]
#[command(name = "usage-invoicing", version)]
pub struct Cli {
    /// Logging level
    #[arg(long, global = true, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify files and match them to registry sites
    Identify {
        /// Organization registry JSON
        #[arg(long)]
        registry: PathBuf,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,

        files: Vec<PathBuf>,
    },

    /// Count in/out-of-period rows per file
    Check {
        #[arg(long)]
        year: i32,

        #[arg(long)]
        month: u32,

        files: Vec<PathBuf>,
    },

    /// List the out-of-period rows of one file
    Rows {
        #[arg(long)]
        year: i32,

        #[arg(long)]
        month: u32,

        file: PathBuf,
    },

    /// Run the full billing pipeline and print (or export) line items
    Invoice {
        #[arg(long)]
        registry: PathBuf,

        #[arg(long)]
        year: i32,

        #[arg(long)]
        month: u32,

        /// JSON map of site label → last-4 digits
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Billing config JSON (prices, tax rate)
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        voice_price: Option<f64>,

        #[arg(long)]
        sms_price: Option<f64>,

        #[arg(long)]
        tax_rate: Option<f64>,

        /// Number printed on the invoice
        #[arg(long)]
        invoice_number: Option<u64>,

        /// Issue date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        notes: Option<String>,

        /// Write line items to this CSV
        #[arg(long)]
        out: Option<PathBuf>,

        files: Vec<PathBuf>,
    },
}

// ============================================================================
// LOGGING
// ============================================================================

/// Map a CLI level name to a tracing filter directive
pub fn level_directive(log_level: &str) -> &'static str {
    match log_level.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" | "WARN" => "warn",
        "ERROR" => "error",
        "TRACE" => "trace",
        _ => "info",
    }
}

/// Initialise the global tracing subscriber (stderr)
pub fn setup_logging(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(level_directive(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
