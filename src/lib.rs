// Usage Invoicing - Core Library
// Provider usage exports (calls + messages) → billable, labeled invoice lines
//
// Flow: classify → extract source → match site → filter period → aggregate → decorate

pub mod error;
pub mod config;
pub mod parser;       // Record classifier + source identifier extractor
pub mod entities;     // Organization registry snapshot
pub mod matcher;      // Phone / label → site
pub mod period;       // Billing period + date fallback chain
pub mod aggregator;   // COLLECT → FILTER → SUM
pub mod line_items;   // Ordering + description decoration
pub mod invoice;
pub mod pipeline;
pub mod export;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use config::BillingConfig;
pub use parser::{
    UsageKind, UsageFile, UsageParser, CallsParser, MessagesParser,
    classify_headers, normalize_header, normalize_phone, extract_source_identifier,
    billed_units_for_segments, get_parser,
};
pub use entities::{
    Client, Division, Site, MatchResult, OrganizationRegistry,
};
pub use matcher::{OrganizationMatcher, normalize_label};
pub use period::{
    BillingPeriod, PeriodCheck, OutOfRangeRow,
    parse_usage_date, check_period, find_out_of_range_rows,
};
pub use aggregator::{
    AggregationInput, AggregateRow, AggregationOutcome, BillingAggregator, FileFailure,
    UNASSIGNED_LABEL,
};
pub use line_items::{LineItem, LineItemBuilder, PhoneMap, PhoneSource, decorate, describe};
pub use invoice::{Invoice, InvoiceTotals, InvoiceType, BillTo};
pub use pipeline::{
    BillingRun, FileReport, FileStatus, FileValidation,
    identify_file, identify_files, validate_period, check_file_period, out_of_range_rows, run_billing,
};
pub use export::export_invoice_csv;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
