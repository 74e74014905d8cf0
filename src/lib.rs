//! # Invoice Reconciler
//!
//! A library for reconciling a central invoice register (R189) against the
//! satellite document sets issued by other back-office processes (QPE, SPB,
//! NFSERV and the municipal service-code extract), producing deterministic,
//! auditable divergence reports.
//!
//! ## Core Concepts
//!
//! - **Canonical records**: every source is shaped into the same party id / external id / amount record
//! - **Fill-forward**: merged spreadsheet cells are reconstructed before any row is dropped
//! - **Routing keys**: the `PREFIX-` of an external id decides which records are compared together
//! - **Divergences**: every mismatch is reported as data; only structural problems are errors
//! - **Fail-closed authorization**: a service code nobody mapped authorizes nobody
//!
//! ## Example
//!
//! ```rust,ignore
//! use invoice_reconciler::*;
//!
//! let config = ReconciliationConfig::default();
//! let ledger = normalize(&workbook, &DocumentLayout::r189(&config))?;
//!
//! let mut satellites = SatelliteSets::new();
//! satellites.insert(
//!     DocumentType::Spb,
//!     normalize(&spb_workbook, &DocumentLayout::consolidated_satellite(DocumentType::Spb))?,
//! );
//!
//! let report = reconcile(&consolidate_ledger(&ledger), &satellites, &config)?;
//! println!("{}", report.message);
//! ```

pub mod aggregate;
pub mod authorization;
pub mod columns;
pub mod config;
pub mod divergence;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod fill;
pub mod ledger;
pub mod report;
pub mod schema;
pub mod shaper;
pub mod store;
pub mod table;
pub mod taxonomy;
pub mod utils;

pub use aggregate::{aggregate, consolidate_ledger};
pub use authorization::{
    validate_authorization, AuthorizationMap, AuthorizationOutcome, AuthorizedRecord,
};
pub use columns::{require_columns, resolve_column, ColumnSpec};
pub use config::{ReconciliationConfig, ServiceAuthorization};
pub use divergence::*;
pub use engine::{GroupSummary, ReconciliationReport, Reconciler, SatelliteSets};
pub use error::{ReconciliationError, Result};
pub use extraction::{records_from_texts, ExtractedDocument, ExtractionOutcome};
pub use fill::{fill_forward, Exclusion, FillRule};
pub use ledger::{check_ledger_sites, SiteMap};
pub use report::{
    consolidated_name, divergence_report_name, divergences_to_csv, records_from_csv,
    records_to_csv,
};
pub use schema::*;
pub use shaper::{shape, DocumentLayout, RowFilter, ShapeOutcome};
pub use store::{DirectoryStore, DocumentStore, MemoryStore};
pub use table::{Cell, RawSheet, Table, Workbook};
pub use taxonomy::{routing_key, split_external_id, RoutingKey};
pub use utils::*;

use chrono::{Local, NaiveDateTime};
use log::{debug, info};

pub const DEFAULT_INPUT_FOLDER: &str = "consolidated";
pub const DEFAULT_REPORT_FOLDER: &str = "reports";

/// Shapes the layout's sheet of `workbook` into canonical records.
pub fn normalize(workbook: &Workbook, layout: &DocumentLayout) -> Result<Vec<CanonicalRecord>> {
    shaper::normalize(workbook, layout).map(|outcome| outcome.records)
}

pub fn reconcile(
    primary: &[CanonicalRecord],
    satellites: &SatelliteSets,
    config: &ReconciliationConfig,
) -> Result<ReconciliationReport> {
    engine::reconcile(primary, satellites, config)
}

/// A reconciliation report together with where it was persisted.
#[derive(Debug, Clone)]
pub struct StoredReport {
    pub report: ReconciliationReport,
    pub name: String,
    pub folder: String,
    pub stored: bool,
}

/// Wires a document store to the reconciliation core: consolidated record
/// sets are read from the input folder and timestamped reports written to
/// the report folder. Nothing is retried.
pub struct ReconciliationProcessor<S: DocumentStore> {
    config: ReconciliationConfig,
    store: S,
    input_folder: String,
    report_folder: String,
}

impl<S: DocumentStore> ReconciliationProcessor<S> {
    pub fn new(config: ReconciliationConfig, store: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            input_folder: DEFAULT_INPUT_FOLDER.to_string(),
            report_folder: DEFAULT_REPORT_FOLDER.to_string(),
        })
    }

    pub fn with_folders(mut self, input: impl Into<String>, reports: impl Into<String>) -> Self {
        self.input_folder = input.into();
        self.report_folder = reports.into();
        self
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn consolidated_file(doc_type: DocumentType) -> String {
        format!("{}.csv", consolidated_name(doc_type))
    }

    /// Persists `records` as the consolidated sheet of `doc_type`.
    pub fn save_records(&self, doc_type: DocumentType, records: &[CanonicalRecord]) -> Result<bool> {
        let bytes = records_to_csv(doc_type, records)?;
        let name = Self::consolidated_file(doc_type);
        info!("Storing {} {} records as {}", records.len(), doc_type, name);
        self.store.store(&bytes, &name, &self.input_folder)
    }

    pub fn load_records(&self, doc_type: DocumentType) -> Result<Vec<CanonicalRecord>> {
        let name = Self::consolidated_file(doc_type);
        let bytes = self
            .store
            .fetch(&name, &self.input_folder)?
            .ok_or_else(|| {
                ReconciliationError::EmptyInput(format!(
                    "{} not found in folder '{}'",
                    name, self.input_folder
                ))
            })?;
        let outcome = records_from_csv(doc_type, &bytes, &self.config)?;
        debug!(
            "Loaded {} {} records ({} rows dropped)",
            outcome.records.len(),
            doc_type,
            outcome.dropped
        );
        Ok(outcome.records)
    }

    /// Shapes a raw register workbook, folds it per invoice and site, and
    /// stores the result as `R189_consolidated`.
    pub fn consolidate_ledger_workbook(&self, workbook: &Workbook) -> Result<Vec<CanonicalRecord>> {
        let lines = normalize(workbook, &DocumentLayout::r189(&self.config))?;
        let consolidated = consolidate_ledger(&lines);
        self.save_records(DocumentType::R189, &consolidated)?;
        Ok(consolidated)
    }

    /// Extracts satellite documents from their text and stores the consolidated set.
    pub fn consolidate_documents<T: AsRef<str>>(
        &self,
        doc_type: DocumentType,
        texts: &[T],
    ) -> Result<ExtractionOutcome> {
        let outcome = records_from_texts(doc_type, texts)?;
        self.save_records(doc_type, &outcome.records)?;
        Ok(outcome)
    }

    pub fn reconcile(&self, satellite_types: &[DocumentType]) -> Result<StoredReport> {
        self.reconcile_at(satellite_types, Local::now().naive_local())
    }

    /// Loads the stored ledger and satellites, reconciles them and writes the
    /// report under a name derived from `timestamp`.
    pub fn reconcile_at(
        &self,
        satellite_types: &[DocumentType],
        timestamp: NaiveDateTime,
    ) -> Result<StoredReport> {
        let primary = self.load_records(DocumentType::R189)?;
        let mut satellites = SatelliteSets::new();
        for doc_type in satellite_types {
            satellites.insert(*doc_type, self.load_records(*doc_type)?);
        }

        let report = reconcile(&primary, &satellites, &self.config)?;
        let name = format!("{}.csv", divergence_report_name(timestamp, &report.pair));
        let stored = self
            .store
            .store(&divergences_to_csv(&report.divergences)?, &name, &self.report_folder)?;
        info!("Divergence report {} stored: {}", name, stored);

        Ok(StoredReport {
            report,
            name,
            folder: self.report_folder.clone(),
            stored,
        })
    }

    /// Site integrity of the stored ledger against the configured site map.
    pub fn check_ledger(&self) -> Result<Vec<Divergence>> {
        let primary = self.load_records(DocumentType::R189)?;
        Ok(check_ledger_sites(&primary, &SiteMap::from_config(&self.config)))
    }

    /// Authorizes the service-code extract and aggregates what passed.
    pub fn authorize_services(
        &self,
        workbook: &Workbook,
    ) -> Result<(Vec<AggregatedRecord>, Vec<Divergence>)> {
        let records = normalize(workbook, &DocumentLayout::municipality_code(&self.config))?;
        let outcome =
            validate_authorization(&records, &AuthorizationMap::from_config(&self.config));
        Ok((aggregate(&outcome.authorized), outcome.rejected))
    }
}
