use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    #[schemars(description = "The central invoice register (primary ledger)")]
    R189,

    #[schemars(description = "QPE service documents")]
    Qpe,

    #[schemars(description = "SPB service documents")]
    Spb,

    #[schemars(description = "NFSERV service invoices")]
    Nfserv,

    #[schemars(description = "Municipal tax-code extract of the invoice register")]
    MunicipalityCode,
}

impl DocumentType {
    pub const SATELLITES: [DocumentType; 3] =
        [DocumentType::Qpe, DocumentType::Spb, DocumentType::Nfserv];

    pub fn label(&self) -> &'static str {
        match self {
            DocumentType::R189 => "R189",
            DocumentType::Qpe => "QPE",
            DocumentType::Spb => "SPB",
            DocumentType::Nfserv => "NFSERV",
            DocumentType::MunicipalityCode => "MUNICIPALITY_CODE",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Monetary total of a record. Unparseable totals are carried, not dropped,
/// so the comparison can report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Amount {
    Value(f64),
    Invalid(String),
}

/// Written in place of an unparseable amount whose raw text was blank, so the
/// row survives a write and read of its sheet.
pub const MISSING_AMOUNT: &str = "#N/A";

impl Amount {
    /// A total that was expected but not found in the source.
    pub fn missing() -> Self {
        Amount::Invalid(MISSING_AMOUNT.to_string())
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Amount::Value(v) => Some(*v),
            Amount::Invalid(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Amount::Value(_))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Value(v) => write!(f, "{}", v),
            Amount::Invalid(raw) if raw.trim().is_empty() => f.write_str(MISSING_AMOUNT),
            Amount::Invalid(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalRecord {
    #[schemars(description = "Which document set this record came from")]
    pub source: DocumentType,

    #[schemars(description = "0-based row index in the source table, after the header")]
    pub row: usize,

    #[schemars(description = "Party identifier (CNPJ), expected as NN.NNN.NNN/NNNN-NN")]
    pub party_id: String,

    #[schemars(description = "External document id, formatted PREFIX-digits")]
    pub external_id: String,

    pub amount: Amount,

    #[serde(default)]
    #[schemars(description = "Site or location name, when the source carries one")]
    pub site: Option<String>,

    #[serde(default)]
    #[schemars(description = "Municipal service code normalized to a bare integer string")]
    pub service_code: Option<String>,
}

impl CanonicalRecord {
    pub fn new(
        source: DocumentType,
        party_id: impl Into<String>,
        external_id: impl Into<String>,
        amount: f64,
    ) -> Self {
        Self {
            source,
            row: 0,
            party_id: party_id.into(),
            external_id: external_id.into(),
            amount: Amount::Value(amount),
            site: None,
            service_code: None,
        }
    }

    pub fn with_row(mut self, row: usize) -> Self {
        self.row = row;
        self
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn with_service_code(mut self, code: impl Into<String>) -> Self {
        self.service_code = Some(code.into());
        self
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = amount;
        self
    }
}

/// One row of the grouped output: a distinct composite key with its summed total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AggregatedRecord {
    pub service_code: String,
    pub party_id: String,
    pub external_id: String,
    pub amount: f64,
    pub site: Option<String>,
    /// Number of input records folded into this row.
    pub record_count: usize,
}
