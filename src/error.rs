use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("Sheet '{sheet}' not found in workbook (available: {available:?})")]
    MissingSheet {
        sheet: String,
        available: Vec<String>,
    },

    #[error("Missing columns in {source_name}: {columns:?}")]
    MissingColumns {
        source_name: String,
        columns: Vec<String>,
    },

    #[error("No column found for '{logical}'. Expected one of: {candidates:?}")]
    UnresolvedColumn {
        logical: String,
        candidates: Vec<String>,
    },

    #[error("Header row {header_row} is outside sheet '{sheet}' ({rows} rows)")]
    HeaderRowOutOfRange {
        sheet: String,
        header_row: usize,
        rows: usize,
    },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Document store error: {0}")]
    StoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ReconciliationError {
    /// Structural failures that abort a whole comparison.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::MissingSheet { .. }
                | Self::MissingColumns { .. }
                | Self::UnresolvedColumn { .. }
                | Self::HeaderRowOutOfRange { .. }
                | Self::EmptyInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReconciliationError>;
