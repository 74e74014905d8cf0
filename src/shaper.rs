use crate::columns::ColumnSpec;
use crate::config::ReconciliationConfig;
use crate::error::{ReconciliationError, Result};
use crate::fill::{fill_forward, Exclusion, FillRule};
use crate::schema::{Amount, CanonicalRecord, DocumentType};
use crate::table::{Table, Workbook};
use crate::utils::{normalize_service_code_cell, parse_amount_cell};
use log::{debug, info};

pub const LEDGER_PARTY_COLUMN: &str = "CNPJ - WEG";
pub const LEDGER_ID_COLUMN: &str = "Invoice number";
pub const LEDGER_SITE_COLUMN: &str = "Site Name - WEG 2";
pub const LEDGER_ACCOUNT_COLUMN: &str = "Account number";
pub const SERVICE_CODE_COLUMN: &str = "Municipality Code";
pub const INVOICE_TYPE_COLUMN: &str = "Invoice Type";
/// Total column written to consolidated register sheets.
pub const CONSOLIDATED_TOTAL_COLUMN: &str = "Total Geral";

/// Keeps only rows whose `column` reads exactly `equals` (after trimming).
#[derive(Debug, Clone, PartialEq)]
pub struct RowFilter {
    pub column: String,
    pub equals: String,
}

/// Where a document type keeps its data and how its columns map onto the
/// canonical record.
#[derive(Debug, Clone)]
pub struct DocumentLayout {
    pub doc_type: DocumentType,
    pub sheet: String,
    /// 1-based header row.
    pub header_row: usize,
    pub party_id: ColumnSpec,
    pub external_id: ColumnSpec,
    pub amount: ColumnSpec,
    pub site: Option<ColumnSpec>,
    /// Drop rows without a site instead of carrying `None`.
    pub site_required: bool,
    pub service_code: Option<ColumnSpec>,
    pub fill_rules: Vec<FillRule>,
    pub row_filter: Option<RowFilter>,
}

impl DocumentLayout {
    fn total_spec(config: &ReconciliationConfig) -> ColumnSpec {
        ColumnSpec::from_candidates("total", config.total_columns.clone())
    }

    /// Raw register extract: subtotal rows are marked by "Total" in the account column
    /// and must not receive a propagated invoice number.
    pub fn r189(config: &ReconciliationConfig) -> Self {
        Self {
            doc_type: DocumentType::R189,
            sheet: config.ledger_sheet.clone(),
            header_row: config.header_row,
            party_id: ColumnSpec::exact(LEDGER_PARTY_COLUMN),
            external_id: ColumnSpec::exact(LEDGER_ID_COLUMN),
            amount: Self::total_spec(config),
            site: Some(ColumnSpec::exact(LEDGER_SITE_COLUMN)),
            site_required: true,
            service_code: None,
            fill_rules: vec![
                FillRule::unless(
                    LEDGER_ID_COLUMN,
                    Exclusion::contains(LEDGER_ACCOUNT_COLUMN, "Total"),
                ),
                FillRule::always(LEDGER_PARTY_COLUMN),
                FillRule::always(LEDGER_SITE_COLUMN),
            ],
            row_filter: None,
        }
    }

    /// Municipal tax-code extract of the register, service invoices only.
    pub fn municipality_code(config: &ReconciliationConfig) -> Self {
        Self {
            doc_type: DocumentType::MunicipalityCode,
            sheet: config.ledger_sheet.clone(),
            header_row: config.header_row,
            party_id: ColumnSpec::exact(LEDGER_PARTY_COLUMN),
            external_id: ColumnSpec::exact(LEDGER_ID_COLUMN),
            amount: Self::total_spec(config),
            site: Some(ColumnSpec::exact(LEDGER_SITE_COLUMN)),
            site_required: false,
            service_code: Some(ColumnSpec::exact(SERVICE_CODE_COLUMN)),
            fill_rules: vec![
                FillRule::always(LEDGER_PARTY_COLUMN),
                FillRule::always(LEDGER_ID_COLUMN),
                FillRule::always(LEDGER_SITE_COLUMN),
            ],
            row_filter: Some(RowFilter {
                column: INVOICE_TYPE_COLUMN.to_string(),
                equals: "SRV".to_string(),
            }),
        }
    }

    /// The consolidated register sheet written after ledger consolidation.
    pub fn consolidated_ledger(config: &ReconciliationConfig) -> Self {
        Self {
            doc_type: DocumentType::R189,
            sheet: crate::report::consolidated_name(DocumentType::R189),
            header_row: 1,
            party_id: ColumnSpec::exact(LEDGER_PARTY_COLUMN),
            external_id: ColumnSpec::exact(LEDGER_ID_COLUMN),
            amount: {
                let mut candidates = vec![CONSOLIDATED_TOTAL_COLUMN.to_string()];
                candidates.extend(
                    config
                        .total_columns
                        .iter()
                        .filter(|c| c.as_str() != CONSOLIDATED_TOTAL_COLUMN)
                        .cloned(),
                );
                ColumnSpec::from_candidates("total", candidates)
            },
            site: Some(ColumnSpec::exact(LEDGER_SITE_COLUMN)),
            site_required: false,
            service_code: None,
            fill_rules: Vec::new(),
            row_filter: None,
        }
    }

    /// Consolidated sheet built from satellite PDFs: `<TYPE>_ID`, `CNPJ`, `VALOR_TOTAL`, `CIDADE`.
    pub fn consolidated_satellite(doc_type: DocumentType) -> Self {
        let id_column = format!("{}_ID", doc_type.label());
        Self {
            doc_type,
            sheet: crate::report::consolidated_name(doc_type),
            header_row: 1,
            party_id: ColumnSpec::exact("CNPJ"),
            external_id: ColumnSpec::from_candidates("id", vec![id_column]),
            amount: ColumnSpec::new("total", &["VALOR_TOTAL", "Valor Total"]),
            site: Some(ColumnSpec::exact("CIDADE")),
            site_required: false,
            service_code: None,
            fill_rules: Vec::new(),
            row_filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShapeOutcome {
    pub records: Vec<CanonicalRecord>,
    /// Rows dropped for a blank mandatory field.
    pub dropped: usize,
    /// Rows removed by the layout's row filter.
    pub filtered: usize,
}

struct ResolvedColumns {
    party_id: usize,
    external_id: usize,
    amount: usize,
    site: Option<usize>,
    service_code: Option<usize>,
    row_filter: Option<usize>,
}

fn resolve_columns(table: &Table, layout: &DocumentLayout) -> Result<ResolvedColumns> {
    let amount_name = layout.amount.resolve(table)?;
    let amount = table.column_index(amount_name).unwrap_or_default();

    let mut missing = Vec::new();
    let mut index_of = |spec: &ColumnSpec| -> Option<usize> {
        match spec.resolve(table) {
            Ok(name) => table.column_index(name),
            Err(_) => {
                missing.push(spec.candidates.join(" | "));
                None
            }
        }
    };

    let party_id = index_of(&layout.party_id);
    let external_id = index_of(&layout.external_id);
    let site = match &layout.site {
        Some(spec) if layout.site_required => index_of(spec),
        Some(spec) => spec
            .resolve(table)
            .ok()
            .and_then(|name| table.column_index(name)),
        None => None,
    };
    let service_code = layout.service_code.as_ref().and_then(&mut index_of);
    let row_filter = layout
        .row_filter
        .as_ref()
        .and_then(|f| index_of(&ColumnSpec::exact(&f.column)));

    if !missing.is_empty() {
        return Err(ReconciliationError::MissingColumns {
            source_name: layout.doc_type.label().to_string(),
            columns: missing,
        });
    }

    Ok(ResolvedColumns {
        party_id: party_id.unwrap_or_default(),
        external_id: external_id.unwrap_or_default(),
        amount,
        site,
        service_code,
        row_filter,
    })
}

/// Projects a table onto canonical records. Rows missing a mandatory field
/// after fill-forward are dropped and counted, never reported.
pub fn shape(mut table: Table, layout: &DocumentLayout) -> Result<ShapeOutcome> {
    let columns = resolve_columns(&table, layout)?;
    fill_forward(&mut table, &layout.fill_rules)?;

    let mut outcome = ShapeOutcome::default();

    for row in 0..table.len() {
        if let (Some(filter), Some(idx)) = (&layout.row_filter, columns.row_filter) {
            if table.cell(row, idx).as_text().as_deref() != Some(filter.equals.as_str()) {
                outcome.filtered += 1;
                continue;
            }
        }

        let party_id = table.cell(row, columns.party_id).as_text();
        let external_id = table.cell(row, columns.external_id).as_text();
        let amount_cell = table.cell(row, columns.amount);
        let site = columns.site.and_then(|idx| table.cell(row, idx).as_text());
        let service_code = columns
            .service_code
            .map(|idx| normalize_service_code_cell(table.cell(row, idx)));

        let (party_id, external_id) = match (party_id, external_id) {
            (Some(p), Some(e)) if !amount_cell.is_blank() => (p, e),
            _ => {
                outcome.dropped += 1;
                continue;
            }
        };
        if layout.site_required && site.is_none() {
            outcome.dropped += 1;
            continue;
        }
        if let Some(None) = service_code {
            outcome.dropped += 1;
            continue;
        }

        let amount = match parse_amount_cell(amount_cell) {
            Some(value) => Amount::Value(value),
            None => Amount::Invalid(amount_cell.to_string()),
        };

        outcome.records.push(CanonicalRecord {
            source: layout.doc_type,
            row,
            party_id,
            external_id,
            amount,
            site,
            service_code: service_code.flatten(),
        });
    }

    debug!(
        "{}: {} rows dropped for missing mandatory fields, {} filtered out",
        layout.doc_type, outcome.dropped, outcome.filtered
    );

    Ok(outcome)
}

/// Loads the layout's sheet from the workbook and shapes it.
pub fn normalize(workbook: &Workbook, layout: &DocumentLayout) -> Result<ShapeOutcome> {
    info!(
        "Normalizing {} from sheet '{}' (header row {})",
        layout.doc_type, layout.sheet, layout.header_row
    );
    let table = workbook.table(&layout.sheet, layout.header_row)?;
    let outcome = shape(table, layout)?;
    info!(
        "{}: {} canonical records produced",
        layout.doc_type,
        outcome.records.len()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Cell, RawSheet};

    fn ledger_table(rows: &[[&str; 5]]) -> Table {
        Table::new(
            vec![
                LEDGER_PARTY_COLUMN.to_string(),
                LEDGER_ID_COLUMN.to_string(),
                LEDGER_SITE_COLUMN.to_string(),
                "Grand Total".to_string(),
                LEDGER_ACCOUNT_COLUMN.to_string(),
            ],
            rows.iter()
                .map(|r| r.iter().map(|c| Cell::from(*c)).collect())
                .collect(),
        )
    }

    #[test]
    fn test_r189_merged_cells_are_reconstructed() {
        let config = ReconciliationConfig::default();
        let table = ledger_table(&[
            ["07.175.725/0030-02", "QPE-1", "WEL_BRGCV", "100,00", "4410"],
            ["", "", "", "50,00", "4411"],
            ["", "", "", "150,00", "Total 4410"],
            ["", "SPB-9", "", "10,00", "4410"],
        ]);

        let outcome = shape(table, &DocumentLayout::r189(&config)).unwrap();
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.dropped, 1);

        let second = &outcome.records[1];
        assert_eq!(second.external_id, "QPE-1");
        assert_eq!(second.party_id, "07.175.725/0030-02");
        assert_eq!(second.amount, Amount::Value(50.0));

        let last = &outcome.records[2];
        assert_eq!(last.external_id, "SPB-9");
        assert_eq!(last.site.as_deref(), Some("WEL_BRGCV"));
        assert_eq!(last.row, 3);
    }

    #[test]
    fn test_unparseable_amount_is_carried() {
        let config = ReconciliationConfig::default();
        let table = ledger_table(&[["07.175.725/0030-02", "QPE-1", "WEL_BRGCV", "n/a", "1"]]);
        let outcome = shape(table, &DocumentLayout::r189(&config)).unwrap();
        assert_eq!(outcome.records[0].amount, Amount::Invalid("n/a".to_string()));
    }

    #[test]
    fn test_missing_total_column_is_schema_error() {
        let config = ReconciliationConfig::default();
        let table = Table::new(
            vec![LEDGER_PARTY_COLUMN.to_string(), LEDGER_ID_COLUMN.to_string()],
            vec![],
        );
        let err = shape(table, &DocumentLayout::r189(&config)).unwrap_err();
        assert!(err.is_schema_error());
        assert!(matches!(err, ReconciliationError::UnresolvedColumn { .. }));
    }

    #[test]
    fn test_municipality_code_keeps_service_rows() {
        let config = ReconciliationConfig::default();
        let table = Table::new(
            vec![
                LEDGER_PARTY_COLUMN.to_string(),
                LEDGER_ID_COLUMN.to_string(),
                SERVICE_CODE_COLUMN.to_string(),
                INVOICE_TYPE_COLUMN.to_string(),
                LEDGER_SITE_COLUMN.to_string(),
                "Total Geral".to_string(),
            ],
            vec![
                vec![
                    Cell::text("07.175.725/0030-02"),
                    Cell::text("NFSERV-1"),
                    Cell::Number(3115.0),
                    Cell::text("SRV"),
                    Cell::text("WEL_BRGCV"),
                    Cell::Number(20.0),
                ],
                vec![
                    Cell::Empty,
                    Cell::Empty,
                    Cell::text("14.02 - Assistência Técnica"),
                    Cell::text("SRV"),
                    Cell::Empty,
                    Cell::Number(5.5),
                ],
                vec![
                    Cell::Empty,
                    Cell::text("MAT-7"),
                    Cell::Number(3115.0),
                    Cell::text("MAT"),
                    Cell::Empty,
                    Cell::Number(1.0),
                ],
            ],
        );

        let outcome = shape(table, &DocumentLayout::municipality_code(&config)).unwrap();
        assert_eq!(outcome.filtered, 1);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].service_code.as_deref(), Some("3115"));
        assert_eq!(outcome.records[1].service_code.as_deref(), Some("14"));
        assert_eq!(outcome.records[1].external_id, "NFSERV-1");
    }

    #[test]
    fn test_normalize_reads_named_sheet_at_header_row() {
        let config = ReconciliationConfig::default();
        let mut rows: Vec<Vec<Cell>> = (0..12).map(|_| vec![Cell::text("noise")]).collect();
        rows.push(
            [LEDGER_PARTY_COLUMN, LEDGER_ID_COLUMN, LEDGER_SITE_COLUMN, "Total Geral", LEDGER_ACCOUNT_COLUMN]
                .iter()
                .map(|c| Cell::text(*c))
                .collect(),
        );
        rows.push(
            ["07.175.725/0030-02", "SPB-1", "WEL_BRGCV", "1.234,56", "1"]
                .iter()
                .map(|c| Cell::text(*c))
                .collect(),
        );
        let workbook = Workbook::new().with_sheet("BRASIL", RawSheet::new(rows));

        let outcome = normalize(&workbook, &DocumentLayout::r189(&config)).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].amount, Amount::Value(1234.56));

        let other = Workbook::new().with_sheet("Plan1", RawSheet::default());
        let err = normalize(&other, &DocumentLayout::r189(&config)).unwrap_err();
        assert!(matches!(err, ReconciliationError::MissingSheet { .. }));
    }
}
