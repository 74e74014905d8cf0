use crate::config::ReconciliationConfig;
use crate::divergence::Divergence;
use crate::error::{ReconciliationError, Result};
use crate::schema::{CanonicalRecord, DocumentType};
use crate::shaper::{
    normalize, DocumentLayout, ShapeOutcome, CONSOLIDATED_TOTAL_COLUMN, LEDGER_ID_COLUMN,
    LEDGER_PARTY_COLUMN, LEDGER_SITE_COLUMN,
};
use crate::table::{RawSheet, Workbook};
use chrono::NaiveDateTime;

pub const DIVERGENCE_COLUMNS: [&str; 6] = [
    "type",
    "id",
    "source",
    "primary_value",
    "satellite_value",
    "detail",
];

/// Name of the single-sheet workbook holding a document type's canonical records.
pub fn consolidated_name(doc_type: DocumentType) -> String {
    format!("{}_consolidated", doc_type.label())
}

/// `<YYYYmmdd_HHMMSS>_divergences_<pair>`. Every run gets a fresh name.
pub fn divergence_report_name(timestamp: NaiveDateTime, pair: &str) -> String {
    format!("{}_divergences_{}", timestamp.format("%Y%m%d_%H%M%S"), pair)
}

fn consolidated_columns(doc_type: DocumentType) -> Result<[String; 4]> {
    match doc_type {
        DocumentType::R189 => Ok([
            LEDGER_ID_COLUMN.to_string(),
            LEDGER_PARTY_COLUMN.to_string(),
            LEDGER_SITE_COLUMN.to_string(),
            CONSOLIDATED_TOTAL_COLUMN.to_string(),
        ]),
        DocumentType::Qpe | DocumentType::Spb | DocumentType::Nfserv => Ok([
            format!("{}_ID", doc_type.label()),
            "CNPJ".to_string(),
            "CIDADE".to_string(),
            "VALOR_TOTAL".to_string(),
        ]),
        DocumentType::MunicipalityCode => Err(ReconciliationError::InvalidConfig(
            "municipality code extracts have no consolidated sheet".to_string(),
        )),
    }
}

pub fn divergences_to_csv(divergences: &[Divergence]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(DIVERGENCE_COLUMNS)?;

    for divergence in divergences {
        writer.write_record([
            divergence.type_label(),
            divergence.id.clone(),
            divergence
                .source
                .map(|s| s.label().to_string())
                .unwrap_or_default(),
            divergence
                .primary_value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            divergence
                .satellite_value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            divergence.detail.clone(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ReconciliationError::IoError(e.into_error()))
}

/// Writes records as the consolidated sheet of their document type.
pub fn records_to_csv(doc_type: DocumentType, records: &[CanonicalRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(consolidated_columns(doc_type)?)?;

    for record in records {
        writer.write_record([
            record.external_id.as_str(),
            record.party_id.as_str(),
            record.site.as_deref().unwrap_or_default(),
            record.amount.to_string().as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ReconciliationError::IoError(e.into_error()))
}

/// Reads a consolidated sheet written by [`records_to_csv`] back into records.
pub fn records_from_csv(
    doc_type: DocumentType,
    bytes: &[u8],
    config: &ReconciliationConfig,
) -> Result<ShapeOutcome> {
    let layout = match doc_type {
        DocumentType::R189 => DocumentLayout::consolidated_ledger(config),
        DocumentType::MunicipalityCode => {
            return Err(ReconciliationError::InvalidConfig(
                "municipality code extracts have no consolidated sheet".to_string(),
            ))
        }
        satellite => DocumentLayout::consolidated_satellite(satellite),
    };

    let workbook = Workbook::new().with_sheet(layout.sheet.clone(), RawSheet::from_csv_reader(bytes)?);
    normalize(&workbook, &layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::divergence::{DivergenceKind, ReportValue};
    use crate::schema::Amount;
    use chrono::NaiveDate;

    #[test]
    fn test_names() {
        assert_eq!(consolidated_name(DocumentType::Spb), "SPB_consolidated");
        assert_eq!(consolidated_name(DocumentType::R189), "R189_consolidated");

        let ts = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap();
        assert_eq!(
            divergence_report_name(ts, "spb_r189"),
            "20240307_090501_divergences_spb_r189"
        );
    }

    #[test]
    fn test_divergence_csv_layout() {
        let rows = vec![
            Divergence::count("SPB", 2, 1),
            Divergence::new(DivergenceKind::AmountDivergent, "SPB-1")
                .with_source(DocumentType::Spb)
                .with_values(Some(ReportValue::Amount(10.0)), Some(ReportValue::Amount(12.5)))
                .with_detail("amount differs"),
        ];
        let csv = String::from_utf8(divergences_to_csv(&rows).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "type,id,source,primary_value,satellite_value,detail");
        assert!(lines[1].starts_with("COUNT_SPB,N/A,,2,1,"));
        assert_eq!(lines[2], "amount divergent,SPB-1,SPB,10.00,12.50,amount differs");
    }

    #[test]
    fn test_consolidated_sheet_reads_back() {
        let config = ReconciliationConfig::default();
        let records = vec![
            CanonicalRecord::new(DocumentType::Qpe, "07.175.725/0030-02", "QPE-1", 1234.5)
                .with_site("GRAVATAI"),
            CanonicalRecord::new(DocumentType::Qpe, "60.621.141/0005-87", "QPE-2", 0.0)
                .with_amount(Amount::Invalid("abc".to_string()))
                .with_row(1),
        ];
        let bytes = records_to_csv(DocumentType::Qpe, &records).unwrap();
        let outcome = records_from_csv(DocumentType::Qpe, &bytes, &config).unwrap();
        assert_eq!(outcome.records, records);
    }

    #[test]
    fn test_amounts_keep_full_precision_in_sheets() {
        let config = ReconciliationConfig::default();
        let records = vec![
            CanonicalRecord::new(DocumentType::Spb, "07.175.725/0030-02", "SPB-1", 100.004),
            CanonicalRecord::new(DocumentType::Spb, "07.175.725/0030-02", "SPB-2", 0.1 + 0.2)
                .with_row(1),
        ];
        let bytes = records_to_csv(DocumentType::Spb, &records).unwrap();
        let outcome = records_from_csv(DocumentType::Spb, &bytes, &config).unwrap();
        assert_eq!(outcome.records, records);
    }

    #[test]
    fn test_missing_amount_survives_the_sheet() {
        let config = ReconciliationConfig::default();
        let records = vec![
            CanonicalRecord::new(DocumentType::Nfserv, "07.175.725/0030-02", "NFS-1", 0.0)
                .with_amount(Amount::missing()),
            CanonicalRecord::new(DocumentType::Nfserv, "07.175.725/0030-02", "NFS-2", 0.0)
                .with_amount(Amount::Invalid(String::new()))
                .with_row(1),
        ];
        let bytes = records_to_csv(DocumentType::Nfserv, &records).unwrap();
        let outcome = records_from_csv(DocumentType::Nfserv, &bytes, &config).unwrap();
        assert_eq!(outcome.dropped, 0);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome
            .records
            .iter()
            .all(|r| r.amount == Amount::missing()));
    }

    #[test]
    fn test_ledger_sheet_reads_back() {
        let config = ReconciliationConfig::default();
        let records = vec![
            CanonicalRecord::new(DocumentType::R189, "07.175.725/0030-02", "QPE-1", 10.25)
                .with_site("WEL_BRGCV"),
        ];
        let bytes = records_to_csv(DocumentType::R189, &records).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("Invoice number,CNPJ - WEG,Site Name - WEG 2,Total Geral"));
        let outcome = records_from_csv(DocumentType::R189, &bytes, &config).unwrap();
        assert_eq!(outcome.records, records);
    }
}
