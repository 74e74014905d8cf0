use crate::schema::{Amount, CanonicalRecord, DocumentType};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "kind", content = "key")]
pub enum DivergenceKind {
    /// Always-present per-group record count, rendered as `COUNT_<key>`.
    Count(String),
    NotFoundInPrimary,
    NotFoundInSatellite,
    PartyIdDivergent,
    AmountDivergent,
    ValueValidationError,
    InvalidPartyId,
    PartyNotAuthorized,
    SiteNameIncorrect,
    PartyNotMapped,
    MissingField,
}

impl DivergenceKind {
    pub fn label(&self) -> String {
        match self {
            DivergenceKind::Count(key) => format!("COUNT_{}", key),
            DivergenceKind::NotFoundInPrimary => "id not found in primary".to_string(),
            DivergenceKind::NotFoundInSatellite => "id not found in satellite".to_string(),
            DivergenceKind::PartyIdDivergent => "party id divergent".to_string(),
            DivergenceKind::AmountDivergent => "amount divergent".to_string(),
            DivergenceKind::ValueValidationError => "value validation error".to_string(),
            DivergenceKind::InvalidPartyId => "invalid party id".to_string(),
            DivergenceKind::PartyNotAuthorized => "party not authorized for service".to_string(),
            DivergenceKind::SiteNameIncorrect => "site name incorrect".to_string(),
            DivergenceKind::PartyNotMapped => "party not mapped".to_string(),
            DivergenceKind::MissingField => "missing field".to_string(),
        }
    }

    pub fn is_count(&self) -> bool {
        matches!(self, DivergenceKind::Count(_))
    }
}

impl fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A value shown on either side of a divergence row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ReportValue {
    Count(usize),
    Amount(f64),
    Text(String),
}

impl From<&Amount> for ReportValue {
    fn from(amount: &Amount) -> Self {
        match amount {
            Amount::Value(v) => ReportValue::Amount(*v),
            Amount::Invalid(raw) => ReportValue::Text(raw.clone()),
        }
    }
}

impl fmt::Display for ReportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportValue::Count(n) => write!(f, "{}", n),
            ReportValue::Amount(v) => write!(f, "{:.2}", v),
            ReportValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Divergence {
    pub kind: DivergenceKind,
    pub id: String,
    /// Satellite document type the row is attributed to, if any.
    pub source: Option<DocumentType>,
    pub primary_value: Option<ReportValue>,
    pub satellite_value: Option<ReportValue>,
    pub detail: String,
}

impl Divergence {
    pub fn new(kind: DivergenceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            source: None,
            primary_value: None,
            satellite_value: None,
            detail: String::new(),
        }
    }

    pub fn count(key: &str, primary: usize, satellite: usize) -> Self {
        Self::new(DivergenceKind::Count(key.to_string()), "N/A")
            .with_values(
                Some(ReportValue::Count(primary)),
                Some(ReportValue::Count(satellite)),
            )
            .with_detail(format!(
                "{} distinct ids in primary, {} in satellite",
                primary, satellite
            ))
    }

    pub fn with_source(mut self, source: DocumentType) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_values(
        mut self,
        primary_value: Option<ReportValue>,
        satellite_value: Option<ReportValue>,
    ) -> Self {
        self.primary_value = primary_value;
        self.satellite_value = satellite_value;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// A row describing a record with no counterpart or with a bad value, sourced from one side.
    pub fn for_record(kind: DivergenceKind, record: &CanonicalRecord, primary_side: bool) -> Self {
        let value = Some(ReportValue::from(&record.amount));
        let (primary_value, satellite_value) = if primary_side {
            (value, None)
        } else {
            (None, value)
        };
        let mut divergence =
            Self::new(kind, record.external_id.clone()).with_values(primary_value, satellite_value);
        if !primary_side {
            divergence.source = Some(record.source);
        }
        divergence
    }

    pub fn type_label(&self) -> String {
        self.kind.label()
    }
}

/// Per-type counts, ordered by label, excluding the count rows.
pub fn count_by_type(divergences: &[Divergence]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for divergence in divergences.iter().filter(|d| !d.kind.is_count()) {
        *counts.entry(divergence.type_label()).or_insert(0) += 1;
    }
    counts
}

/// Human-readable outcome line handed to the caller alongside the rows.
pub fn summarize(divergences: &[Divergence]) -> String {
    let counts = count_by_type(divergences);
    if counts.is_empty() {
        return "No divergences found".to_string();
    }

    let total: usize = counts.values().sum();
    let mut message = format!("Found {} divergences:", total);
    for (label, count) in counts {
        message.push_str(&format!("\n- {}: {}", label, count));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(DivergenceKind::Count("SPB".into()).label(), "COUNT_SPB");
        assert_eq!(
            DivergenceKind::NotFoundInPrimary.to_string(),
            "id not found in primary"
        );
        assert_eq!(
            DivergenceKind::PartyNotAuthorized.label(),
            "party not authorized for service"
        );
    }

    #[test]
    fn test_summary_ignores_count_rows() {
        let rows = vec![Divergence::count("QPE", 2, 2)];
        assert_eq!(summarize(&rows), "No divergences found");

        let rows = vec![
            Divergence::count("QPE", 2, 1),
            Divergence::new(DivergenceKind::NotFoundInSatellite, "QPE-1"),
            Divergence::new(DivergenceKind::AmountDivergent, "QPE-2"),
            Divergence::new(DivergenceKind::NotFoundInSatellite, "QPE-3"),
        ];
        let message = summarize(&rows);
        assert!(message.starts_with("Found 3 divergences:"));
        assert!(message.contains("- id not found in satellite: 2"));
        assert!(message.contains("- amount divergent: 1"));
    }

    #[test]
    fn test_report_value_rendering() {
        assert_eq!(ReportValue::Amount(10.0).to_string(), "10.00");
        assert_eq!(ReportValue::Count(3).to_string(), "3");
        assert_eq!(
            ReportValue::from(&Amount::Invalid("abc".into())).to_string(),
            "abc"
        );
    }
}
