//! Pattern rules that pull canonical fields out of the plain text of satellite
//! documents. Turning PDF bytes into text is left to the caller.

use crate::divergence::{Divergence, DivergenceKind};
use crate::error::{ReconciliationError, Result};
use crate::schema::{Amount, CanonicalRecord, DocumentType};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const PARTY_PATTERN: &str = r"\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}";

fn qpe_party_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?s)TOMADOR DE SERVIÇOS.*?\n.*?({})", PARTY_PATTERN))
            .expect("qpe party regex")
    })
}

fn spb_party_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?s)TOMADOR DE SERVIÇOS.*?\n.*?CPF/CNPJ:\s*({})",
            PARTY_PATTERN
        ))
        .expect("spb party regex")
    })
}

fn nfserv_party_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"CNPJ:\s*({})", PARTY_PATTERN)).expect("nfserv party regex")
    })
}

fn qpe_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(QPE-\d+)").expect("qpe id regex"))
}

fn spb_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(SPB-\d+)").expect("spb id regex"))
}

/// Control numbers may carry a `XXX_` system prefix that is not part of the id.
fn nfserv_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"N\.\s*CONTROLE:\s*(?:[A-Z]{3}_)?([A-Z]{3}-\d{6})").expect("nfserv id regex")
    })
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"VALOR DO DOCUMENTO\s*([\d.,]+)").expect("amount regex"))
}

fn qpe_city_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r".*,\s*([A-Z\s]+)\s*-").expect("qpe city regex"))
}

fn spb_city_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"CEP:\s*\d{5}-\d{3}\s*(.*?)\s*INTERMEDIÁRIO DE SERVIÇOS")
            .expect("spb city regex")
    })
}

fn nfserv_city_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"CIDADE\s+([A-ZÀ-Ú\s]+)\s+ESTADO").expect("nfserv city regex"))
}

fn qpe_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"GERADOR(\d{7})").expect("qpe number regex"))
}

fn spb_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Código de Verificação(0000\d{5})").expect("spb number regex"))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Document totals are always printed Brazilian style: `.` groups thousands, `,` is decimal.
fn parse_document_amount(raw: &str) -> Amount {
    raw.replace('.', "")
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Amount::Value)
        .unwrap_or_else(|| Amount::Invalid(raw.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub doc_type: DocumentType,
    pub party_id: Option<String>,
    pub external_id: Option<String>,
    pub amount: Amount,
    pub city: Option<String>,
    /// Invoice or verification number printed on the document, when present.
    pub document_number: Option<String>,
}

impl ExtractedDocument {
    pub fn extract(doc_type: DocumentType, text: &str) -> Result<Self> {
        let (party_re, id_re, city_re, number_re) = match doc_type {
            DocumentType::Qpe => (qpe_party_re(), qpe_id_re(), qpe_city_re(), Some(qpe_number_re())),
            DocumentType::Spb => (spb_party_re(), spb_id_re(), spb_city_re(), Some(spb_number_re())),
            DocumentType::Nfserv => (nfserv_party_re(), nfserv_id_re(), nfserv_city_re(), None),
            other => {
                return Err(ReconciliationError::InvalidConfig(format!(
                    "{} is not extracted from document text",
                    other
                )))
            }
        };

        let mut city = capture(city_re, text);
        if doc_type == DocumentType::Spb {
            city = city
                .map(|c| c.trim_end_matches('-').trim().to_string())
                .filter(|c| !c.is_empty());
        }

        let amount = match capture(amount_re(), text) {
            Some(raw) => parse_document_amount(&raw),
            None => Amount::missing(),
        };

        let document = Self {
            doc_type,
            party_id: capture(party_re, text),
            external_id: capture(id_re, text),
            amount,
            city,
            document_number: number_re.and_then(|re| capture(re, text)),
        };
        debug!("Extracted {:?}", document);
        Ok(document)
    }

    /// Documents without an id or a party cannot be reconciled and become a
    /// validation divergence instead.
    pub fn into_record(self, row: usize) -> std::result::Result<CanonicalRecord, Divergence> {
        let reference = self
            .external_id
            .clone()
            .or_else(|| self.document_number.clone())
            .unwrap_or_else(|| format!("{} document {}", self.doc_type, row));

        let missing: Vec<&str> = [
            ("external id", self.external_id.is_none()),
            ("party id", self.party_id.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();

        match (self.party_id, self.external_id) {
            (Some(party_id), Some(external_id)) => Ok(CanonicalRecord {
                source: self.doc_type,
                row,
                party_id,
                external_id,
                amount: self.amount,
                site: self.city,
                service_code: None,
            }),
            _ => Err(Divergence::new(DivergenceKind::ValueValidationError, reference)
                .with_source(self.doc_type)
                .with_detail(format!("could not extract {}", missing.join(" and ")))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionOutcome {
    pub records: Vec<CanonicalRecord>,
    pub rejected: Vec<Divergence>,
}

/// Extracts one record per document text, in input order.
pub fn records_from_texts<S: AsRef<str>>(
    doc_type: DocumentType,
    texts: &[S],
) -> Result<ExtractionOutcome> {
    let mut outcome = ExtractionOutcome::default();
    for (row, text) in texts.iter().enumerate() {
        match ExtractedDocument::extract(doc_type, text.as_ref())?.into_record(row) {
            Ok(record) => outcome.records.push(record),
            Err(divergence) => {
                warn!("{}: {}", divergence.id, divergence.detail);
                outcome.rejected.push(divergence);
            }
        }
    }
    info!(
        "Extracted {} {} records from {} documents ({} rejected)",
        outcome.records.len(),
        doc_type,
        texts.len(),
        outcome.rejected.len()
    );
    Ok(outcome)
}
