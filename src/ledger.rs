//! Integrity checks of the primary ledger on its own.

use crate::config::ReconciliationConfig;
use crate::divergence::{Divergence, DivergenceKind, ReportValue};
use crate::schema::{CanonicalRecord, DocumentType};
use crate::utils::{is_valid_party_id, normalize_party_id};
use log::info;
use std::collections::BTreeMap;

/// Party id (punctuation stripped) to the site names the ledger may carry for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteMap {
    sites: BTreeMap<String, Vec<String>>,
}

impl SiteMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_site(mut self, party_id: &str, site: &str) -> Self {
        self.insert(party_id, site);
        self
    }

    pub fn insert(&mut self, party_id: &str, site: &str) {
        let sites = self.sites.entry(normalize_party_id(party_id)).or_default();
        let site = site.trim().to_string();
        if !sites.contains(&site) {
            sites.push(site);
        }
    }

    pub fn from_config(config: &ReconciliationConfig) -> Self {
        let mut map = Self::new();
        for (party, sites) in &config.site_map {
            for site in sites {
                map.insert(party, site);
            }
        }
        map
    }

    pub fn sites_for(&self, party_id: &str) -> Option<&[String]> {
        self.sites
            .get(&normalize_party_id(party_id))
            .map(|s| s.as_slice())
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Checks every ledger record's party id shape, then its site against the
/// party's accepted sites. A malformed party id skips the site checks.
pub fn check_ledger_sites(records: &[CanonicalRecord], map: &SiteMap) -> Vec<Divergence> {
    let mut divergences = Vec::new();

    for record in records {
        if !is_valid_party_id(&record.party_id) {
            divergences.push(
                Divergence::new(DivergenceKind::InvalidPartyId, record.external_id.clone())
                    .with_values(Some(ReportValue::Text(record.party_id.clone())), None)
                    .with_detail(format!(
                        "{} row {}: party id is not in NN.NNN.NNN/NNNN-NN format",
                        DocumentType::R189,
                        record.row
                    )),
            );
            continue;
        }

        let site = record
            .site
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let Some(site) = site else {
            divergences.push(
                Divergence::new(DivergenceKind::MissingField, record.external_id.clone())
                    .with_values(Some(ReportValue::Text(record.party_id.clone())), None)
                    .with_detail(format!("{} row {} has no site", DocumentType::R189, record.row)),
            );
            continue;
        };

        let Some(accepted) = map.sites_for(&record.party_id) else {
            divergences.push(
                Divergence::new(DivergenceKind::PartyNotMapped, record.external_id.clone())
                    .with_values(Some(ReportValue::Text(record.party_id.clone())), None)
                    .with_detail(format!("party {} has no site mapping", record.party_id)),
            );
            continue;
        };

        if !accepted.iter().any(|a| a == site) {
            divergences.push(
                Divergence::new(DivergenceKind::SiteNameIncorrect, record.external_id.clone())
                    .with_values(
                        Some(ReportValue::Text(site.to_string())),
                        Some(ReportValue::Text(accepted.join(" | "))),
                    )
                    .with_detail(format!(
                        "site '{}' does not belong to party {}",
                        site, record.party_id
                    )),
            );
        }
    }

    info!(
        "Checked sites of {} ledger records: {} problems",
        records.len(),
        divergences.len()
    );
    divergences
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(id: &str, party: &str, site: Option<&str>) -> CanonicalRecord {
        let record = CanonicalRecord::new(DocumentType::R189, party, id, 1.0);
        match site {
            Some(site) => record.with_site(site),
            None => record,
        }
    }

    #[test]
    fn test_site_checks() {
        let map = SiteMap::from_config(&ReconciliationConfig::default());
        let records = vec![
            ledger("QPE-1", "07.175.725/0030-02", Some("WEL_BRGCV")),
            ledger("QPE-2", "07.175.725/0030-02", Some("WEL_BRJGS")),
            ledger("QPE-3", "11.111.111/1111-11", Some("WEL_BRGCV")),
            ledger("QPE-4", "07.175.725/0030-02", Some("  ")),
        ];
        let divergences = check_ledger_sites(&records, &map);
        let labels: Vec<(String, String)> = divergences
            .iter()
            .map(|d| (d.type_label(), d.id.clone()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("site name incorrect".to_string(), "QPE-2".to_string()),
                ("party not mapped".to_string(), "QPE-3".to_string()),
                ("missing field".to_string(), "QPE-4".to_string()),
            ]
        );
        assert_eq!(
            divergences[0].satellite_value,
            Some(ReportValue::Text("WEL_BRGCV".to_string()))
        );
    }

    #[test]
    fn test_malformed_party_id_is_reported() {
        let map = SiteMap::from_config(&ReconciliationConfig::default());
        let records = vec![
            ledger("QPE-1", "07175725003002", Some("WEL_BRGCV")),
            ledger("QPE-2", "07.175.725/0030-02", Some("WEL_BRGCV")),
        ];
        let divergences = check_ledger_sites(&records, &map);
        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].kind, DivergenceKind::InvalidPartyId);
        assert_eq!(divergences[0].id, "QPE-1");
        assert_eq!(
            divergences[0].primary_value,
            Some(ReportValue::Text("07175725003002".to_string()))
        );
    }

    #[test]
    fn test_lookup_ignores_punctuation() {
        let map = SiteMap::new().with_site("07.175.725/0030-02", "WEL_BRGCV");
        assert_eq!(
            map.sites_for("07175725003002"),
            Some(&["WEL_BRGCV".to_string()][..])
        );
    }
}
