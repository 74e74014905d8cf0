use crate::config::ReconciliationConfig;
use crate::divergence::{summarize, Divergence, DivergenceKind, ReportValue};
use crate::error::{ReconciliationError, Result};
use crate::schema::{CanonicalRecord, DocumentType};
use crate::taxonomy::{has_routing_key, routing_key, RoutingKey};
use crate::utils::{amounts_match, id_key, is_valid_party_id, normalize_party_id};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Satellite record sets keyed by document type.
pub type SatelliteSets = BTreeMap<DocumentType, Vec<CanonicalRecord>>;

/// Where every id of one routing group ended up. Each id appears in exactly
/// one of the four lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub key: String,
    /// Satellite types unioned under this key, in attribution priority order.
    pub sources: Vec<DocumentType>,
    pub primary_count: usize,
    pub satellite_count: usize,
    pub matched_equal: Vec<String>,
    pub matched_divergent: Vec<String>,
    pub missing_from_primary: Vec<String>,
    pub missing_from_satellite: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Short name of the compared pair, e.g. `qpe_r189`.
    pub pair: String,
    pub divergences: Vec<Divergence>,
    pub groups: Vec<GroupSummary>,
    pub message: String,
}

impl ReconciliationReport {
    /// True when nothing but the count rows was emitted.
    pub fn is_clean(&self) -> bool {
        self.divergences.iter().all(|d| d.kind.is_count())
    }

    pub fn divergence_count(&self) -> usize {
        self.divergences.iter().filter(|d| !d.kind.is_count()).count()
    }

    pub fn of_kind<'a>(&'a self, kind: &'a DivergenceKind) -> impl Iterator<Item = &'a Divergence> {
        self.divergences.iter().filter(move |d| &d.kind == kind)
    }
}

/// Ids of one group, lowercased, mapped to every copy in priority-then-row order.
type IdIndex<'r> = BTreeMap<String, Vec<&'r CanonicalRecord>>;

fn index_by_id<'r>(records: &[&'r CanonicalRecord]) -> IdIndex<'r> {
    let mut index: IdIndex<'r> = BTreeMap::new();
    for record in records {
        index
            .entry(id_key(&record.external_id))
            .or_default()
            .push(*record);
    }
    index
}

pub fn pair_name(satellites: &SatelliteSets) -> String {
    let mut parts: Vec<String> = satellites
        .keys()
        .map(|t| t.label().to_lowercase())
        .collect();
    parts.push(DocumentType::R189.label().to_lowercase());
    parts.join("_")
}

pub struct Reconciler<'a> {
    config: &'a ReconciliationConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a ReconciliationConfig) -> Self {
        Self { config }
    }

    pub fn reconcile(
        &self,
        primary: &[CanonicalRecord],
        satellites: &SatelliteSets,
    ) -> Result<ReconciliationReport> {
        if primary.is_empty() {
            return Err(ReconciliationError::EmptyInput(
                "primary ledger has no records".to_string(),
            ));
        }
        if satellites.is_empty() {
            return Err(ReconciliationError::EmptyInput(
                "no satellite record sets supplied".to_string(),
            ));
        }
        for (doc_type, records) in satellites {
            if *doc_type == DocumentType::R189 {
                return Err(ReconciliationError::InvalidConfig(
                    "the primary ledger cannot be reconciled as a satellite".to_string(),
                ));
            }
            if records.is_empty() {
                return Err(ReconciliationError::EmptyInput(format!(
                    "{} has no records",
                    doc_type
                )));
            }
        }

        info!(
            "Reconciling {} primary records against {} satellite set(s)",
            primary.len(),
            satellites.len()
        );

        let plan = self.plan_groups(satellites);
        let mut divergences = Vec::new();
        let mut groups = Vec::new();

        for (key, sources) in &plan {
            let summary = self.reconcile_group(key, sources, primary, satellites, &mut divergences);
            debug!(
                "Group {}: {} primary ids, {} satellite ids, {} equal, {} divergent",
                key,
                summary.primary_count,
                summary.satellite_count,
                summary.matched_equal.len(),
                summary.matched_divergent.len()
            );
            groups.push(summary);
        }

        for (doc_type, records) in satellites {
            for record in records.iter().filter(|r| routing_key(&r.external_id).is_none()) {
                warn!(
                    "{} row {}: id '{}' has no routing prefix",
                    doc_type, record.row, record.external_id
                );
                divergences.push(
                    Divergence::for_record(DivergenceKind::ValueValidationError, record, false)
                        .with_detail("external id has no routing prefix"),
                );
            }
        }

        let message = summarize(&divergences);
        info!("{}", message);

        Ok(ReconciliationReport {
            pair: pair_name(satellites),
            divergences,
            groups,
            message,
        })
    }

    /// Routing keys to compare, each with its contributing satellite types in
    /// priority order: configured routes first, then types discovered from ids.
    fn plan_groups(&self, satellites: &SatelliteSets) -> BTreeMap<RoutingKey, Vec<DocumentType>> {
        let mut plan: BTreeMap<RoutingKey, Vec<DocumentType>> = BTreeMap::new();

        for (key, sources) in &self.config.routes {
            let present: Vec<DocumentType> = sources
                .iter()
                .filter(|t| satellites.contains_key(t))
                .copied()
                .collect();
            if !present.is_empty() {
                plan.entry(RoutingKey::new(key)).or_default().extend(present);
            }
        }

        for (doc_type, records) in satellites {
            for key in records.iter().filter_map(|r| routing_key(&r.external_id)) {
                let sources = plan.entry(key).or_default();
                if !sources.contains(doc_type) {
                    sources.push(*doc_type);
                }
            }
        }

        plan
    }

    fn reconcile_group(
        &self,
        key: &RoutingKey,
        sources: &[DocumentType],
        primary: &[CanonicalRecord],
        satellites: &SatelliteSets,
        divergences: &mut Vec<Divergence>,
    ) -> GroupSummary {
        let in_group = |r: &&CanonicalRecord| has_routing_key(&r.external_id, key);

        let primary_group: Vec<&CanonicalRecord> = primary.iter().filter(in_group).collect();
        let satellite_group: Vec<&CanonicalRecord> = sources
            .iter()
            .filter_map(|t| satellites.get(t))
            .flat_map(|records| records.iter().filter(in_group))
            .collect();

        let primary_index = index_by_id(&primary_group);
        let satellite_index = index_by_id(&satellite_group);

        let mut summary = GroupSummary {
            key: key.to_string(),
            sources: sources.to_vec(),
            primary_count: primary_index.len(),
            satellite_count: satellite_index.len(),
            matched_equal: Vec::new(),
            matched_divergent: Vec::new(),
            missing_from_primary: Vec::new(),
            missing_from_satellite: Vec::new(),
        };

        divergences.push(Divergence::count(
            key.as_str(),
            primary_index.len(),
            satellite_index.len(),
        ));

        for record in &satellite_group {
            if !is_valid_party_id(&record.party_id) {
                divergences.push(
                    Divergence::for_record(DivergenceKind::InvalidPartyId, record, false)
                        .with_values(None, Some(ReportValue::Text(record.party_id.clone())))
                        .with_detail("party id is not in NN.NNN.NNN/NNNN-NN format"),
                );
            }
        }

        for (id, copies) in &satellite_index {
            if primary_index.contains_key(id) {
                continue;
            }
            summary.missing_from_primary.push(copies[0].external_id.clone());
            for record in copies {
                divergences.push(
                    Divergence::for_record(DivergenceKind::NotFoundInPrimary, record, false)
                        .with_detail(format!("{} id absent from the primary ledger", record.source)),
                );
            }
        }

        let searched: Vec<&str> = sources.iter().map(|t| t.label()).collect();
        for (id, copies) in &primary_index {
            if satellite_index.contains_key(id) {
                continue;
            }
            summary.missing_from_satellite.push(copies[0].external_id.clone());
            for record in copies {
                let mut divergence =
                    Divergence::for_record(DivergenceKind::NotFoundInSatellite, record, true)
                        .with_detail(format!("not found in {}", searched.join(", ")));
                if let [only] = sources {
                    divergence.source = Some(*only);
                }
                divergences.push(divergence);
            }
        }

        for (id, primary_copies) in &primary_index {
            let Some(satellite_copies) = satellite_index.get(id) else {
                continue;
            };

            let before = divergences.len();
            let pairs = primary_copies.len().max(satellite_copies.len());
            let mut flagged = false;
            for i in 0..pairs {
                let p = primary_copies[i.min(primary_copies.len() - 1)];
                let s = satellite_copies[i.min(satellite_copies.len() - 1)];
                // Already reported as an invalid party id; the amount is still compared.
                let skip_party = !is_valid_party_id(&s.party_id);
                flagged |= skip_party;
                self.compare_pair(p, s, skip_party, divergences);
            }

            let display_id = satellite_copies[0].external_id.clone();
            if flagged || divergences.len() > before {
                summary.matched_divergent.push(display_id);
            } else {
                summary.matched_equal.push(display_id);
            }
        }

        summary
    }

    fn compare_pair(
        &self,
        primary: &CanonicalRecord,
        satellite: &CanonicalRecord,
        skip_party: bool,
        divergences: &mut Vec<Divergence>,
    ) {
        if !skip_party
            && normalize_party_id(&primary.party_id) != normalize_party_id(&satellite.party_id)
        {
            divergences.push(
                Divergence::new(DivergenceKind::PartyIdDivergent, satellite.external_id.clone())
                    .with_source(satellite.source)
                    .with_values(
                        Some(ReportValue::Text(primary.party_id.clone())),
                        Some(ReportValue::Text(satellite.party_id.clone())),
                    )
                    .with_detail(format!(
                        "party id differs for {}: {}={}, R189={}",
                        satellite.external_id,
                        satellite.source,
                        satellite.party_id,
                        primary.party_id
                    )),
            );
        }

        let values = Some(ReportValue::from(&primary.amount));
        let satellite_values = Some(ReportValue::from(&satellite.amount));

        match (primary.amount.value(), satellite.amount.value()) {
            (Some(p), Some(s)) => {
                if !amounts_match(p, s, self.config.tolerance) {
                    divergences.push(
                        Divergence::new(DivergenceKind::AmountDivergent, satellite.external_id.clone())
                            .with_source(satellite.source)
                            .with_values(values, satellite_values)
                            .with_detail(format!(
                                "amount differs for {} by {:.2} (tolerance {})",
                                satellite.external_id,
                                s - p,
                                self.config.tolerance
                            )),
                    );
                }
            }
            (p, s) => {
                let side = match (p, s) {
                    (None, None) => "both sides",
                    (None, Some(_)) => "primary",
                    _ => "satellite",
                };
                divergences.push(
                    Divergence::new(
                        DivergenceKind::ValueValidationError,
                        satellite.external_id.clone(),
                    )
                    .with_source(satellite.source)
                    .with_values(values, satellite_values)
                    .with_detail(format!("amount could not be parsed on {}", side)),
                );
            }
        }
    }
}

pub fn reconcile(
    primary: &[CanonicalRecord],
    satellites: &SatelliteSets,
    config: &ReconciliationConfig,
) -> Result<ReconciliationReport> {
    Reconciler::new(config).reconcile(primary, satellites)
}
