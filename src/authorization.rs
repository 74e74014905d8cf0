use crate::config::ReconciliationConfig;
use crate::divergence::{Divergence, DivergenceKind, ReportValue};
use crate::schema::CanonicalRecord;
use crate::utils::{normalize_party_id, normalize_service_code};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEntry {
    pub service: String,
    /// Party ids with punctuation stripped.
    pub parties: BTreeSet<String>,
}

/// Normalized service code to the parties allowed to invoice it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizationMap {
    services: BTreeMap<String, ServiceEntry>,
}

impl AuthorizationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later entries reducing to an already-seen code are ignored.
    pub fn insert<I, S>(&mut self, service: &str, parties: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(code) = normalize_service_code(service) else {
            return false;
        };
        if self.services.contains_key(&code) {
            warn!(
                "Service '{}' reduces to code {} which is already mapped; keeping the first entry",
                service, code
            );
            return false;
        }

        let parties = parties
            .into_iter()
            .map(|p| normalize_party_id(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        self.services.insert(
            code,
            ServiceEntry {
                service: service.to_string(),
                parties,
            },
        );
        true
    }

    pub fn with_service<I, S>(mut self, service: &str, parties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.insert(service, parties);
        self
    }

    pub fn from_config(config: &ReconciliationConfig) -> Self {
        let mut map = Self::new();
        for entry in &config.service_authorizations {
            map.insert(&entry.service, &entry.parties);
        }
        map
    }

    pub fn get(&self, code: &str) -> Option<&ServiceEntry> {
        self.services.get(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// A record that passed authorization and carries a parsed amount. Only
/// these can be aggregated.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizedRecord(CanonicalRecord);

impl AuthorizedRecord {
    pub fn record(&self) -> &CanonicalRecord {
        &self.0
    }

    /// The normalized service code the record was authorized under.
    pub fn service_code(&self) -> &str {
        self.0.service_code.as_deref().unwrap_or_default()
    }

    pub fn into_inner(self) -> CanonicalRecord {
        self.0
    }
}

impl AsRef<CanonicalRecord> for AuthorizedRecord {
    fn as_ref(&self) -> &CanonicalRecord {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizationOutcome {
    pub authorized: Vec<AuthorizedRecord>,
    pub rejected: Vec<Divergence>,
}

fn reject(record: &CanonicalRecord, detail: String) -> Divergence {
    Divergence::new(DivergenceKind::PartyNotAuthorized, record.external_id.clone())
        .with_values(
            Some(ReportValue::Text(record.party_id.clone())),
            record.service_code.clone().map(ReportValue::Text),
        )
        .with_detail(detail)
}

/// Splits records into those whose party may invoice their service and
/// rejection rows for the rest. Unknown codes and empty party sets reject.
/// An authorized party with an unparseable amount is rejected as a value
/// validation error so the total never silently shrinks.
pub fn validate_authorization(
    records: &[CanonicalRecord],
    map: &AuthorizationMap,
) -> AuthorizationOutcome {
    info!(
        "Validating authorization of {} records against {} services",
        records.len(),
        map.len()
    );

    let mut outcome = AuthorizationOutcome::default();
    for record in records {
        let Some(code) = record.service_code.as_deref().and_then(normalize_service_code) else {
            warn!("{} has no service code; rejecting", record.external_id);
            outcome
                .rejected
                .push(reject(record, "record carries no service code".to_string()));
            continue;
        };

        let Some(entry) = map.get(&code) else {
            warn!(
                "{}: service code {} is not mapped; rejecting",
                record.external_id, code
            );
            outcome
                .rejected
                .push(reject(record, format!("service code {} is not mapped", code)));
            continue;
        };

        if entry.parties.is_empty() {
            warn!("Service '{}' authorizes no party; rejecting", entry.service);
            outcome.rejected.push(reject(
                record,
                format!("service '{}' has no authorized parties", entry.service),
            ));
            continue;
        }

        if !entry.parties.contains(&normalize_party_id(&record.party_id)) {
            outcome.rejected.push(reject(
                record,
                format!(
                    "party {} is not authorized for service '{}'",
                    record.party_id, entry.service
                ),
            ));
            continue;
        }

        if !record.amount.is_valid() {
            warn!(
                "{}: unparseable amount '{}'; not aggregated",
                record.external_id, record.amount
            );
            outcome.rejected.push(
                Divergence::new(DivergenceKind::ValueValidationError, record.external_id.clone())
                    .with_values(None, Some(ReportValue::from(&record.amount)))
                    .with_detail(format!("amount could not be parsed for service {}", code)),
            );
            continue;
        }

        let mut authorized = record.clone();
        authorized.service_code = Some(code);
        outcome.authorized.push(AuthorizedRecord(authorized));
    }

    info!(
        "{} records authorized, {} rejected",
        outcome.authorized.len(),
        outcome.rejected.len()
    );
    outcome
}
