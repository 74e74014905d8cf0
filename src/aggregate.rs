use crate::authorization::AuthorizedRecord;
use crate::schema::{AggregatedRecord, Amount, CanonicalRecord};
use log::{debug, info};
use std::collections::BTreeMap;

/// Sums authorized records per `(service_code, party_id, external_id)`.
///
/// The first non-empty site in input order is kept for each group. Output is
/// sorted by the composite key.
pub fn aggregate(records: &[AuthorizedRecord]) -> Vec<AggregatedRecord> {
    let mut groups: BTreeMap<(String, String, String), AggregatedRecord> = BTreeMap::new();

    for authorized in records {
        let record = authorized.record();
        let key = (
            authorized.service_code().to_string(),
            record.party_id.clone(),
            record.external_id.clone(),
        );

        let entry = groups.entry(key).or_insert_with_key(|(code, party, id)| AggregatedRecord {
            service_code: code.clone(),
            party_id: party.clone(),
            external_id: id.clone(),
            amount: 0.0,
            site: None,
            record_count: 0,
        });

        // Authorization rejects unparseable amounts.
        entry.amount += record.amount.value().unwrap_or_default();
        entry.record_count += 1;
        if entry.site.is_none() {
            entry.site = record.site.clone().filter(|s| !s.trim().is_empty());
        }
    }

    let aggregated: Vec<AggregatedRecord> = groups.into_values().collect();

    info!(
        "Aggregated {} records into {} rows",
        records.len(),
        aggregated.len()
    );
    aggregated
}

/// Folds primary ledger lines into one record per `(party_id, external_id, site)`.
///
/// Lines with an unparseable amount stay as separate records so the
/// comparison can still report them.
pub fn consolidate_ledger(records: &[CanonicalRecord]) -> Vec<CanonicalRecord> {
    let mut groups: BTreeMap<(String, String, String), CanonicalRecord> = BTreeMap::new();
    let mut invalid = Vec::new();

    for record in records {
        if !record.amount.is_valid() {
            invalid.push(record.clone());
            continue;
        }

        let key = (
            record.party_id.clone(),
            record.external_id.clone(),
            record.site.clone().unwrap_or_default(),
        );
        match groups.get_mut(&key) {
            Some(existing) => {
                let total = existing.amount.value().unwrap_or(0.0)
                    + record.amount.value().unwrap_or(0.0);
                existing.amount = Amount::Value(total);
            }
            None => {
                groups.insert(key, record.clone());
            }
        }
    }

    let mut consolidated: Vec<CanonicalRecord> = groups.into_values().collect();

    debug!(
        "{} ledger lines with unparseable totals kept unconsolidated",
        invalid.len()
    );
    consolidated.extend(invalid);

    for (row, record) in consolidated.iter_mut().enumerate() {
        record.row = row;
    }

    info!(
        "Consolidated {} ledger lines into {} records",
        records.len(),
        consolidated.len()
    );
    consolidated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::{validate_authorization, AuthorizationMap};
    use crate::schema::DocumentType;

    const PARTY: &str = "07.175.725/0030-02";

    fn authorized(records: Vec<CanonicalRecord>) -> Vec<AuthorizedRecord> {
        let map = AuthorizationMap::new()
            .with_service("1880", [PARTY])
            .with_service("3115", [PARTY]);
        validate_authorization(&records, &map).authorized
    }

    fn service(id: &str, code: &str, amount: f64, site: Option<&str>) -> CanonicalRecord {
        let record = CanonicalRecord::new(DocumentType::MunicipalityCode, PARTY, id, amount)
            .with_service_code(code);
        match site {
            Some(site) => record.with_site(site),
            None => record,
        }
    }

    #[test]
    fn test_sums_per_key_and_keeps_first_site() {
        let rows = aggregate(&authorized(vec![
            service("NF-1", "1880", 10.0, None),
            service("NF-1", "1880.0", 5.25, Some("WEL_BRGCV")),
            service("NF-1", "3115", 1.0, Some("OTHER")),
            service("NF-1", "1880", 0.1, Some("IGNORED")),
        ]));

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].service_code, "1880");
        assert!((rows[0].amount - 15.35).abs() < 1e-9);
        assert_eq!(rows[0].record_count, 3);
        assert_eq!(rows[0].site.as_deref(), Some("WEL_BRGCV"));
        assert_eq!(rows[1].service_code, "3115");
    }

    #[test]
    fn test_conservation() {
        let input = authorized(vec![
            service("NF-2", "1880", 0.1, None),
            service("NF-1", "1880", 0.2, None),
            service("NF-2", "1880", 0.3, None),
        ]);
        let input_total: f64 = input
            .iter()
            .filter(|r| r.record().external_id == "NF-2")
            .filter_map(|r| r.record().amount.value())
            .sum();
        let rows = aggregate(&input);
        let nf2 = rows.iter().find(|r| r.external_id == "NF-2").unwrap();
        assert!((nf2.amount - input_total).abs() < 1e-9);
        assert_eq!(rows[0].external_id, "NF-1");
    }

    #[test]
    fn test_sub_cent_amounts_are_not_rounded_away() {
        let rows = aggregate(&authorized(vec![
            service("NF-1", "1880", 0.004, None),
            service("NF-1", "1880", 0.004, None),
            service("NF-1", "1880", 0.004, None),
        ]));
        assert_eq!(rows.len(), 1);
        assert!((rows[0].amount - 0.012).abs() < 1e-12);
        assert_eq!(rows[0].record_count, 3);
    }

    #[test]
    fn test_unparseable_amount_never_reaches_the_sum() {
        let map = AuthorizationMap::new().with_service("1880", [PARTY]);
        let records = vec![
            service("NF-1", "1880", 10.0, None),
            service("NF-1", "1880", 0.0, None).with_amount(Amount::Invalid("abc".to_string())),
        ];
        let outcome = validate_authorization(&records, &map);
        assert_eq!(outcome.rejected.len(), 1);

        let rows = aggregate(&outcome.authorized);
        assert_eq!(rows[0].amount, 10.0);
        assert_eq!(rows[0].record_count, 1);
    }

    #[test]
    fn test_consolidate_ledger_keeps_invalid_amounts_apart() {
        let line = |amount: f64| {
            CanonicalRecord::new(DocumentType::R189, PARTY, "QPE-1", amount).with_site("WEL_BRGCV")
        };
        let records = vec![
            line(10.0),
            line(2.5),
            line(0.0).with_amount(Amount::Invalid("n/a".to_string())),
            line(1.0).with_site("WEL_BRJGS"),
        ];
        let consolidated = consolidate_ledger(&records);
        assert_eq!(consolidated.len(), 3);
        assert_eq!(consolidated[0].amount, Amount::Value(12.5));
        assert_eq!(consolidated[1].site.as_deref(), Some("WEL_BRJGS"));
        assert!(!consolidated[2].amount.is_valid());
        assert_eq!(consolidated[2].row, 2);
    }
}
