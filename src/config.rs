use crate::error::{ReconciliationError, Result};
use crate::schema::DocumentType;
use crate::taxonomy::split_external_id;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const AUTHORIZED_PARTIES: [&str; 16] = [
    "14.759.173/0002-83",
    "07.175.725/0042-38",
    "07.175.725/0014-84",
    "60.621.141/0005-87",
    "13.772.125/0007-77",
    "07.175.725/0030-02",
    "60.621.141/0004-04",
    "07.175.725/0004-02",
    "07.175.725/0010-50",
    "10.885.321/0001-74",
    "60.621.141/0006-68",
    "14.759.173/0001-00",
    "07.175.725/0024-56",
    "07.175.725/0021-03",
    "07.175.725/0026-18",
    "84.584.994/0007-16",
];

const SITE_PAIRS: [(&str, &str); 16] = [
    ("60.621.141/0005-87", "PMAR_BRCSA"),
    ("07.175.725/0030-02", "WEL_BRGCV"),
    ("60.621.141/0006-68", "PMAR_BRMUA"),
    ("07.175.725/0010-50", "WEL_BRJGS"),
    ("10.885.321/0001-74", "WLI_BRLNH"),
    ("84.584.994/0007-16", "WTB_BRSZO"),
    ("07.175.725/0042-38", "WEL_BRBTI"),
    ("14.759.173/0001-00", "WCES_BRMTT"),
    ("14.759.173/0002-83", "WCES_BRBGV"),
    ("07.175.725/0024-56", "WEL_BRRPO"),
    ("07.175.725/0014-84", "WEL_BRBNU"),
    ("13.772.125/0007-77", "RF_BRCOR"),
    ("07.175.725/0004-02", "WEL_BRITJ"),
    ("60.621.141/0004-04", "PMAR_BRGRM"),
    ("07.175.725/0021-03", "WEL_BRSBC"),
    ("07.175.725/0026-18", "WEL_BRSPO"),
];

const SERVICES: [&str; 7] = [
    "14.02 - Assistência Técnica",
    "17.01 - Acessoria ou Consultoria",
    "14.01 - LUBRIFICACAO, LIMPEZA",
    "1.07 - SUPORTE TECNICO EM INFORMATICA",
    "3115 - Assessoria E Consultoria",
    "1880 - Assistência Técnica - Instalação",
    "1.03 - Processamento e Armazenamento",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ServiceAuthorization {
    #[schemars(
        description = "Service as written in the register, e.g. '14.02 - Assistência Técnica'. Only the integer part of the leading code is used for matching."
    )]
    pub service: String,

    #[schemars(description = "Party identifiers (CNPJ) allowed to invoice this service")]
    pub parties: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ReconciliationConfig {
    #[schemars(description = "Absolute tolerance for amount comparisons (default 0.01)")]
    pub tolerance: f64,

    #[schemars(description = "1-based row holding the column names in register extracts (default 13)")]
    pub header_row: usize,

    #[schemars(description = "Sheet carrying the canonical data in register workbooks")]
    pub ledger_sheet: String,

    #[schemars(
        description = "Accepted spellings of the monetary total column, most preferred first"
    )]
    pub total_columns: Vec<String>,

    #[schemars(
        description = "Routing key (id prefix) to the satellite document types contributing ids under it, in attribution priority order"
    )]
    pub routes: BTreeMap<String, Vec<DocumentType>>,

    #[schemars(description = "Party identifier to the site names accepted for it in the register")]
    pub site_map: BTreeMap<String, Vec<String>>,

    #[schemars(
        description = "Service to authorized parties. When two services reduce to the same code, the first entry wins."
    )]
    pub service_authorizations: Vec<ServiceAuthorization>,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        let routes = DocumentType::SATELLITES
            .iter()
            .map(|t| (t.label().to_string(), vec![*t]))
            .collect();

        let site_map = SITE_PAIRS
            .iter()
            .map(|(party, site)| (party.to_string(), vec![site.to_string()]))
            .collect();

        let parties: BTreeSet<String> = AUTHORIZED_PARTIES.iter().map(|p| p.to_string()).collect();
        let service_authorizations = SERVICES
            .iter()
            .map(|service| ServiceAuthorization {
                service: service.to_string(),
                parties: parties.clone(),
            })
            .collect();

        Self {
            tolerance: 0.01,
            header_row: 13,
            ledger_sheet: "BRASIL".to_string(),
            total_columns: ["Total Geral", "Grand Total", "Total Gera", "Total", "Valor Total"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            routes,
            site_map,
            service_authorizations,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ReconciliationError::InvalidConfig(format!(
                "tolerance must be a non-negative number, got {}",
                self.tolerance
            )));
        }

        if self.header_row == 0 {
            return Err(ReconciliationError::InvalidConfig(
                "header_row is 1-based and must be at least 1".to_string(),
            ));
        }

        if self.total_columns.is_empty() {
            return Err(ReconciliationError::InvalidConfig(
                "total_columns must list at least one column name".to_string(),
            ));
        }

        for (key, sources) in &self.routes {
            // Only keys an id prefix can produce ever match a record.
            if key.contains('-') || split_external_id(&format!("{}-0", key)).is_none() {
                return Err(ReconciliationError::InvalidConfig(format!(
                    "routing key '{}' must be a non-empty alphabetic prefix",
                    key
                )));
            }
            if sources.is_empty() {
                return Err(ReconciliationError::InvalidConfig(format!(
                    "routing key '{}' has no satellite document types",
                    key
                )));
            }
            if sources.contains(&DocumentType::R189) {
                return Err(ReconciliationError::InvalidConfig(format!(
                    "routing key '{}' cannot route to the primary ledger",
                    key
                )));
            }
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReconciliationConfig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ReconciliationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.site_map.len(), 16);
        assert_eq!(config.service_authorizations.len(), 7);
    }

    #[test]
    fn test_json_round_trip_keeps_routes() {
        let mut config = ReconciliationConfig::default();
        config.routes.insert(
            "SRV".to_string(),
            vec![DocumentType::Qpe, DocumentType::Nfserv],
        );
        let json = config.to_json().unwrap();
        let parsed = ReconciliationConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, config);
        assert!(json.contains("\"NFSERV\""));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = ReconciliationConfig::default();
        config.tolerance = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ReconciliationError::InvalidConfig(_))
        ));

        let mut config = ReconciliationConfig::default();
        config.routes.insert("QPE-X".to_string(), vec![DocumentType::Qpe]);
        assert!(config.validate().is_err());

        let mut config = ReconciliationConfig::default();
        config.routes.insert("R".to_string(), vec![DocumentType::R189]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_route_keys_no_id_can_carry() {
        for key in ["R1", "Q_PE", "", " "] {
            let mut config = ReconciliationConfig::default();
            config.routes.insert(key.to_string(), vec![DocumentType::Qpe]);
            assert!(
                matches!(config.validate(), Err(ReconciliationError::InvalidConfig(_))),
                "key '{}'",
                key
            );
        }

        let mut config = ReconciliationConfig::default();
        config.routes.insert("srv".to_string(), vec![DocumentType::Qpe]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_schema_generation() {
        let schema = ReconciliationConfig::generate_json_schema();
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("total_columns"));
    }
}
