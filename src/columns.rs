use crate::error::{ReconciliationError, Result};
use crate::table::Table;
use serde::{Deserialize, Serialize};

/// A logical column and the names it has gone by, most preferred first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub logical: String,
    pub candidates: Vec<String>,
}

impl ColumnSpec {
    pub fn new(logical: impl Into<String>, candidates: &[&str]) -> Self {
        Self {
            logical: logical.into(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// A column that only ever had one name.
    pub fn exact(name: &str) -> Self {
        Self::new(name, &[name])
    }

    pub fn from_candidates(logical: impl Into<String>, candidates: Vec<String>) -> Self {
        Self {
            logical: logical.into(),
            candidates,
        }
    }

    pub fn resolve<'t>(&self, table: &'t Table) -> Result<&'t str> {
        resolve_column(table, &self.logical, &self.candidates)
    }
}

/// Picks the first candidate present in the table.
pub fn resolve_column<'t>(table: &'t Table, logical: &str, candidates: &[String]) -> Result<&'t str> {
    candidates
        .iter()
        .find_map(|candidate| {
            table
                .column_index(candidate)
                .map(|idx| table.columns()[idx].as_str())
        })
        .ok_or_else(|| ReconciliationError::UnresolvedColumn {
            logical: logical.to_string(),
            candidates: candidates.to_vec(),
        })
}

/// Fails with every missing column listed, not just the first one.
pub fn require_columns(table: &Table, source_name: &str, columns: &[&str]) -> Result<()> {
    let missing: Vec<String> = columns
        .iter()
        .filter(|c| !table.has_column(c))
        .map(|c| c.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReconciliationError::MissingColumns {
            source_name: source_name.to_string(),
            columns: missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str]) -> Table {
        Table::new(columns.iter().map(|c| c.to_string()).collect(), vec![])
    }

    #[test]
    fn test_earlier_candidate_wins() {
        let t = table(&["Grand Total", "Total Geral"]);
        let spec = ColumnSpec::new("total", &["Total Geral", "Grand Total"]);
        assert_eq!(spec.resolve(&t).unwrap(), "Total Geral");
    }

    #[test]
    fn test_falls_back_to_later_candidate() {
        let t = table(&["Invoice number", "Total Gera"]);
        let spec = ColumnSpec::new("total", &["Total Geral", "Grand Total", "Total Gera"]);
        assert_eq!(spec.resolve(&t).unwrap(), "Total Gera");
    }

    #[test]
    fn test_unresolved_names_all_candidates() {
        let t = table(&["Invoice number"]);
        let spec = ColumnSpec::new("total", &["Total Geral", "Grand Total"]);
        match spec.resolve(&t) {
            Err(ReconciliationError::UnresolvedColumn { logical, candidates }) => {
                assert_eq!(logical, "total");
                assert_eq!(candidates, vec!["Total Geral", "Grand Total"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_require_columns_lists_every_missing() {
        let t = table(&["CNPJ"]);
        let err = require_columns(&t, "SPB", &["SPB_ID", "CNPJ", "VALOR_TOTAL"]).unwrap_err();
        match err {
            ReconciliationError::MissingColumns { source_name, columns } => {
                assert_eq!(source_name, "SPB");
                assert_eq!(columns, vec!["SPB_ID", "VALOR_TOTAL"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
