use crate::error::{ReconciliationError, Result};
use crate::table::{Cell, Table};
use log::debug;
use std::fmt;
use std::sync::Arc;

/// Rows whose marker cell trips the predicate neither receive nor supply a
/// propagated value; the propagation window restarts after them.
#[derive(Clone)]
pub struct Exclusion {
    pub marker_column: String,
    predicate: Arc<dyn Fn(&Cell) -> bool + Send + Sync>,
}

impl Exclusion {
    pub fn new<F>(marker_column: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Cell) -> bool + Send + Sync + 'static,
    {
        Self {
            marker_column: marker_column.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Subtotal rows, e.g. an "Account number" cell reading "Total 4410".
    pub fn contains(marker_column: impl Into<String>, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self::new(marker_column, move |cell: &Cell| cell.contains(&marker))
    }

    pub fn excludes(&self, cell: &Cell) -> bool {
        (self.predicate)(cell)
    }
}

impl fmt::Debug for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exclusion")
            .field("marker_column", &self.marker_column)
            .finish_non_exhaustive()
    }
}

/// A column with merged-cell semantics.
#[derive(Debug, Clone)]
pub struct FillRule {
    pub column: String,
    pub exclusion: Option<Exclusion>,
}

impl FillRule {
    pub fn always(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            exclusion: None,
        }
    }

    pub fn unless(column: impl Into<String>, exclusion: Exclusion) -> Self {
        Self {
            column: column.into(),
            exclusion: Some(exclusion),
        }
    }
}

/// Propagates the last non-blank value of each listed column into the blank
/// cells below it. Must run before any row filtering so that the window is
/// continuous. Returns the number of cells filled.
pub fn fill_forward(table: &mut Table, rules: &[FillRule]) -> Result<usize> {
    let mut missing: Vec<String> = Vec::new();
    let columns = rules.iter().flat_map(|rule| {
        std::iter::once(&rule.column).chain(rule.exclusion.as_ref().map(|e| &e.marker_column))
    });
    for column in columns {
        if !table.has_column(column) && !missing.contains(column) {
            missing.push(column.clone());
        }
    }
    if !missing.is_empty() {
        return Err(ReconciliationError::MissingColumns {
            source_name: "fill-forward".to_string(),
            columns: missing,
        });
    }

    let mut filled = 0;
    for rule in rules {
        let column = table.column_index(&rule.column).unwrap_or_default();
        let marker = rule
            .exclusion
            .as_ref()
            .and_then(|e| table.column_index(&e.marker_column).map(|idx| (e, idx)));

        let mut last: Option<Cell> = None;
        for row in 0..table.len() {
            if let Some((exclusion, marker_idx)) = marker {
                if exclusion.excludes(table.cell(row, marker_idx)) {
                    last = None;
                    continue;
                }
            }

            let cell = table.cell(row, column);
            if !cell.is_blank() {
                last = Some(cell.clone());
            } else if let Some(value) = &last {
                table.set_cell(row, column, value.clone());
                filled += 1;
            }
        }

        debug!("Fill-forward on '{}' completed", rule.column);
    }

    Ok(filled)
}
