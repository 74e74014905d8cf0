use crate::error::{ReconciliationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

/// A single spreadsheet cell as handed over by the tabular-parse collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    /// Empty cells and whitespace-only text both count as blank.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(n) => n.is_nan(),
        }
    }

    /// Trimmed textual rendering, `None` when blank.
    pub fn as_text(&self) -> Option<String> {
        if self.is_blank() {
            return None;
        }
        match self {
            Cell::Text(s) => Some(s.trim().to_string()),
            Cell::Number(n) => Some(format_number(*n)),
            Cell::Empty => None,
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.as_text().map(|t| t.contains(needle)).unwrap_or(false)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text().unwrap_or_default())
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Header-less grid of cells, exactly as it sits in the sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSheet {
    pub rows: Vec<Vec<Cell>>,
}

impl RawSheet {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    /// Reads a CSV export of a sheet. Every field stays textual; ragged rows are accepted.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(Cell::from).collect());
        }

        Ok(Self { rows })
    }

    /// Promotes the 1-based `header_row` to column names and keeps the rows below it.
    pub fn into_table(self, sheet: &str, header_row: usize) -> Result<Table> {
        let offset = header_row.saturating_sub(1);
        if header_row == 0 || offset >= self.rows.len() {
            return Err(ReconciliationError::HeaderRowOutOfRange {
                sheet: sheet.to_string(),
                header_row,
                rows: self.rows.len(),
            });
        }

        let mut rows = self.rows;
        let body = rows.split_off(offset + 1);
        let header = rows.pop().unwrap_or_default();

        let columns: Vec<String> = header
            .iter()
            .enumerate()
            .map(|(idx, cell)| cell.as_text().unwrap_or_else(|| format!("Unnamed: {}", idx)))
            .collect();

        Ok(Table::new(columns, body))
    }
}

/// A multi-sheet workbook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: BTreeMap<String, RawSheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, name: impl Into<String>, sheet: RawSheet) -> Self {
        self.sheets.insert(name.into(), sheet);
        self
    }

    pub fn from_csv_sheets<R: Read>(sheets: Vec<(String, R)>) -> Result<Self> {
        let mut workbook = Self::new();
        for (name, reader) in sheets {
            workbook
                .sheets
                .insert(name, RawSheet::from_csv_reader(reader)?);
        }
        Ok(workbook)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.keys().cloned().collect()
    }

    pub fn table(&self, sheet: &str, header_row: usize) -> Result<Table> {
        let raw = self
            .sheets
            .get(sheet)
            .ok_or_else(|| ReconciliationError::MissingSheet {
                sheet: sheet.to_string(),
                available: self.sheet_names(),
            })?;
        raw.clone().into_table(sheet, header_row)
    }
}

/// Named columns over rows of cells. Short rows read as blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> &Cell {
        static EMPTY: Cell = Cell::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&EMPTY)
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: Cell) {
        if let Some(r) = self.rows.get_mut(row) {
            if r.len() <= column {
                r.resize(column + 1, Cell::Empty);
            }
            r[column] = value;
        }
    }
}
