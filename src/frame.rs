//! Small ordered-column table used at the user-data boundary
//!
//! The engine never mutates a caller's [`Frame`]; `deflate`/`exchange` clone
//! it, append or overwrite the target column, and return the copy with the
//! original column order preserved.

use crate::error::{DeflateError, Result};
use csv::ReaderBuilder;
use std::path::Path;

/// A single table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl Cell {
    /// Numeric view of the cell, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// A named column of cells
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Cell>,
}

/// Ordered-column table
#[derive(Debug, Clone, Default)]
pub struct Frame {
    columns: Vec<Column>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Create an empty frame with the given column names
    pub fn with_columns(names: &[&str]) -> Self {
        Self {
            columns: names
                .iter()
                .map(|n| Column {
                    name: (*n).to_string(),
                    cells: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.cells.len()).unwrap_or(0)
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Index of a named column, or a ConfigurationError naming the parameter
    /// that referenced it
    pub fn column_index(&self, name: &str, parameter: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                DeflateError::configuration(
                    parameter,
                    format!("column '{}' not found in input table", name),
                )
            })
    }

    /// Append a row. The number of cells must match the number of columns.
    pub fn push_row(&mut self, cells: Vec<Cell>) -> Result<()> {
        if cells.len() != self.columns.len() {
            return Err(DeflateError::configuration(
                "row",
                format!(
                    "expected {} cells, got {}",
                    self.columns.len(),
                    cells.len()
                ),
            ));
        }
        for (column, cell) in self.columns.iter_mut().zip(cells) {
            column.cells.push(cell);
        }
        Ok(())
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.columns.get(col).and_then(|c| c.cells.get(row))
    }

    /// Overwrite a column in place (keeping its position) or append it at the
    /// end if no column with this name exists.
    pub fn set_column(&mut self, name: &str, cells: Vec<Cell>) {
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
            column.cells = cells;
        } else {
            self.columns.push(Column {
                name: name.to_string(),
                cells,
            });
        }
    }

    /// Load a frame from a CSV file with headers. Cells are typed by a
    /// cheapest-first parse: empty -> Null, integer, float, then string.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| DeflateError::data_source("csv", format!("failed to open CSV: {}", e)))?;

        let headers = rdr
            .headers()
            .map_err(|e| DeflateError::data_source("csv", format!("failed to read headers: {}", e)))?
            .clone();

        let mut frame = Frame {
            columns: headers
                .iter()
                .map(|h| Column {
                    name: h.to_string(),
                    cells: Vec::new(),
                })
                .collect(),
        };

        for result in rdr.records() {
            let record = result.map_err(|e| {
                DeflateError::data_source("csv", format!("failed to read record: {}", e))
            })?;
            let cells = record.iter().map(parse_cell).collect();
            frame.push_row(cells)?;
        }

        Ok(frame)
    }
}

fn parse_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Null;
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Cell::Int(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return Cell::Float(v);
    }
    Cell::Str(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_push_and_read() {
        let mut frame = Frame::with_columns(&["iso3", "year", "value"]);
        frame
            .push_row(vec![
                Cell::Str("FRA".to_string()),
                Cell::Int(2020),
                Cell::Float(12.5),
            ])
            .unwrap();

        assert_eq!(frame.n_rows(), 1);
        assert_eq!(frame.n_cols(), 3);
        assert_eq!(frame.cell(0, 1), Some(&Cell::Int(2020)));
        assert_eq!(frame.cell(0, 2).unwrap().as_f64(), Some(12.5));
    }

    #[test]
    fn test_row_arity_checked() {
        let mut frame = Frame::with_columns(&["a", "b"]);
        let result = frame.push_row(vec![Cell::Int(1)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_column_keeps_position() {
        let mut frame = Frame::with_columns(&["a", "b", "c"]);
        frame
            .push_row(vec![Cell::Int(1), Cell::Int(2), Cell::Int(3)])
            .unwrap();

        frame.set_column("b", vec![Cell::Float(9.0)]);
        assert_eq!(frame.column_names(), vec!["a", "b", "c"]);
        assert_eq!(frame.cell(0, 1), Some(&Cell::Float(9.0)));

        frame.set_column("d", vec![Cell::Null]);
        assert_eq!(frame.column_names(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_from_csv() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "iso3,year,value\nFRA,2020,10.5\nUSA,2021,\nDEU,2019-01-01,3"
        )
        .unwrap();
        file.flush().unwrap();

        let frame = Frame::from_csv(file.path()).unwrap();
        assert_eq!(frame.n_rows(), 3);
        assert_eq!(frame.cell(0, 0), Some(&Cell::Str("FRA".to_string())));
        assert_eq!(frame.cell(0, 2), Some(&Cell::Float(10.5)));
        assert_eq!(frame.cell(1, 2), Some(&Cell::Null));
        assert_eq!(frame.cell(2, 1), Some(&Cell::Str("2019-01-01".to_string())));
    }

    #[test]
    fn test_column_index_error_names_parameter() {
        let frame = Frame::with_columns(&["a"]);
        let err = frame.column_index("missing", "value_column").unwrap_err();
        assert!(err.to_string().contains("value_column"));
    }
}
