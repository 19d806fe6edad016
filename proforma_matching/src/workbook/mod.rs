// src/workbook/mod.rs - Spreadsheet capability used by the linkage engine
//
// The engine only needs to read a handful of fixed cells from a proforma and
// write a handful of fixed cells into a saved copy, so that is all this trait
// exposes.

pub mod xlsx;

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use xlsx::XlsxStore;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("Failed to open workbook {path}: {message}")]
    Open { path: PathBuf, message: String },
    #[error("Sheet '{sheet}' not found in {path}")]
    MissingSheet { path: PathBuf, sheet: String },
    #[error("Invalid cell reference '{0}'")]
    InvalidCell(String),
    #[error("Failed to write workbook {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// A single cell on a named sheet, e.g. `FACILITY INFO!B7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub sheet: String,
    /// Zero-based row.
    pub row: u32,
    /// Zero-based column.
    pub col: u16,
}

impl CellRef {
    /// Parses an A1-style address ("B7", "aa12") on the given sheet.
    pub fn parse(sheet: &str, address: &str) -> Result<Self, WorkbookError> {
        let address = address.trim();
        let split = address
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| WorkbookError::InvalidCell(address.to_string()))?;
        let (letters, digits) = address.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(WorkbookError::InvalidCell(address.to_string()));
        }

        let mut col: u32 = 0;
        for c in letters.chars() {
            col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
            if col > u16::MAX as u32 {
                return Err(WorkbookError::InvalidCell(address.to_string()));
            }
        }
        let row: u32 = digits
            .parse()
            .map_err(|_| WorkbookError::InvalidCell(address.to_string()))?;
        if row == 0 {
            return Err(WorkbookError::InvalidCell(address.to_string()));
        }

        Ok(Self {
            sheet: sheet.to_string(),
            row: row - 1,
            col: (col - 1) as u16,
        })
    }

    pub fn address(&self) -> String {
        let mut letters = String::new();
        let mut n = self.col as u32 + 1;
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.insert(0, (b'A' + rem as u8) as char);
            n = (n - 1) / 26;
        }
        format!("{}{}", letters, self.row + 1)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.sheet, self.address())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Bool(b) => Some(b.to_string()),
        }
    }

    /// Numeric value, accepting numbers stored as text ("118", "1,204").
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Text(s) => s.trim().replace(',', "").parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

pub trait WorkbookStore {
    fn read_cell(&self, path: &Path, cell: &CellRef) -> Result<CellValue, WorkbookError>;

    fn read_cells(&self, path: &Path, cells: &[CellRef]) -> Result<Vec<CellValue>, WorkbookError> {
        cells.iter().map(|cell| self.read_cell(path, cell)).collect()
    }

    /// Saves a copy of `source` at `destination` with `writes` applied.
    fn write_cells(
        &self,
        source: &Path,
        destination: &Path,
        writes: &[(CellRef, CellValue)],
    ) -> Result<(), WorkbookError>;
}
