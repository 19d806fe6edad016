// src/workbook/xlsx.rs - calamine-backed reads, rust_xlsxwriter-backed stamped copies
use calamine::{open_workbook_auto, Data, Reader, SheetVisible, Sheets};
use log::{debug, warn};
use rust_xlsxwriter::{Format, Formula, Workbook};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::{CellRef, CellValue, WorkbookError, WorkbookStore};

/// Maximum dimensions carried over when copying a sheet.
const MAX_ROWS: u32 = 1_048_576;
const MAX_COLS: u16 = 16_384;

/// Excel's built-in names (print areas, filter databases) are owned by the writer.
const BUILTIN_NAME_PREFIX: &str = "_xlnm.";

#[derive(Debug, Clone, PartialEq)]
enum SnapshotCell {
    Value(CellValue),
    Formula(String),
}

/// Inclusive `(first_row, first_col, last_row, last_col)` merged region.
type MergedRange = (u32, u16, u32, u16);

#[derive(Debug, Default)]
struct SheetSnapshot {
    name: String,
    cells: BTreeMap<(u32, u16), SnapshotCell>,
    merges: Vec<MergedRange>,
    hidden: bool,
}

#[derive(Debug, Default)]
struct WorkbookSnapshot {
    sheets: Vec<SheetSnapshot>,
    defined_names: Vec<(String, String)>,
}

/// Workbook store for .xlsx proformas on disk. Reads also accept .xlsm and .xls.
///
/// Copies carry every sheet's values and formulas, merged regions, sheet
/// visibility and workbook defined names. Cell styling is not carried.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxStore;

impl XlsxStore {
    pub fn new() -> Self {
        Self
    }

    fn snapshot(path: &Path) -> Result<WorkbookSnapshot, WorkbookError> {
        let mut workbook = open_workbook_auto(path).map_err(|e| WorkbookError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let defined_names = workbook.defined_names().to_vec();
        let metadata = workbook.sheets_metadata().to_vec();

        let mut sheets = Vec::with_capacity(metadata.len());
        for sheet in metadata {
            let name = sheet.name;
            let mut snapshot = SheetSnapshot {
                name: name.clone(),
                hidden: sheet.visible != SheetVisible::Visible,
                ..Default::default()
            };

            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| WorkbookError::Open {
                    path: path.to_path_buf(),
                    message: format!("sheet '{}': {}", name, e),
                })?;
            let (start_row, start_col) = range.start().unwrap_or((0, 0));
            for (r, c, data) in range.used_cells() {
                let value = data_to_value(data);
                if value != CellValue::Empty {
                    if let Some(pos) = absolute(start_row, start_col, r, c) {
                        snapshot.cells.insert(pos, SnapshotCell::Value(value));
                    }
                }
            }

            // Older formats may not expose formulas; values alone are still a usable copy.
            if let Ok(formulas) = workbook.worksheet_formula(&name) {
                let (start_row, start_col) = formulas.start().unwrap_or((0, 0));
                for (r, c, formula) in formulas.used_cells() {
                    if formula.trim().is_empty() {
                        continue;
                    }
                    if let Some(pos) = absolute(start_row, start_col, r, c) {
                        snapshot.cells.insert(pos, SnapshotCell::Formula(formula.clone()));
                    }
                }
            }

            if let Sheets::Xlsx(xlsx) = &mut workbook {
                match xlsx.worksheet_merge_cells(&name) {
                    Some(Ok(regions)) => {
                        snapshot.merges = regions
                            .iter()
                            .filter_map(|d| merged_range(d.start, d.end))
                            .collect();
                    }
                    Some(Err(e)) => warn!(
                        "Merged cells of sheet '{}' in {} not readable: {}",
                        name,
                        path.display(),
                        e
                    ),
                    None => {}
                }
            }

            sheets.push(snapshot);
        }
        Ok(WorkbookSnapshot {
            sheets,
            defined_names,
        })
    }
}

/// Single-cell regions are not merges; anything outside the sheet grid is dropped.
fn merged_range(start: (u32, u32), end: (u32, u32)) -> Option<MergedRange> {
    if start == end {
        return None;
    }
    let first_col = u16::try_from(start.1).ok()?;
    let last_col = u16::try_from(end.1).ok()?;
    if end.0 >= MAX_ROWS || last_col >= MAX_COLS || start.0 > end.0 || first_col > last_col {
        return None;
    }
    Some((start.0, first_col, end.0, last_col))
}

fn absolute(start_row: u32, start_col: u32, r: usize, c: usize) -> Option<(u32, u16)> {
    let row = start_row.checked_add(u32::try_from(r).ok()?)?;
    let col = u16::try_from(start_col as usize + c).ok()?;
    if row >= MAX_ROWS || col >= MAX_COLS {
        return None;
    }
    Some((row, col))
}

fn data_to_value(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

impl WorkbookStore for XlsxStore {
    fn read_cell(&self, path: &Path, cell: &CellRef) -> Result<CellValue, WorkbookError> {
        Ok(self
            .read_cells(path, std::slice::from_ref(cell))?
            .pop()
            .unwrap_or(CellValue::Empty))
    }

    fn read_cells(&self, path: &Path, cells: &[CellRef]) -> Result<Vec<CellValue>, WorkbookError> {
        let mut workbook = open_workbook_auto(path).map_err(|e| WorkbookError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let sheet_names = workbook.sheet_names();

        let mut values = Vec::with_capacity(cells.len());
        for cell in cells {
            if !sheet_names.iter().any(|s| s == &cell.sheet) {
                return Err(WorkbookError::MissingSheet {
                    path: path.to_path_buf(),
                    sheet: cell.sheet.clone(),
                });
            }
            let range = workbook
                .worksheet_range(&cell.sheet)
                .map_err(|e| WorkbookError::Open {
                    path: path.to_path_buf(),
                    message: format!("sheet '{}': {}", cell.sheet, e),
                })?;
            let value = range
                .get_value((cell.row, cell.col as u32))
                .map(data_to_value)
                .unwrap_or(CellValue::Empty);
            debug!("Read {} from {}: {:?}", cell, path.display(), value);
            values.push(value);
        }
        Ok(values)
    }

    fn write_cells(
        &self,
        source: &Path,
        destination: &Path,
        writes: &[(CellRef, CellValue)],
    ) -> Result<(), WorkbookError> {
        let WorkbookSnapshot {
            mut sheets,
            defined_names,
        } = Self::snapshot(source)?;

        for (cell, value) in writes {
            let index = match sheets.iter().position(|s| s.name == cell.sheet) {
                Some(index) => index,
                None => {
                    sheets.push(SheetSnapshot {
                        name: cell.sheet.clone(),
                        ..Default::default()
                    });
                    sheets.len() - 1
                }
            };
            sheets[index]
                .cells
                .insert((cell.row, cell.col), SnapshotCell::Value(value.clone()));
        }

        let write_err = |e: rust_xlsxwriter::XlsxError| WorkbookError::Write {
            path: destination.to_path_buf(),
            message: e.to_string(),
        };

        let first_visible = sheets.iter().position(|s| !s.hidden);
        let mut workbook = Workbook::new();
        for (index, sheet) in sheets.iter().enumerate() {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name).map_err(write_err)?;

            // Merges first: merge_range blanks the region, the cell pass below refills it.
            let blank = Format::new();
            for &(first_row, first_col, last_row, last_col) in &sheet.merges {
                if let Err(e) =
                    worksheet.merge_range(first_row, first_col, last_row, last_col, "", &blank)
                {
                    warn!(
                        "Skipping merged region on sheet '{}' of {}: {}",
                        sheet.name,
                        source.display(),
                        e
                    );
                }
            }

            for (&(row, col), cell) in &sheet.cells {
                match cell {
                    SnapshotCell::Value(CellValue::Empty) => {}
                    SnapshotCell::Value(CellValue::Text(s)) => {
                        worksheet.write_string(row, col, s).map_err(write_err)?;
                    }
                    SnapshotCell::Value(CellValue::Number(n)) => {
                        worksheet.write_number(row, col, *n).map_err(write_err)?;
                    }
                    SnapshotCell::Value(CellValue::Bool(b)) => {
                        worksheet.write_boolean(row, col, *b).map_err(write_err)?;
                    }
                    SnapshotCell::Formula(f) => {
                        worksheet
                            .write_formula(row, col, Formula::new(f))
                            .map_err(write_err)?;
                    }
                }
            }

            if Some(index) == first_visible {
                worksheet.set_active(true);
            } else if sheet.hidden {
                worksheet.set_hidden(true);
            }
        }

        let mut seen = HashSet::new();
        for (name, formula) in &defined_names {
            if name.is_empty() || name.starts_with(BUILTIN_NAME_PREFIX) {
                continue;
            }
            if !seen.insert(name.as_str()) {
                debug!("Defined name '{}' repeats in {}; keeping the first", name, source.display());
                continue;
            }
            if let Err(e) = workbook.define_name(name.as_str(), formula) {
                warn!(
                    "Skipping defined name '{}' from {}: {}",
                    name,
                    source.display(),
                    e
                );
            }
        }

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| WorkbookError::Write {
                    path: destination.to_path_buf(),
                    message: e.to_string(),
                })?;
            }
        }
        workbook.save(destination).map_err(write_err)?;
        debug!(
            "Saved {} with {} stamped cell(s) to {}",
            source.display(),
            writes.len(),
            destination.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::{open_workbook, Dimensions, Xlsx};
    use tempfile::tempdir;

    fn write_proforma(path: &Path, name: &str, beds: f64) {
        let mut workbook = Workbook::new();
        let info = workbook.add_worksheet();
        info.set_name("FACILITY INFO").unwrap();
        info.write_string(6, 1, name).unwrap();
        info.write_number(9, 1, beds).unwrap();
        info.write_formula(10, 1, Formula::new("=B10*2")).unwrap();
        let upload = workbook.add_worksheet();
        upload.set_name("DW Upload").unwrap();
        upload.write_string(2, 0, "Deal ID").unwrap();
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_reads_fixed_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("AZ - Devon Gables Proforma.xlsx");
        write_proforma(&path, "Devon Gables Rehabilitation", 118.0);

        let store = XlsxStore::new();
        let cells = [
            CellRef::parse("FACILITY INFO", "B7").unwrap(),
            CellRef::parse("FACILITY INFO", "B10").unwrap(),
            CellRef::parse("FACILITY INFO", "Z99").unwrap(),
        ];
        let values = store.read_cells(&path, &cells).unwrap();
        assert_eq!(values[0], CellValue::Text("Devon Gables Rehabilitation".into()));
        assert_eq!(values[1].as_number(), Some(118.0));
        assert_eq!(values[2], CellValue::Empty);
    }

    #[test]
    fn test_missing_sheet_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.xlsx");
        write_proforma(&path, "Devon Gables", 118.0);

        let store = XlsxStore::new();
        let cell = CellRef::parse("NOT THERE", "A1").unwrap();
        assert!(matches!(
            store.read_cell(&path, &cell),
            Err(WorkbookError::MissingSheet { .. })
        ));
        assert!(matches!(
            store.read_cell(&dir.path().join("missing.xlsx"), &cell),
            Err(WorkbookError::Open { .. })
        ));
    }

    #[test]
    fn test_write_cells_saves_stamped_copy() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("p.xlsx");
        let destination = dir.path().join("out").join("42 - Devon Gables.xlsx");
        write_proforma(&source, "Devon Gables", 118.0);

        let store = XlsxStore::new();
        let deal_cell = CellRef::parse("DW Upload", "B3").unwrap();
        let marker_cell = CellRef::parse("DW Upload", "B4").unwrap();
        store
            .write_cells(
                &source,
                &destination,
                &[
                    (deal_cell.clone(), CellValue::from("42")),
                    (marker_cell.clone(), CellValue::from("default")),
                ],
            )
            .unwrap();

        let name = CellRef::parse("FACILITY INFO", "B7").unwrap();
        let label = CellRef::parse("DW Upload", "A3").unwrap();
        let values = store
            .read_cells(&destination, &[deal_cell, marker_cell, name, label])
            .unwrap();
        assert_eq!(values[0], CellValue::Text("42".into()));
        assert_eq!(values[1], CellValue::Text("default".into()));
        assert_eq!(values[2], CellValue::Text("Devon Gables".into()));
        assert_eq!(values[3], CellValue::Text("Deal ID".into()));
    }

    #[test]
    fn test_copy_keeps_names_merges_and_hidden_sheets() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("p.xlsx");
        let destination = dir.path().join("42 - Devon Gables.xlsx");

        let mut workbook = Workbook::new();
        let info = workbook.add_worksheet();
        info.set_name("FACILITY INFO").unwrap();
        info.merge_range(0, 0, 0, 2, "Facility Overview", &Format::new())
            .unwrap();
        info.write_string(6, 1, "Devon Gables").unwrap();
        let report = workbook.add_worksheet();
        report.set_name("60-Month Report").unwrap();
        for row in 0..3 {
            report.write_number(row, 0, 100.0 * (row + 1) as f64).unwrap();
        }
        let lookups = workbook.add_worksheet();
        lookups.set_name("Lookups").unwrap();
        lookups.write_string(0, 0, "AZ").unwrap();
        lookups.set_hidden(true);
        let upload = workbook.add_worksheet();
        upload.set_name("DW Upload").unwrap();
        upload.write_string(2, 0, "Deal ID").unwrap();
        upload
            .write_formula(3, 0, Formula::new("=SUM(Budget60Month)"))
            .unwrap();
        workbook
            .define_name("Budget60Month", "='60-Month Report'!$A$1:$A$3")
            .unwrap();
        workbook.save(&source).unwrap();

        XlsxStore::new()
            .write_cells(
                &source,
                &destination,
                &[(CellRef::parse("DW Upload", "B3").unwrap(), CellValue::from("42"))],
            )
            .unwrap();

        let mut copy: Xlsx<_> = open_workbook(&destination).unwrap();
        assert!(copy.defined_names().contains(&(
            "Budget60Month".to_string(),
            "'60-Month Report'!$A$1:$A$3".to_string()
        )));

        let formulas = copy.worksheet_formula("DW Upload").unwrap();
        assert_eq!(
            formulas.get_value((3, 0)).map(String::as_str),
            Some("SUM(Budget60Month)")
        );

        let merges = copy.worksheet_merge_cells("FACILITY INFO").unwrap().unwrap();
        assert_eq!(
            merges,
            vec![Dimensions {
                start: (0, 0),
                end: (0, 2)
            }]
        );
        let overview = copy.worksheet_range("FACILITY INFO").unwrap();
        assert_eq!(
            overview.get_value((0, 0)),
            Some(&Data::String("Facility Overview".into()))
        );

        let visibility: Vec<(String, SheetVisible)> = copy
            .sheets_metadata()
            .iter()
            .map(|s| (s.name.clone(), s.visible))
            .collect();
        assert_eq!(
            visibility,
            vec![
                ("FACILITY INFO".to_string(), SheetVisible::Visible),
                ("60-Month Report".to_string(), SheetVisible::Visible),
                ("Lookups".to_string(), SheetVisible::Hidden),
                ("DW Upload".to_string(), SheetVisible::Visible),
            ]
        );
    }
}
