// src/linkage/candidates.rs - Proforma discovery inside a deal folder
use anyhow::{Context, Result};
use glob::{glob, Pattern};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{CandidateFile, CandidateKey};
use crate::workbook::{CellRef, WorkbookError, WorkbookStore};

#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("Unreadable candidate {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: WorkbookError,
    },
}

/// Where the facility attributes live inside a proforma.
#[derive(Debug, Clone)]
pub struct CandidateLayout {
    pub suffix: String,
    pub name_cell: CellRef,
    pub beds_cell: CellRef,
}

/// Candidate files found in one folder plus the number that could not be read.
#[derive(Debug, Default)]
pub struct DiscoveredCandidates {
    pub candidates: Vec<CandidateFile>,
    pub unreadable: usize,
}

/// Lists `*{suffix}.xlsx` files in `folder`, sorted by path.
pub fn list_proformas(folder: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        anyhow::bail!("Deal folder {} does not exist or is not a directory", folder.display());
    }
    let pattern = format!(
        "{}/*{}.xlsx",
        Pattern::escape(&folder.to_string_lossy()),
        Pattern::escape(suffix)
    );
    let mut paths = Vec::new();
    for entry in glob(&pattern).with_context(|| format!("Invalid proforma pattern {}", pattern))? {
        let path = entry.with_context(|| format!("Failed to read entry in {}", folder.display()))?;
        // Excel lock files ("~$...") match the pattern but are not workbooks.
        let is_lock_file = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with("~$"))
            .unwrap_or(false);
        if path.is_file() && !is_lock_file {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Facility name as written in the file name: `"{group} - {facility} {suffix}.xlsx"`
/// yields `"{facility}"`; names without a `" - "` separator use the whole stem.
pub fn parse_display_name(path: &Path, suffix: &str) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name
        .strip_suffix(".xlsx")
        .or_else(|| file_name.strip_suffix(".XLSX"))
        .unwrap_or(&file_name);

    let segments: Vec<&str> = stem.split(" - ").collect();
    let name = if segments.len() > 1 { segments[1] } else { stem };

    let trimmed = name.trim();
    let without_suffix = if !suffix.is_empty()
        && trimmed.len() >= suffix.len()
        && trimmed.is_char_boundary(trimmed.len() - suffix.len())
        && trimmed[trimmed.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
    {
        &trimmed[..trimmed.len() - suffix.len()]
    } else {
        trimmed
    };
    without_suffix
        .trim_end_matches(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .trim()
        .to_string()
}

/// Reads the in-file facility name and bed count of one proforma.
pub fn extract_candidate<W: WorkbookStore>(
    store: &W,
    path: &Path,
    layout: &CandidateLayout,
) -> Result<CandidateFile, CandidateError> {
    let cells = [layout.name_cell.clone(), layout.beds_cell.clone()];
    let values = store
        .read_cells(path, &cells)
        .map_err(|source| CandidateError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

    let in_file_name = values.first().and_then(|v| v.as_text());
    let in_file_bed_count = values.get(1).and_then(|v| v.as_number());
    if in_file_bed_count.is_none() {
        debug!(
            "Bed count in {} at {} did not parse: {:?}",
            path.display(),
            layout.beds_cell,
            values.get(1)
        );
    }

    Ok(CandidateFile {
        key: CandidateKey::generate(),
        file_display_name: parse_display_name(path, &layout.suffix),
        in_file_name,
        in_file_bed_count,
        path: path.to_path_buf(),
    })
}

/// Discovers and reads every proforma in a deal folder. Unreadable files are
/// skipped with a warning; an unreadable folder is an error for the caller.
pub fn discover_candidates<W: WorkbookStore>(
    store: &W,
    folder: &Path,
    layout: &CandidateLayout,
) -> Result<DiscoveredCandidates> {
    let mut discovered = DiscoveredCandidates::default();
    for path in list_proformas(folder, &layout.suffix)? {
        match extract_candidate(store, &path, layout) {
            Ok(candidate) => {
                debug!(
                    "Candidate {}: file name {:?}, in-file name {:?}, beds {:?}",
                    candidate.key,
                    candidate.file_display_name,
                    candidate.in_file_name,
                    candidate.in_file_bed_count
                );
                discovered.candidates.push(candidate);
            }
            Err(e) => {
                warn!("Skipping candidate: {}", e);
                discovered.unreadable += 1;
            }
        }
    }
    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::CellValue;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    struct MapStore(HashMap<PathBuf, (CellValue, CellValue)>);

    impl WorkbookStore for MapStore {
        fn read_cell(&self, path: &Path, cell: &CellRef) -> Result<CellValue, WorkbookError> {
            let (name, beds) = self.0.get(path).ok_or_else(|| WorkbookError::MissingSheet {
                path: path.to_path_buf(),
                sheet: cell.sheet.clone(),
            })?;
            Ok(if cell.row == 6 { name.clone() } else { beds.clone() })
        }

        fn write_cells(&self, _: &Path, _: &Path, _: &[(CellRef, CellValue)]) -> Result<(), WorkbookError> {
            Ok(())
        }
    }

    fn layout() -> CandidateLayout {
        CandidateLayout {
            suffix: "Proforma".to_string(),
            name_cell: CellRef::parse("FACILITY INFO", "B7").unwrap(),
            beds_cell: CellRef::parse("FACILITY INFO", "B10").unwrap(),
        }
    }

    #[test]
    fn test_parse_display_name() {
        let suffix = "Proforma";
        assert_eq!(
            parse_display_name(Path::new("/p/RealSG AZ-4 - Devon Gables Proforma.xlsx"), suffix),
            "Devon Gables"
        );
        assert_eq!(
            parse_display_name(Path::new("Devon Gables - Proforma.xlsx"), suffix),
            ""
        );
        assert_eq!(
            parse_display_name(Path::new("Sunrise Manor Proforma.xlsx"), suffix),
            "Sunrise Manor"
        );
        assert_eq!(
            parse_display_name(Path::new("A - Elm Ridge - v2 Proforma.xlsx"), suffix),
            "Elm Ridge"
        );
    }

    #[test]
    fn test_list_proformas_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in [
            "B - Sunrise Manor Proforma.xlsx",
            "A - Devon Gables Proforma.xlsx",
            "notes.xlsx",
            "~$A - Devon Gables Proforma.xlsx",
            "Budget Proforma.csv",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let paths = list_proformas(dir.path(), "Proforma").unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["A - Devon Gables Proforma.xlsx", "B - Sunrise Manor Proforma.xlsx"]);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(list_proformas(&dir.path().join("gone"), "Proforma").is_err());
    }

    #[test]
    fn test_discover_skips_unreadable_files() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("A - Devon Gables Proforma.xlsx");
        let bad = dir.path().join("B - Broken Proforma.xlsx");
        fs::write(&good, b"").unwrap();
        fs::write(&bad, b"").unwrap();

        let mut cells = HashMap::new();
        cells.insert(
            good.clone(),
            (CellValue::from("Devon Gables Rehabilitation"), CellValue::Text("118".into())),
        );
        let store = MapStore(cells);

        let discovered = discover_candidates(&store, dir.path(), &layout()).unwrap();
        assert_eq!(discovered.unreadable, 1);
        assert_eq!(discovered.candidates.len(), 1);
        let candidate = &discovered.candidates[0];
        assert_eq!(candidate.file_display_name, "Devon Gables");
        assert_eq!(candidate.in_file_name.as_deref(), Some("Devon Gables Rehabilitation"));
        assert_eq!(candidate.in_file_bed_count, Some(118.0));
        assert_eq!(candidate.path, good);
    }

    #[test]
    fn test_unparseable_beds_are_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("A - Devon Gables Proforma.xlsx");
        let mut cells = HashMap::new();
        cells.insert(path.clone(), (CellValue::from("Devon Gables"), CellValue::from("TBD")));
        let candidate = extract_candidate(&MapStore(cells), &path, &layout()).unwrap();
        assert_eq!(candidate.in_file_bed_count, None);
    }
}
