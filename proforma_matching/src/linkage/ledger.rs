// src/linkage/ledger.rs - Record of confirmed deal-to-file matches
use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::LedgerEntry;

/// Identity of a matched file for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    beds: Option<u64>,
    file_display_name: String,
    file_path: String,
}

impl LedgerKey {
    fn new(beds: Option<f64>, file_display_name: &str, file_path: &str) -> Self {
        Self {
            beds: beds.map(f64::to_bits),
            file_display_name: file_display_name.to_string(),
            file_path: file_path.to_string(),
        }
    }
}

/// Append-only ledger, optionally mirrored to a CSV that is rewritten in full
/// after every append.
#[derive(Debug, Default)]
pub struct MatchLedger {
    entries: Vec<LedgerEntry>,
    keys: HashSet<LedgerKey>,
    export_path: Option<PathBuf>,
}

impl MatchLedger {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens a ledger mirrored at `path`, loading entries from an earlier run if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut ledger = Self {
            export_path: Some(path.clone()),
            ..Default::default()
        };
        if path.exists() {
            let mut reader = csv::Reader::from_path(&path)
                .with_context(|| format!("Failed to open ledger {}", path.display()))?;
            for record in reader.deserialize::<LedgerEntry>() {
                let entry = record
                    .with_context(|| format!("Malformed ledger row in {}", path.display()))?;
                ledger.insert(entry);
            }
            info!(
                "Loaded {} previously confirmed match(es) from {}",
                ledger.entries.len(),
                path.display()
            );
        }
        Ok(ledger)
    }

    pub fn is_duplicate(&self, beds: Option<f64>, file_display_name: &str, path: &Path) -> bool {
        self.keys
            .contains(&LedgerKey::new(beds, file_display_name, &path.to_string_lossy()))
    }

    /// Records a confirmed match and mirrors the ledger if it has a backing file.
    /// A failed mirror is logged; the in-memory entry stands.
    pub fn append(
        &mut self,
        deal_id: &str,
        beds: Option<f64>,
        file_display_name: &str,
        path: &Path,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            deal_id: deal_id.to_string(),
            bed_count: beds,
            file_display_name: file_display_name.to_string(),
            file_path: path.to_string_lossy().into_owned(),
        };
        self.insert(entry.clone());
        if let Err(e) = self.flush() {
            warn!("Failed to mirror match ledger: {:#}", e);
        }
        entry
    }

    fn insert(&mut self, entry: LedgerEntry) {
        self.keys.insert(LedgerKey::new(
            entry.bed_count,
            &entry.file_display_name,
            &entry.file_path,
        ));
        self.entries.push(entry);
    }

    /// Rewrites the backing CSV with every entry.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.export_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create ledger {}", path.display()))?;
        if self.entries.is_empty() {
            writer.write_record(["Deal ID", "Beds", "File Name", "File Path"])?;
        }
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Stops mirroring; used for dry runs.
    pub fn detach(&mut self) {
        self.export_path = None;
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn export_path(&self) -> Option<&Path> {
        self.export_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_then_duplicate() {
        let mut ledger = MatchLedger::in_memory();
        let path = Path::new("/deals/az/A - Devon Gables Proforma.xlsx");
        assert!(!ledger.is_duplicate(Some(118.0), "Devon Gables", path));

        let entry = ledger.append("42", Some(118.0), "Devon Gables", path);
        assert_eq!(entry.deal_id, "42");
        assert!(ledger.is_duplicate(Some(118.0), "Devon Gables", path));

        // Any differing field is a different file.
        assert!(!ledger.is_duplicate(Some(120.0), "Devon Gables", path));
        assert!(!ledger.is_duplicate(Some(118.0), "Devon Gables East", path));
        assert!(!ledger.is_duplicate(Some(118.0), "Devon Gables", Path::new("/other.xlsx")));
        assert!(!ledger.is_duplicate(None, "Devon Gables", path));
    }

    #[test]
    fn test_csv_mirror_round_trips_across_runs() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("reports").join("proforma_matches_2024-11-01.csv");
        let file = dir.path().join("A - Devon Gables Proforma.xlsx");

        let mut ledger = MatchLedger::open(&csv_path).unwrap();
        assert!(ledger.is_empty());
        ledger.append("42", Some(118.0), "Devon Gables", &file);
        ledger.append("43", None, "Sunrise Manor", Path::new("/x/Sunrise Manor Proforma.xlsx"));

        let contents = std::fs::read_to_string(&csv_path).unwrap();
        assert!(contents.starts_with("Deal ID,Beds,File Name,File Path"));
        assert_eq!(contents.lines().count(), 3);

        let reopened = MatchLedger::open(&csv_path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.entries(), ledger.entries());
        assert!(reopened.is_duplicate(Some(118.0), "Devon Gables", &file));
    }

    #[test]
    fn test_detached_ledger_writes_nothing() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("ledger.csv");
        let mut ledger = MatchLedger::open(&csv_path).unwrap();
        ledger.detach();
        ledger.append("42", Some(118.0), "Devon Gables", Path::new("/a.xlsx"));
        assert!(!csv_path.exists());
        assert_eq!(ledger.len(), 1);
    }
}
