// src/linkage/unmatched.rs - Append-only log of deals that found no proforma
use anyhow::{Context, Result};
use chrono::Local;
use log::warn;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::UnmatchedReason;

#[derive(Debug, Default)]
pub struct UnmatchedLog {
    path: Option<PathBuf>,
    lines: Vec<String>,
}

impl UnmatchedLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            lines: Vec::new(),
        }
    }

    /// Records one unmatched deal. A failed file append is logged and the line is kept in memory.
    pub fn record(&mut self, deal_id: &str, deal_name: &str, reason: &UnmatchedReason) {
        let line = format!(
            "{} - Deal ID {} ({}): {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            deal_id,
            deal_name,
            reason
        );
        if let Err(e) = self.append_to_file(&line) {
            warn!("Failed to write unmatched log entry for deal {}: {:#}", deal_id, e);
        }
        self.lines.push(line);
    }

    fn append_to_file(&self, line: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Stops appending to the backing file; later lines are kept in memory only.
    pub fn detach(&mut self) {
        self.path = None;
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_appends_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("unmatched_deals.log");

        let mut log = UnmatchedLog::at(&path);
        log.record("7", "Totally Different Facility", &UnmatchedReason::NoConfidentMatch);
        let mut again = UnmatchedLog::at(&path);
        again.record("8", "Elm Ridge", &UnmatchedReason::BedMismatch);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Deal ID 7 (Totally Different Facility): no candidate above threshold"));
        assert!(lines[1].contains("Deal ID 8"));
        // "YYYY-MM-DD HH:MM:SS - "
        assert_eq!(&lines[0][4..5], "-");
        assert_eq!(&lines[0][19..22], " - ");
    }

    #[test]
    fn test_in_memory_log_keeps_lines() {
        let mut log = UnmatchedLog::in_memory();
        log.record("9", "Sunrise Manor", &UnmatchedReason::NoCandidates);
        assert_eq!(log.lines().len(), 1);
        assert!(log.path().is_none());
    }

    #[test]
    fn test_detached_log_leaves_file_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unmatched_deals.log");
        let mut log = UnmatchedLog::at(&path);
        log.detach();
        log.record("7", "Elm Ridge", &UnmatchedReason::NoConfidentMatch);
        assert_eq!(log.lines().len(), 1);
        assert!(!path.exists());
    }
}
