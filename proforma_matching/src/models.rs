// src/models.rs - Records flowing through a linkage run
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// A deal row from the acquisition database.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityRecord {
    pub id: String,
    pub name: String,
    pub bed_count: Option<f64>,
    /// Folder holding the deal's proforma files.
    pub file_path: Option<String>,
}

impl FacilityRecord {
    /// The folder to scan, if the record carries a usable one.
    pub fn folder(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Stable identity of a discovered candidate file, generated at discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandidateKey(Uuid);

impl CandidateKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A proforma spreadsheet found in a deal folder, with the attributes read from it.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub key: CandidateKey,
    pub file_display_name: String,
    pub in_file_name: Option<String>,
    pub in_file_bed_count: Option<f64>,
    pub path: PathBuf,
}

/// Every signal computed when two facility names are compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub token_score: f64,
    pub sequence_score: f64,
    pub levenshtein_distance: usize,
    pub phonetic_equal: bool,
    pub composite_score: f64,
}

/// A confirmed deal-to-file link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "Deal ID")]
    pub deal_id: String,
    #[serde(rename = "Beds")]
    pub bed_count: Option<f64>,
    #[serde(rename = "File Name")]
    pub file_display_name: String,
    #[serde(rename = "File Path")]
    pub file_path: String,
}

/// Positions of the per-deal decision procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealState {
    Start,
    FileNameMatched,
    BedConfirmed,
    InFileConfirmed,
    NeedsManual,
    Rejected,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoFilePath,
    AlreadyLoaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmatchedReason {
    /// The folder held no readable, unrecorded proforma.
    NoCandidates,
    NoConfidentMatch,
    /// Two independent name fields disagreed and review did not confirm.
    AmbiguousMatch,
    BedMismatch,
    UnexpectedFailure(String),
}

impl fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedReason::NoCandidates => write!(f, "no readable proforma candidates"),
            UnmatchedReason::NoConfidentMatch => write!(f, "no candidate above threshold"),
            UnmatchedReason::AmbiguousMatch => write!(f, "name fields disagree, not confirmed"),
            UnmatchedReason::BedMismatch => write!(f, "bed counts too far apart"),
            UnmatchedReason::UnexpectedFailure(e) => write!(f, "unexpected failure: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DealOutcome {
    Skipped(SkipReason),
    Matched {
        entry: LedgerEntry,
        states: Vec<DealState>,
    },
    Unmatched {
        reason: UnmatchedReason,
        states: Vec<DealState>,
    },
}

impl DealOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, DealOutcome::Matched { .. })
    }

    pub fn states(&self) -> &[DealState] {
        match self {
            DealOutcome::Matched { states, .. } | DealOutcome::Unmatched { states, .. } => states,
            DealOutcome::Skipped(_) => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub deals_total: usize,
    pub skipped_no_path: usize,
    pub skipped_already_loaded: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub reviews_requested: usize,
    pub reviews_deferred: usize,
    pub unreadable_candidates: usize,
    pub duplicate_candidates: usize,
}
