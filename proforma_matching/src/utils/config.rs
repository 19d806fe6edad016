// src/utils/config.rs - Environment-driven settings for a linkage run
use anyhow::{Context, Result};
use chrono::NaiveDate;
use glob::Pattern;
use log::{info, warn};
use std::env;
use std::path::PathBuf;

use crate::linkage::candidates::CandidateLayout;
use crate::linkage::review::ReviewMode;
use crate::matching::{CandidateMatcher, NameNormalizer, SimilarityScorer};
use crate::workbook::CellRef;

/// Tunable cut-offs of the matching cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchThresholds {
    /// Deal name vs file display name.
    pub file_name: f64,
    /// Deal name vs in-file name when bed counts agree.
    pub in_file: f64,
    /// Deal name vs in-file name when bed counts disagree.
    pub in_file_beds_far: f64,
    /// Deal name vs the whole pool of in-file names.
    pub fallback: f64,
    /// Bed counts closer than this corroborate a name match.
    pub bed_proximity: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            file_name: 98.0,
            in_file: 95.0,
            in_file_beds_far: 98.0,
            fallback: 85.0,
            bed_proximity: 6.0,
        }
    }
}

impl MatchThresholds {
    /// A missing bed count on either side never counts as near.
    pub fn beds_near(&self, deal_beds: Option<f64>, file_beds: Option<f64>) -> bool {
        match (deal_beds, file_beds) {
            (Some(a), Some(b)) => (a - b).abs() < self.bed_proximity,
            _ => false,
        }
    }
}

/// Sheet and cell positions inside a proforma.
#[derive(Debug, Clone)]
pub struct ProformaLayout {
    pub suffix: String,
    pub facility_name_cell: CellRef,
    pub facility_beds_cell: CellRef,
    pub upload_deal_id_cell: CellRef,
    pub upload_marker_cell: CellRef,
    pub upload_marker_value: String,
}

impl ProformaLayout {
    pub fn candidate_layout(&self) -> CandidateLayout {
        CandidateLayout {
            suffix: self.suffix.clone(),
            name_cell: self.facility_name_cell.clone(),
            beds_cell: self.facility_beds_cell.clone(),
        }
    }
}

impl Default for ProformaLayout {
    fn default() -> Self {
        // Addresses below are constants known to parse.
        let cell = |sheet: &str, address: &str, row: u32, col: u16| {
            CellRef::parse(sheet, address).unwrap_or(CellRef {
                sheet: sheet.to_string(),
                row,
                col,
            })
        };
        Self {
            suffix: "Proforma".to_string(),
            facility_name_cell: cell("FACILITY INFO", "B7", 6, 1),
            facility_beds_cell: cell("FACILITY INFO", "B10", 9, 1),
            upload_deal_id_cell: cell("DW Upload", "B3", 2, 1),
            upload_marker_cell: cell("DW Upload", "B4", 3, 1),
            upload_marker_value: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkageConfig {
    pub thresholds: MatchThresholds,
    pub layout: ProformaLayout,
    pub output_dir: PathBuf,
    pub report_dir: PathBuf,
    /// Replaces the default normalizer vocabulary when set.
    pub stopwords: Option<Vec<String>>,
    pub review_mode: ReviewMode,
    pub deal_table: String,
    pub proforma_table: String,
    pub dry_run: bool,
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            thresholds: MatchThresholds::default(),
            layout: ProformaLayout::default(),
            output_dir: PathBuf::from("./output"),
            report_dir: PathBuf::from("./reports"),
            stopwords: None,
            review_mode: ReviewMode::Defer,
            deal_table: "public.deal".to_string(),
            proforma_table: "public.proforma".to_string(),
            dry_run: false,
        }
    }
}

impl LinkageConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; unset or unparseable
    /// numbers fall back to their defaults, malformed cells and modes are errors.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let number = |key: &str, default: f64| -> f64 {
            match lookup(key).map(|v| v.trim().parse::<f64>()) {
                Some(Ok(v)) if v.is_finite() && v >= 0.0 => v,
                Some(_) => {
                    warn!("Ignoring invalid {}; using {}", key, default);
                    default
                }
                None => default,
            }
        };

        let thresholds = MatchThresholds {
            file_name: number("MATCH_FILE_NAME_THRESHOLD", defaults.thresholds.file_name),
            in_file: number("MATCH_IN_FILE_THRESHOLD", defaults.thresholds.in_file),
            in_file_beds_far: number(
                "MATCH_IN_FILE_BEDS_FAR_THRESHOLD",
                defaults.thresholds.in_file_beds_far,
            ),
            fallback: number("MATCH_FALLBACK_THRESHOLD", defaults.thresholds.fallback),
            bed_proximity: number("MATCH_BED_PROXIMITY", defaults.thresholds.bed_proximity),
        };

        let facility_sheet = get("FACILITY_SHEET", "FACILITY INFO");
        let upload_sheet = get("UPLOAD_SHEET", "DW Upload");
        let cell = |sheet: &str, key: &str, default: &str| -> Result<CellRef> {
            let address = get(key, default);
            CellRef::parse(sheet, &address).with_context(|| format!("Invalid {}", key))
        };
        let layout = ProformaLayout {
            suffix: get("PROFORMA_SUFFIX", &defaults.layout.suffix),
            facility_name_cell: cell(&facility_sheet, "FACILITY_NAME_CELL", "B7")?,
            facility_beds_cell: cell(&facility_sheet, "FACILITY_BEDS_CELL", "B10")?,
            upload_deal_id_cell: cell(&upload_sheet, "UPLOAD_DEAL_ID_CELL", "B3")?,
            upload_marker_cell: cell(&upload_sheet, "UPLOAD_MARKER_CELL", "B4")?,
            upload_marker_value: get("UPLOAD_MARKER_VALUE", &defaults.layout.upload_marker_value),
        };

        let stopwords = lookup("FACILITY_STOPWORDS").map(|list| {
            list.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        });

        let review_mode = get("REVIEW_MODE", "defer")
            .parse::<ReviewMode>()
            .context("Invalid REVIEW_MODE")?;

        Ok(Self {
            thresholds,
            layout,
            output_dir: PathBuf::from(get("PROFORMA_OUTPUT_DIR", "./output")),
            report_dir: PathBuf::from(get("LINKAGE_REPORT_DIR", "./reports")),
            stopwords,
            review_mode,
            deal_table: get("DEAL_TABLE", &defaults.deal_table),
            proforma_table: get("PROFORMA_TABLE", &defaults.proforma_table),
            dry_run: false,
        })
    }

    pub fn build_matcher(&self) -> Result<CandidateMatcher> {
        let normalizer = match &self.stopwords {
            Some(words) => NameNormalizer::with_vocabulary(words)?,
            None => NameNormalizer::default(),
        };
        Ok(CandidateMatcher::new(SimilarityScorer::new(normalizer)))
    }

    pub fn ledger_path(&self, date: NaiveDate) -> PathBuf {
        self.report_dir
            .join(format!("proforma_matches_{}.csv", date.format("%Y-%m-%d")))
    }

    pub fn unmatched_log_path(&self) -> PathBuf {
        self.report_dir.join("unmatched_deals.log")
    }

    pub fn review_queue_path(&self, date: NaiveDate) -> PathBuf {
        self.report_dir
            .join(format!("manual_review_{}.csv", date.format("%Y-%m-%d")))
    }

    /// Glob over every dated review queue, reviewed or not.
    pub fn review_queue_pattern(&self) -> String {
        format!(
            "{}/manual_review_*.csv",
            Pattern::escape(&self.report_dir.to_string_lossy())
        )
    }

    /// Log the current configuration
    pub fn log_config(&self) {
        let t = &self.thresholds;
        info!(
            "🔧 Thresholds: file name {}, in-file {}, in-file (beds far) {}, fallback {}, bed proximity <{}",
            t.file_name, t.in_file, t.in_file_beds_far, t.fallback, t.bed_proximity
        );
        info!(
            "   Proformas: *{}.xlsx, name {}, beds {}, stamp {} / {} = {:?}",
            self.layout.suffix,
            self.layout.facility_name_cell,
            self.layout.facility_beds_cell,
            self.layout.upload_deal_id_cell,
            self.layout.upload_marker_cell,
            self.layout.upload_marker_value
        );
        info!(
            "   Output: {}, reports: {}, review mode: {:?}",
            self.output_dir.display(),
            self.report_dir.display(),
            self.review_mode
        );
        if let Some(words) = &self.stopwords {
            info!("   Custom stopword vocabulary: {:?}", words);
        }
        if self.dry_run {
            info!("🧪 DRY RUN - no proforma will be written and the ledger will not be saved");
        }
    }
}
