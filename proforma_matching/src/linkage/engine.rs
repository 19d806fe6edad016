// src/linkage/engine.rs - Per-deal decision cascade linking deals to proforma files
//
// Layer 1 matches the deal name against file display names and confirms the
// winner through its in-file name and bed count. Layer 2 falls back to the
// in-file names of whatever is left in the pool. The first accepted candidate
// wins; every other outcome is contained to the deal that produced it.

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info};
use std::collections::HashSet;
use std::path::Path;

use crate::linkage::candidates::discover_candidates;
use crate::linkage::ledger::MatchLedger;
use crate::linkage::review::{ManualReview, ReviewDecision, ReviewRequest};
use crate::linkage::source::{restrict_to_ids, DealSource};
use crate::linkage::unmatched::UnmatchedLog;
use crate::matching::CandidateMatcher;
use crate::models::{
    CandidateFile, DealOutcome, DealState, FacilityRecord, LedgerEntry, RunSummary, SkipReason,
    UnmatchedReason,
};
use crate::utils::config::LinkageConfig;
use crate::utils::progress_bars::logging::LinkageLogger;
use crate::workbook::{CellValue, WorkbookStore};

const PATH_HOSTILE_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// `"{deal_id} - {deal_name}.xlsx"` with characters illegal in file names replaced by `_`.
pub fn output_file_name(deal_id: &str, deal_name: &str) -> String {
    format!("{} - {}", deal_id.trim(), deal_name.trim())
        .chars()
        .map(|c| if PATH_HOSTILE_CHARS.contains(&c) { '_' } else { c })
        .chain(".xlsx".chars())
        .collect()
}

/// Integer ids are stamped as numbers so the upload sheet can join on them.
fn deal_id_value(deal_id: &str) -> CellValue {
    let trimmed = deal_id.trim();
    match trimmed.parse::<i64>() {
        Ok(n) => CellValue::Number(n as f64),
        Err(_) => CellValue::Text(trimmed.to_string()),
    }
}

enum Verdict {
    Accept,
    Reject(UnmatchedReason),
}

enum Resolution {
    Accepted(LedgerEntry),
    Unmatched(UnmatchedReason),
}

struct StateTrace {
    deal_id: String,
    logger: LinkageLogger,
    states: Vec<DealState>,
}

impl StateTrace {
    fn new(deal_id: &str, logger: LinkageLogger) -> Self {
        Self {
            deal_id: deal_id.to_string(),
            logger,
            states: vec![DealState::Start],
        }
    }

    fn enter(&mut self, state: DealState) {
        let from = self.states.last().copied().unwrap_or(DealState::Start);
        self.logger.log_transition(&self.deal_id, from, state);
        self.states.push(state);
    }
}

pub struct LinkageEngine<W: WorkbookStore, R: ManualReview> {
    config: LinkageConfig,
    matcher: CandidateMatcher,
    store: W,
    reviewer: R,
    ledger: MatchLedger,
    unmatched: UnmatchedLog,
    logger: LinkageLogger,
    progress: Option<ProgressBar>,
    summary: RunSummary,
}

impl<W: WorkbookStore, R: ManualReview> LinkageEngine<W, R> {
    /// A dry-run configuration detaches the ledger from its file.
    pub fn new(
        config: LinkageConfig,
        matcher: CandidateMatcher,
        store: W,
        reviewer: R,
        mut ledger: MatchLedger,
        mut unmatched: UnmatchedLog,
    ) -> Self {
        if config.dry_run {
            ledger.detach();
            unmatched.detach();
        }
        Self {
            config,
            matcher,
            store,
            reviewer,
            ledger,
            unmatched,
            logger: LinkageLogger::new(),
            progress: None,
            summary: RunSummary::default(),
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressBar>) -> Self {
        self.progress = progress;
        self
    }

    pub fn ledger(&self) -> &MatchLedger {
        &self.ledger
    }

    pub fn unmatched_log(&self) -> &UnmatchedLog {
        &self.unmatched
    }

    pub fn reviewer(&self) -> &R {
        &self.reviewer
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Fetches deals and the already-loaded set, then runs the cascade over every deal.
    /// A non-empty `deal_ids` restricts the run to those deals.
    pub async fn run_with_source<S: DealSource>(
        &mut self,
        source: &S,
        deal_ids: &[String],
    ) -> Result<RunSummary> {
        self.logger.log_phase("Fetching deals", None);
        let deals = source.fetch_deals().await.context("Failed to fetch deals")?;
        self.logger.log_data_loaded(deals.len(), "deal");
        let loaded = source
            .fetch_loaded_acquisition_ids()
            .await
            .context("Failed to fetch already-loaded acquisitions")?;
        self.logger.log_data_loaded(loaded.len(), "loaded acquisition");

        let deals = restrict_to_ids(deals, deal_ids);
        if !deal_ids.is_empty() {
            info!("Restricted run to {} requested deal(s)", deals.len());
        }
        Ok(self.run(&deals, &loaded))
    }

    pub fn run(&mut self, deals: &[FacilityRecord], loaded: &HashSet<String>) -> RunSummary {
        self.logger.log_start(deals.len(), self.config.dry_run);
        self.logger.log_phase("Matching deals to proformas", None);
        if let Some(pb) = &self.progress {
            pb.set_length(deals.len() as u64);
        }

        for deal in deals {
            self.process_deal(deal, loaded);
            if let Some(pb) = &self.progress {
                pb.inc(1);
                pb.set_message(format!(
                    "{} matched, {} unmatched",
                    self.summary.matched, self.summary.unmatched
                ));
            }
        }

        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!(
                "{} matched, {} unmatched",
                self.summary.matched, self.summary.unmatched
            ));
        }
        self.logger.log_completion(&self.summary);
        self.summary.clone()
    }

    /// Runs one deal through the cascade. Never fails: errors become
    /// `UnmatchedReason::UnexpectedFailure` for this deal alone.
    pub fn process_deal(&mut self, deal: &FacilityRecord, loaded: &HashSet<String>) -> DealOutcome {
        self.summary.deals_total += 1;

        let Some(folder) = deal.folder() else {
            debug!("Deal {} has no file path, skipping", deal.id);
            self.summary.skipped_no_path += 1;
            return DealOutcome::Skipped(SkipReason::NoFilePath);
        };
        if loaded.contains(deal.id.trim()) {
            debug!("Deal {} already loaded, skipping", deal.id);
            self.summary.skipped_already_loaded += 1;
            return DealOutcome::Skipped(SkipReason::AlreadyLoaded);
        }

        let mut trace = StateTrace::new(&deal.id, self.logger.clone());
        let resolution = self
            .link_deal(deal, Path::new(folder), &mut trace)
            .unwrap_or_else(|e| {
                Resolution::Unmatched(UnmatchedReason::UnexpectedFailure(format!("{:#}", e)))
            });

        match resolution {
            Resolution::Accepted(entry) => {
                trace.enter(DealState::Done);
                self.summary.matched += 1;
                self.logger.log_accepted(&deal.id, &deal.name, &entry.file_path);
                DealOutcome::Matched {
                    entry,
                    states: trace.states,
                }
            }
            Resolution::Unmatched(reason) => {
                trace.enter(DealState::Rejected);
                self.summary.unmatched += 1;
                self.logger.log_unmatched(&deal.id, &deal.name, &reason);
                self.unmatched.record(&deal.id, &deal.name, &reason);
                DealOutcome::Unmatched {
                    reason,
                    states: trace.states,
                }
            }
        }
    }

    fn link_deal(
        &mut self,
        deal: &FacilityRecord,
        folder: &Path,
        trace: &mut StateTrace,
    ) -> Result<Resolution> {
        let layout = self.config.layout.candidate_layout();
        let discovered = discover_candidates(&self.store, folder, &layout)
            .with_context(|| format!("Failed to scan proformas for deal {}", deal.id))?;
        self.summary.unreadable_candidates += discovered.unreadable;

        let mut duplicates = 0;
        let mut pool: Vec<CandidateFile> = Vec::with_capacity(discovered.candidates.len());
        for candidate in discovered.candidates {
            if self.ledger.is_duplicate(
                candidate.in_file_bed_count,
                &candidate.file_display_name,
                &candidate.path,
            ) {
                debug!("{} is already in the ledger, skipping", candidate.path.display());
                duplicates += 1;
                continue;
            }
            pool.push(candidate);
        }
        self.summary.duplicate_candidates += duplicates;
        self.logger
            .log_candidates(&deal.id, pool.len(), discovered.unreadable, duplicates);
        if pool.is_empty() {
            return Ok(Resolution::Unmatched(UnmatchedReason::NoCandidates));
        }

        // Layer 1: file display names; a rejected winner leaves the pool.
        let mut last_rejection = None;
        while let Some(position) =
            self.match_display_name(deal, &pool, self.config.thresholds.file_name)
        {
            trace.enter(DealState::FileNameMatched);
            match self.confirm_file_name_match(deal, &pool, position, trace) {
                Verdict::Accept => {
                    return self
                        .accept(deal, &pool[position])
                        .map(Resolution::Accepted);
                }
                Verdict::Reject(reason) => {
                    debug!(
                        "Deal {}: rejected {} ({})",
                        deal.id,
                        pool[position].path.display(),
                        reason
                    );
                    pool.remove(position);
                    last_rejection = Some(reason);
                }
            }
        }

        // Layer 2: in-file names of what is left. Terminal.
        match self.fallback_match(deal, &pool, trace) {
            Some((position, Verdict::Accept)) => {
                self.accept(deal, &pool[position]).map(Resolution::Accepted)
            }
            Some((_, Verdict::Reject(reason))) => Ok(Resolution::Unmatched(reason)),
            None => Ok(Resolution::Unmatched(
                last_rejection.unwrap_or(UnmatchedReason::NoConfidentMatch),
            )),
        }
    }

    fn match_display_name(
        &self,
        deal: &FacilityRecord,
        pool: &[CandidateFile],
        threshold: f64,
    ) -> Option<usize> {
        let names: Vec<&str> = pool.iter().map(|c| c.file_display_name.as_str()).collect();
        self.matcher.match_best(&deal.name, &names, threshold).position
    }

    fn confirm_file_name_match(
        &mut self,
        deal: &FacilityRecord,
        pool: &[CandidateFile],
        position: usize,
        trace: &mut StateTrace,
    ) -> Verdict {
        let candidate = &pool[position];
        let thresholds = &self.config.thresholds;
        let beds_near = thresholds.beds_near(deal.bed_count, candidate.in_file_bed_count);
        let threshold = if beds_near {
            thresholds.in_file
        } else {
            thresholds.in_file_beds_far
        };
        if beds_near {
            trace.enter(DealState::BedConfirmed);
        }

        // Files sharing the winning display name compete on their in-file names;
        // the winner must be the same file.
        let siblings: Vec<&CandidateFile> = pool
            .iter()
            .filter(|c| c.file_display_name == candidate.file_display_name)
            .collect();
        let in_file_names: Vec<&str> = siblings
            .iter()
            .map(|c| c.in_file_name.as_deref().unwrap_or(""))
            .collect();
        let confirmed = self
            .matcher
            .match_best(&deal.name, &in_file_names, threshold)
            .position
            .map(|p| siblings[p].key)
            == Some(candidate.key);

        if confirmed {
            trace.enter(DealState::InFileConfirmed);
            return Verdict::Accept;
        }
        if beds_near {
            trace.enter(DealState::NeedsManual);
            self.review(deal, candidate, "file name matched but in-file name did not confirm")
        } else {
            Verdict::Reject(UnmatchedReason::BedMismatch)
        }
    }

    fn fallback_match(
        &mut self,
        deal: &FacilityRecord,
        pool: &[CandidateFile],
        trace: &mut StateTrace,
    ) -> Option<(usize, Verdict)> {
        let fallback = self.config.thresholds.fallback;
        let in_file_names: Vec<&str> = pool
            .iter()
            .map(|c| c.in_file_name.as_deref().unwrap_or(""))
            .collect();
        let position = self
            .matcher
            .match_best(&deal.name, &in_file_names, fallback)
            .position?;
        let candidate = &pool[position];

        if !self
            .config
            .thresholds
            .beds_near(deal.bed_count, candidate.in_file_bed_count)
        {
            debug!(
                "Deal {}: fallback match {} has beds {:?} vs deal {:?}",
                deal.id,
                candidate.path.display(),
                candidate.in_file_bed_count,
                deal.bed_count
            );
            return Some((position, Verdict::Reject(UnmatchedReason::BedMismatch)));
        }
        trace.enter(DealState::BedConfirmed);

        let cross_checked = self
            .match_display_name(deal, pool, fallback)
            .map(|p| pool[p].key)
            == Some(candidate.key);
        if cross_checked {
            trace.enter(DealState::InFileConfirmed);
            return Some((position, Verdict::Accept));
        }
        trace.enter(DealState::NeedsManual);
        Some((
            position,
            self.review(deal, candidate, "in-file name matched but file name did not"),
        ))
    }

    fn review(&mut self, deal: &FacilityRecord, candidate: &CandidateFile, reason: &str) -> Verdict {
        self.summary.reviews_requested += 1;
        let request = ReviewRequest {
            deal_id: deal.id.clone(),
            deal_name: deal.name.clone(),
            deal_beds: deal.bed_count,
            candidate_name: candidate
                .in_file_name
                .clone()
                .unwrap_or_else(|| candidate.file_display_name.clone()),
            candidate_beds: candidate.in_file_bed_count,
            file_path: candidate.path.to_string_lossy().into_owned(),
            reason: reason.to_string(),
        };
        let decision = self.reviewer.request_manual_review(&request);
        if decision.is_accept() {
            return Verdict::Accept;
        }
        if decision == ReviewDecision::Deferred {
            self.summary.reviews_deferred += 1;
        }
        Verdict::Reject(UnmatchedReason::AmbiguousMatch)
    }

    /// Stamps the deal into a copy of the file, then records the match.
    fn accept(&mut self, deal: &FacilityRecord, candidate: &CandidateFile) -> Result<LedgerEntry> {
        let destination = self
            .config
            .output_dir
            .join(output_file_name(&deal.id, &deal.name));
        if self.config.dry_run {
            info!(
                "Dry run: would stamp deal {} into {} as {}",
                deal.id,
                candidate.path.display(),
                destination.display()
            );
        } else {
            let layout = &self.config.layout;
            let writes = [
                (layout.upload_deal_id_cell.clone(), deal_id_value(&deal.id)),
                (
                    layout.upload_marker_cell.clone(),
                    CellValue::Text(layout.upload_marker_value.clone()),
                ),
            ];
            self.store
                .write_cells(&candidate.path, &destination, &writes)
                .with_context(|| {
                    format!(
                        "Failed to stamp deal {} into {}",
                        deal.id,
                        candidate.path.display()
                    )
                })?;
        }
        Ok(self.ledger.append(
            &deal.id,
            candidate.in_file_bed_count,
            &candidate.file_display_name,
            &candidate.path,
        ))
    }
}
