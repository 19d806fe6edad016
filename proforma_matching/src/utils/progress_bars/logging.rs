// src/utils/progress_bars/logging.rs - Structured logging helpers for a linkage run
use log::{debug, info, warn};
use std::time::Instant;

use crate::models::{DealState, RunSummary, UnmatchedReason};

#[derive(Clone)]
pub struct LinkageLogger {
    tag: &'static str,
    emoji: &'static str,
    start_time: Instant,
}

impl Default for LinkageLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkageLogger {
    pub fn new() -> Self {
        Self {
            tag: "LINKAGE",
            emoji: "📑",
            start_time: Instant::now(),
        }
    }

    pub fn log_start(&self, deal_count: usize, dry_run: bool) {
        info!(
            "[{}] {} 🚀 Starting proforma linkage for {} deals{}",
            self.tag,
            self.emoji,
            deal_count,
            if dry_run { " (dry run)" } else { "" }
        );
    }

    pub fn log_phase(&self, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        let msg = if let Some(details) = details {
            format!(
                "[{}] {} 🔄 Phase: {} - {} [+{:.1}s]",
                self.tag, self.emoji, phase, details, elapsed.as_secs_f32()
            )
        } else {
            format!(
                "[{}] {} 🔄 Phase: {} [+{:.1}s]",
                self.tag, self.emoji, phase, elapsed.as_secs_f32()
            )
        };
        info!("{}", msg);
    }

    pub fn log_data_loaded(&self, count: usize, data_type: &str) {
        info!(
            "[{}] {} 📊 Found {} {} records from database",
            self.tag, self.emoji, count, data_type
        );
    }

    pub fn log_transition(&self, deal_id: &str, from: DealState, to: DealState) {
        debug!("[{}] Deal {}: {:?} -> {:?}", self.tag, deal_id, from, to);
    }

    pub fn log_candidates(&self, deal_id: &str, pool: usize, unreadable: usize, duplicates: usize) {
        debug!(
            "[{}] Deal {}: {} candidate(s) in pool, {} unreadable, {} already in ledger",
            self.tag, deal_id, pool, unreadable, duplicates
        );
    }

    pub fn log_accepted(&self, deal_id: &str, deal_name: &str, file: &str) {
        info!(
            "[{}] {} ✅ Deal {} ({}) matched {}",
            self.tag, self.emoji, deal_id, deal_name, file
        );
    }

    pub fn log_unmatched(&self, deal_id: &str, deal_name: &str, reason: &UnmatchedReason) {
        match reason {
            UnmatchedReason::UnexpectedFailure(_) => warn!(
                "[{}] {} ⚠️  Deal {} ({}) failed: {}",
                self.tag, self.emoji, deal_id, deal_name, reason
            ),
            _ => info!(
                "[{}] {} ❌ Deal {} ({}) unmatched: {}",
                self.tag, self.emoji, deal_id, deal_name, reason
            ),
        }
    }

    pub fn log_completion(&self, summary: &RunSummary) {
        let duration = self.start_time.elapsed();
        info!(
            "[{}] {} 🎉 COMPLETED: {} of {} deals matched in {:.2?}",
            self.tag, self.emoji, summary.matched, summary.deals_total, duration
        );
        info!(
            "[{}] {} 📊 Results: {} unmatched, {} skipped without folder, {} already loaded",
            self.tag,
            self.emoji,
            summary.unmatched,
            summary.skipped_no_path,
            summary.skipped_already_loaded
        );
        info!(
            "[{}] {} 🙋 Reviews: {} requested, {} deferred",
            self.tag, self.emoji, summary.reviews_requested, summary.reviews_deferred
        );
        if summary.duplicate_candidates > 0 {
            info!(
                "[{}] {} ⏭️  {} candidate file(s) skipped as already matched",
                self.tag, self.emoji, summary.duplicate_candidates
            );
        }
        if summary.unreadable_candidates > 0 {
            warn!(
                "[{}] {} ⚠️  {} candidate file(s) could not be read",
                self.tag, self.emoji, summary.unreadable_candidates
            );
        }
    }
}
