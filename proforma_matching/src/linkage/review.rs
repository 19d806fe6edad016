// src/linkage/review.rs - Escalation of ambiguous deal/file pairs to a human
//
// Only an explicit, case-insensitive "true" counts as a confirmation.

use anyhow::{Context, Result};
use glob::glob;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// What the reviewer is asked to confirm.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    pub deal_id: String,
    pub deal_name: String,
    pub deal_beds: Option<f64>,
    pub candidate_name: String,
    pub candidate_beds: Option<f64>,
    pub file_path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Accept,
    Reject,
    /// Queued for later batch review; not a confirmation.
    Deferred,
}

impl ReviewDecision {
    pub fn is_accept(self) -> bool {
        self == ReviewDecision::Accept
    }
}

pub trait ManualReview {
    fn request_manual_review(&mut self, request: &ReviewRequest) -> ReviewDecision;
}

/// The sole acceptance contract: the trimmed answer equals "true", ignoring case.
pub fn is_affirmative(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("true")
}

/// Blocking console prompt.
pub struct ConsoleReview<R, W> {
    input: R,
    output: W,
}

impl ConsoleReview<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self {
            input: io::stdin().lock(),
            output: io::stdout(),
        }
    }
}

impl<R: BufRead, W: Write> ConsoleReview<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, request: &ReviewRequest) -> io::Result<String> {
        writeln!(self.output, "\n--- Manual review ({}) ---", request.reason)?;
        writeln!(
            self.output,
            "Deal {} beds: {}",
            request.deal_id,
            format_beds(request.deal_beds)
        )?;
        writeln!(
            self.output,
            "File {} beds: {}",
            request.file_path,
            format_beds(request.candidate_beds)
        )?;
        write!(
            self.output,
            "Deal: {} -> {}, is it a match? True or False: ",
            request.deal_name, request.candidate_name
        )?;
        self.output.flush()?;
        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(answer)
    }
}

fn format_beds(beds: Option<f64>) -> String {
    beds.map(|b| b.to_string()).unwrap_or_else(|| "unknown".to_string())
}

impl<R: BufRead, W: Write> ManualReview for ConsoleReview<R, W> {
    fn request_manual_review(&mut self, request: &ReviewRequest) -> ReviewDecision {
        match self.prompt(request) {
            Ok(answer) if is_affirmative(&answer) => ReviewDecision::Accept,
            Ok(_) => ReviewDecision::Reject,
            Err(e) => {
                warn!("Manual review prompt failed for deal {}: {}", request.deal_id, e);
                ReviewDecision::Reject
            }
        }
    }
}

/// One row of the review CSV. `Decision` is exported blank for the reviewer to fill in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedReview {
    #[serde(rename = "Deal ID")]
    pub deal_id: String,
    #[serde(rename = "Deal Name")]
    pub deal_name: String,
    #[serde(rename = "Deal Beds")]
    pub deal_beds: Option<f64>,
    #[serde(rename = "Candidate Name")]
    pub candidate_name: String,
    #[serde(rename = "Candidate Beds")]
    pub candidate_beds: Option<f64>,
    #[serde(rename = "File Path")]
    pub file_path: String,
    #[serde(rename = "Reason")]
    pub reason: String,
    #[serde(rename = "Decision", default)]
    pub decision: Option<String>,
}

impl QueuedReview {
    fn new(request: &ReviewRequest, decision: Option<String>) -> Self {
        Self {
            deal_id: request.deal_id.clone(),
            deal_name: request.deal_name.clone(),
            deal_beds: request.deal_beds,
            candidate_name: request.candidate_name.clone(),
            candidate_beds: request.candidate_beds,
            file_path: request.file_path.clone(),
            reason: request.reason.clone(),
            decision,
        }
    }
}

/// Non-blocking escalation: unanswered requests are queued and exported for batch review.
/// Answers written into earlier exports are honoured on the next run.
#[derive(Debug, Default)]
pub struct ReviewQueue {
    pending: Vec<QueuedReview>,
    /// `(Deal ID, File Path)` -> last non-blank decision found in a reviewed queue.
    decisions: HashMap<(String, String), String>,
    export_path: Option<PathBuf>,
}

impl ReviewQueue {
    pub fn new(export_path: Option<PathBuf>) -> Self {
        Self {
            export_path,
            ..Default::default()
        }
    }

    /// Opens a queue exporting to `export_path` and loads the decisions recorded in every
    /// existing queue file matching `reviewed_pattern`. Later files win.
    pub fn open(export_path: impl Into<PathBuf>, reviewed_pattern: &str) -> Result<Self> {
        let mut queue = Self::new(Some(export_path.into()));
        let mut paths = Vec::new();
        for entry in glob(reviewed_pattern)
            .with_context(|| format!("Invalid review queue pattern {}", reviewed_pattern))?
        {
            paths.push(entry.context("Failed to list review queues")?);
        }
        paths.sort();
        for path in paths {
            queue.load_decisions(&path)?;
        }
        if !queue.decisions.is_empty() {
            info!("Loaded {} reviewed decision(s)", queue.decisions.len());
        }
        Ok(queue)
    }

    fn load_decisions(&mut self, path: &Path) -> Result<()> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open review queue {}", path.display()))?;
        for record in reader.deserialize::<QueuedReview>() {
            let row =
                record.with_context(|| format!("Malformed review row in {}", path.display()))?;
            let Some(decision) = row.decision.filter(|d| !d.trim().is_empty()) else {
                continue;
            };
            self.decisions.insert((row.deal_id, row.file_path), decision);
        }
        debug!("Read review decisions from {}", path.display());
        Ok(())
    }

    fn decision_for(&self, request: &ReviewRequest) -> Option<&str> {
        self.decisions
            .get(&(request.deal_id.clone(), request.file_path.clone()))
            .map(String::as_str)
    }

    pub fn pending(&self) -> &[QueuedReview] {
        &self.pending
    }

    /// Writes the queue to its CSV (no-op when empty or unbacked).
    pub fn export(&self) -> Result<Option<&Path>> {
        let Some(path) = self.export_path.as_deref() else {
            return Ok(None);
        };
        if self.pending.is_empty() {
            return Ok(None);
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create review queue {}", path.display()))?;
        for row in &self.pending {
            writer.serialize(row)?;
        }
        writer.flush()?;
        info!(
            "Exported {} deferred review(s) to {}",
            self.pending.len(),
            path.display()
        );
        Ok(Some(path))
    }
}

impl ManualReview for ReviewQueue {
    fn request_manual_review(&mut self, request: &ReviewRequest) -> ReviewDecision {
        let decision = self.decision_for(request).map(str::to_string);
        if decision.as_deref().is_some_and(is_affirmative) {
            info!(
                "Deal {} -> {:?} confirmed in a reviewed queue",
                request.deal_id, request.candidate_name
            );
            return ReviewDecision::Accept;
        }
        info!(
            "Deferring review of deal {} -> {:?} ({})",
            request.deal_id, request.candidate_name, request.reason
        );
        // A non-affirmative answer stays visible on the re-queued row.
        self.pending.push(QueuedReview::new(request, decision));
        ReviewDecision::Deferred
    }
}

/// Declines every escalation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

impl ManualReview for RejectAll {
    fn request_manual_review(&mut self, _request: &ReviewRequest) -> ReviewDecision {
        ReviewDecision::Reject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewMode {
    Prompt,
    Defer,
    Reject,
}

impl FromStr for ReviewMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "prompt" => Ok(ReviewMode::Prompt),
            "defer" => Ok(ReviewMode::Defer),
            "reject" => Ok(ReviewMode::Reject),
            other => anyhow::bail!("Unknown review mode '{}', expected prompt, defer or reject", other),
        }
    }
}

/// Reviewer selected at startup.
pub enum Reviewer {
    Prompt(ConsoleReview<io::StdinLock<'static>, io::Stdout>),
    Defer(ReviewQueue),
    Reject(RejectAll),
}

impl Reviewer {
    /// `queue` backs defer mode; an unbacked in-memory queue is used when it is absent.
    pub fn for_mode(mode: ReviewMode, queue: Option<ReviewQueue>) -> Self {
        match mode {
            ReviewMode::Prompt => Reviewer::Prompt(ConsoleReview::stdio()),
            ReviewMode::Defer => Reviewer::Defer(queue.unwrap_or_default()),
            ReviewMode::Reject => Reviewer::Reject(RejectAll),
        }
    }

    pub fn queue(&self) -> Option<&ReviewQueue> {
        match self {
            Reviewer::Defer(queue) => Some(queue),
            _ => None,
        }
    }
}

impl ManualReview for Reviewer {
    fn request_manual_review(&mut self, request: &ReviewRequest) -> ReviewDecision {
        match self {
            Reviewer::Prompt(r) => r.request_manual_review(request),
            Reviewer::Defer(r) => r.request_manual_review(request),
            Reviewer::Reject(r) => r.request_manual_review(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn request() -> ReviewRequest {
        ReviewRequest {
            deal_id: "42".into(),
            deal_name: "Devon Gables".into(),
            deal_beds: Some(120.0),
            candidate_name: "Devon Gables East".into(),
            candidate_beds: Some(118.0),
            file_path: "/deals/A - Devon Gables Proforma.xlsx".into(),
            reason: "in-file name did not confirm".into(),
        }
    }

    #[test]
    fn test_only_true_is_affirmative() {
        for yes in ["true", "True", "TRUE\n", "  tRuE  "] {
            assert!(is_affirmative(yes), "{:?}", yes);
        }
        for no in ["", "y", "yes", "1", "false", "truee", "t"] {
            assert!(!is_affirmative(no), "{:?}", no);
        }
    }

    #[test]
    fn test_console_review_reads_answer() {
        let mut output = Vec::new();
        let mut review = ConsoleReview::new(Cursor::new("True\n"), &mut output);
        assert_eq!(review.request_manual_review(&request()), ReviewDecision::Accept);
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("Deal: Devon Gables -> Devon Gables East, is it a match?"));

        let mut review = ConsoleReview::new(Cursor::new("yes\n"), Vec::new());
        assert_eq!(review.request_manual_review(&request()), ReviewDecision::Reject);

        // End of input is not a confirmation.
        let mut review = ConsoleReview::new(Cursor::new(""), Vec::new());
        assert_eq!(review.request_manual_review(&request()), ReviewDecision::Reject);
    }

    #[test]
    fn test_queue_defers_and_exports() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manual_review_2024-11-01.csv");
        let mut queue = ReviewQueue::new(Some(path.clone()));
        assert_eq!(queue.export().unwrap(), None);

        assert_eq!(queue.request_manual_review(&request()), ReviewDecision::Deferred);
        assert!(!ReviewDecision::Deferred.is_accept());
        assert_eq!(queue.pending().len(), 1);

        assert_eq!(queue.export().unwrap(), Some(path.as_path()));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with(
            "Deal ID,Deal Name,Deal Beds,Candidate Name,Candidate Beds,File Path,Reason,Decision"
        ));
        assert!(contents.contains("Devon Gables East"));
    }

    fn reviewed_queue(path: &Path, decision: &str) {
        let mut row = QueuedReview::new(&request(), None);
        row.decision = Some(decision.to_string());
        let mut writer = csv::Writer::from_path(path).unwrap();
        writer.serialize(&row).unwrap();
        writer.flush().unwrap();
    }

    #[test]
    fn test_reviewed_true_accepts_on_next_run() {
        let dir = tempdir().unwrap();
        reviewed_queue(&dir.path().join("manual_review_2024-11-01.csv"), "True");
        let pattern = dir.path().join("manual_review_*.csv");

        let mut queue = ReviewQueue::open(
            dir.path().join("manual_review_2024-11-02.csv"),
            &pattern.to_string_lossy(),
        )
        .unwrap();
        assert_eq!(queue.request_manual_review(&request()), ReviewDecision::Accept);
        assert!(queue.pending().is_empty());

        // The decision is keyed on deal and file, not on the deal alone.
        let mut other_file = request();
        other_file.file_path = "/deals/B - Devon Gables Proforma.xlsx".into();
        assert_eq!(queue.request_manual_review(&other_file), ReviewDecision::Deferred);
    }

    #[test]
    fn test_reviewed_yes_is_requeued() {
        let dir = tempdir().unwrap();
        reviewed_queue(&dir.path().join("manual_review_2024-11-01.csv"), "yes");
        let pattern = dir.path().join("manual_review_*.csv");
        let export = dir.path().join("manual_review_2024-11-02.csv");

        let mut queue = ReviewQueue::open(&export, &pattern.to_string_lossy()).unwrap();
        assert_eq!(queue.request_manual_review(&request()), ReviewDecision::Deferred);
        assert_eq!(queue.pending()[0].decision.as_deref(), Some("yes"));

        queue.export().unwrap();
        let reloaded = ReviewQueue::open(dir.path().join("next.csv"), &export.to_string_lossy())
            .unwrap();
        assert_eq!(reloaded.decisions.len(), 1);
    }

    #[test]
    fn test_open_without_reviewed_queues() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("manual_review_*.csv");
        let mut queue =
            ReviewQueue::open(dir.path().join("today.csv"), &pattern.to_string_lossy()).unwrap();
        assert_eq!(queue.request_manual_review(&request()), ReviewDecision::Deferred);
        assert_eq!(queue.pending()[0].decision, None);
    }

    #[test]
    fn test_review_mode_parsing() {
        assert_eq!("Prompt".parse::<ReviewMode>().unwrap(), ReviewMode::Prompt);
        assert_eq!(" defer ".parse::<ReviewMode>().unwrap(), ReviewMode::Defer);
        assert_eq!("reject".parse::<ReviewMode>().unwrap(), ReviewMode::Reject);
        assert!("maybe".parse::<ReviewMode>().is_err());
    }
}
