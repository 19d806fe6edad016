pub mod candidates;
pub mod engine;
pub mod ledger;
pub mod review;
pub mod source;
pub mod unmatched;

pub use engine::LinkageEngine;
pub use ledger::MatchLedger;
pub use review::{ManualReview, ReviewDecision, ReviewMode, ReviewRequest, Reviewer};
pub use source::{DealSource, PgDealSource};
pub use unmatched::UnmatchedLog;
