// src/matching/matcher.rs - Best-candidate selection over a list of names
use log::debug;

use crate::matching::similarity::SimilarityScorer;

/// Winner of a [`CandidateMatcher::match_best`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch<'a> {
    pub choice: Option<&'a str>,
    /// Position of the winner in the supplied choices.
    pub position: Option<usize>,
    pub score: f64,
}

impl<'a> BestMatch<'a> {
    fn none() -> Self {
        Self {
            choice: None,
            position: None,
            score: 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.choice.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandidateMatcher {
    scorer: SimilarityScorer,
}

impl CandidateMatcher {
    pub fn new(scorer: SimilarityScorer) -> Self {
        Self { scorer }
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    /// Returns the choice with the strictly highest composite score at or above
    /// `threshold`. Ties keep the earliest choice. A choice whose edit distance
    /// exceeds half the shorter raw name length is discarded whatever its score.
    pub fn match_best<'a, S: AsRef<str>>(
        &self,
        query: &str,
        choices: &'a [S],
        threshold: f64,
    ) -> BestMatch<'a> {
        if choices.is_empty() || query.trim().is_empty() {
            return BestMatch::none();
        }
        let query_len = query.chars().count();

        let mut best = BestMatch::none();
        for (position, choice) in choices.iter().enumerate() {
            let choice = choice.as_ref();
            if choice.trim().is_empty() {
                continue;
            }
            let choice_len = choice.chars().count();
            if choice_len <= 1 {
                continue;
            }

            let score = self.scorer.score(query, choice);
            debug!(
                "Comparing {:?} with {:?}: token={} sequence={} levenshtein={} phonetic={} composite={:.1}",
                query,
                choice,
                score.token_score,
                score.sequence_score,
                score.levenshtein_distance,
                score.phonetic_equal,
                score.composite_score
            );

            if exceeds_edit_budget(score.levenshtein_distance, query_len, choice_len) {
                debug!(
                    "Rejected {:?} due to high Levenshtein distance: {}",
                    choice, score.levenshtein_distance
                );
                continue;
            }

            if score.composite_score > best.score && score.composite_score >= threshold {
                best = BestMatch {
                    choice: Some(choice),
                    position: Some(position),
                    score: score.composite_score,
                };
            }
        }

        debug!(
            "Best match for {:?} at threshold {}: {:?} ({:.1})",
            query, threshold, best.choice, best.score
        );
        best
    }
}

/// Early-rejection rule: `distance > min(len_a, len_b) / 2`.
pub fn exceeds_edit_budget(distance: usize, len_a: usize, len_b: usize) -> bool {
    distance as f64 > len_a.min(len_b) as f64 / 2.0
}
