// src/matching/similarity.rs - Composite facility name similarity
//
// Every metric runs on the normalized forms. Token metrics tolerate word
// reordering ("Devon Gables Rehab" vs "Rehab Devon Gables"), Jaro-Winkler
// tolerates typos, and a phonetic key rewards sound-alike spellings.

use log::warn;
use rphonetic::{DoubleMetaphone, Encoder};
use std::collections::BTreeSet;
use strsim::{jaro_winkler, levenshtein};

use crate::matching::normalize::NameNormalizer;
use crate::models::MatchScore;

pub const TOKEN_WEIGHT: f64 = 0.7;
pub const SEQUENCE_WEIGHT: f64 = 0.3;
pub const PHONETIC_BONUS: f64 = 10.0;
pub const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Default)]
pub struct SimilarityScorer {
    normalizer: NameNormalizer,
}

impl SimilarityScorer {
    pub fn new(normalizer: NameNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn normalizer(&self) -> &NameNormalizer {
        &self.normalizer
    }

    pub fn score(&self, name_a: &str, name_b: &str) -> MatchScore {
        let norm_a = self.normalizer.normalize(name_a);
        let norm_b = self.normalizer.normalize(name_b);
        score_normalized(&norm_a, &norm_b)
    }
}

/// Scores two names that have already been normalized.
pub fn score_normalized(norm_a: &str, norm_b: &str) -> MatchScore {
    let token_score = token_sort_ratio(norm_a, norm_b).max(token_set_ratio(norm_a, norm_b));
    let sequence_score = jaro_winkler_score(norm_a, norm_b);
    let levenshtein_distance = levenshtein(norm_a, norm_b);
    let phonetic_equal = phonetic_equal(norm_a, norm_b);

    let mut composite_score = token_score * TOKEN_WEIGHT + sequence_score * SEQUENCE_WEIGHT;
    if phonetic_equal {
        composite_score += PHONETIC_BONUS;
    }

    MatchScore {
        token_score,
        sequence_score,
        levenshtein_distance,
        phonetic_equal,
        composite_score: composite_score.clamp(0.0, MAX_SCORE),
    }
}

/// Indel similarity in [0, 100], rounded: `2 * LCS / (len_a + len_b)`.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let lcs = longest_common_subsequence(&a, &b);
    (MAX_SCORE * 2.0 * lcs as f64 / total as f64).round()
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Ratio of the two strings with their tokens sorted alphabetically.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Best ratio among the shared-token core and each side's core-plus-remainder.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = join_tokens(tokens_a.intersection(&tokens_b));
    let diff_ab = join_tokens(tokens_a.difference(&tokens_b));
    let diff_ba = join_tokens(tokens_b.difference(&tokens_a));

    let combined_ab = format!("{} {}", intersection, diff_ab).trim().to_string();
    let combined_ba = format!("{} {}", intersection, diff_ba).trim().to_string();

    [
        ratio(&intersection, &combined_ab),
        ratio(&intersection, &combined_ba),
        ratio(&combined_ab, &combined_ba),
    ]
    .into_iter()
    .fold(0.0, f64::max)
}

fn join_tokens<'a, T: AsRef<str> + 'a>(tokens: impl Iterator<Item = &'a T>) -> String {
    tokens.map(|t| t.as_ref()).collect::<Vec<_>>().join(" ")
}

/// Jaro-Winkler similarity scaled to [0, 100] and truncated.
pub fn jaro_winkler_score(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    (jaro_winkler(a, b) * MAX_SCORE).trunc()
}

/// Space-joined Double Metaphone primary codes, one per token.
pub fn phonetic_key(s: &str) -> Option<String> {
    let mut codes = Vec::new();
    for token in s.split_whitespace() {
        // rphonetic can panic on unusual input; treat that as "no key".
        match std::panic::catch_unwind(|| DoubleMetaphone::default().encode(token)) {
            Ok(code) => {
                let code = code.to_string();
                if !code.is_empty() {
                    codes.push(code);
                }
            }
            Err(_) => {
                warn!("DoubleMetaphone panicked on token: {:?}", token);
                return None;
            }
        }
    }
    if codes.is_empty() {
        None
    } else {
        Some(codes.join(" "))
    }
}

pub fn phonetic_equal(a: &str, b: &str) -> bool {
    match (phonetic_key(a), phonetic_key(b)) {
        (Some(ka), Some(kb)) => ka == kb,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_basics() {
        assert_eq!(ratio("devon gables", "devon gables"), 100.0);
        assert_eq!(ratio("", "devon"), 0.0);
        // LCS("abcd", "abed") = 3 -> 2*3/8
        assert_eq!(ratio("abcd", "abed"), 75.0);
    }

    #[test]
    fn test_token_sort_ignores_word_order() {
        assert_eq!(token_sort_ratio("devon gables", "gables devon"), 100.0);
        assert!(ratio("devon gables", "gables devon") < 100.0);
    }

    #[test]
    fn test_token_set_tolerates_extra_words() {
        assert_eq!(token_set_ratio("devon gables", "devon gables east"), 100.0);
        assert_eq!(token_set_ratio("", "devon"), 0.0);
        assert!(token_set_ratio("sunrise manor", "devon gables") < 50.0);
    }

    #[test]
    fn test_identical_names_score_full() {
        let scorer = SimilarityScorer::default();
        let score = scorer.score("Devon Gables Rehabilitation Center", "Devon Gables Rehab");
        assert_eq!(score.token_score, 100.0);
        assert_eq!(score.sequence_score, 100.0);
        assert_eq!(score.levenshtein_distance, 0);
        assert!(score.phonetic_equal);
        assert_eq!(score.composite_score, 100.0);
    }

    #[test]
    fn test_composite_weights() {
        let score = score_normalized("sunrise manor", "devon gables");
        let expected = score.token_score * TOKEN_WEIGHT + score.sequence_score * SEQUENCE_WEIGHT;
        let expected = if score.phonetic_equal { expected + PHONETIC_BONUS } else { expected };
        assert!((score.composite_score - expected.min(MAX_SCORE)).abs() < 1e-9);
        assert!(score.composite_score < 60.0);
    }

    #[test]
    fn test_composite_score_bounds() {
        let scorer = SimilarityScorer::default();
        let names = [
            "",
            "a",
            "Devon Gables",
            "Devon Gables Rehab",
            "Rehab Devon Gables",
            "Sunrise Manor",
            "Sunrize Mannor",
            "Totally Different Facility",
            "Center",
            "St. Mary's",
        ];
        for a in names {
            for b in names {
                let score = scorer.score(a, b);
                assert!(
                    (0.0..=100.0).contains(&score.composite_score),
                    "{:?} vs {:?} -> {}",
                    a,
                    b,
                    score.composite_score
                );
            }
        }
    }

    #[test]
    fn test_empty_names_score_zero() {
        let score = score_normalized("", "");
        assert_eq!(score.composite_score, 0.0);
        assert!(!score.phonetic_equal);
    }

    #[test]
    fn test_phonetic_key_matches_sound_alikes() {
        assert!(phonetic_equal("smith manor", "smyth manor"));
        assert!(!phonetic_equal("smith manor", "jones manor"));
        assert_eq!(phonetic_key(""), None);
    }
}
