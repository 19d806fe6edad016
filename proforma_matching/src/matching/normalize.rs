// src/matching/normalize.rs - Facility name canonicalization
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Generic facility-type words that carry no identity on their own.
pub const FACILITY_STOPWORDS: [&str; 15] = [
    "center", "centre", "rehabilitation", "rehab", "nursing", "care", "skilled", "health",
    "healthcare", "post", "acute", "post-acute", "memory", "community", "facility",
];

static PUNCTUATION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

#[derive(Debug, Clone)]
pub struct NameNormalizer {
    stopword_regex: Option<Regex>,
}

impl Default for NameNormalizer {
    fn default() -> Self {
        // The default vocabulary is a fixed set of plain words, so building cannot fail.
        Self::with_vocabulary(FACILITY_STOPWORDS.iter().copied())
            .unwrap_or(Self { stopword_regex: None })
    }
}

impl NameNormalizer {
    /// Builds a normalizer removing the given words (whole words, case-insensitive).
    pub fn with_vocabulary<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary: Vec<String> = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        if vocabulary.is_empty() {
            return Ok(Self { stopword_regex: None });
        }
        // Longest first so "post-acute" wins over "post" at the same position.
        vocabulary.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        vocabulary.dedup();

        let alternation = vocabulary
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(r"(?i)\b(?:{})\b", alternation);
        let stopword_regex = Regex::new(&pattern)
            .with_context(|| format!("Invalid facility stopword vocabulary: {:?}", vocabulary))?;
        Ok(Self {
            stopword_regex: Some(stopword_regex),
        })
    }

    pub fn normalize(&self, name: &str) -> String {
        let mut current = collapse_whitespace(&name.to_lowercase());
        // Stripping punctuation can expose a new stopword ("cen.ter"), so repeat until stable.
        loop {
            let next = self.normalize_once(&current);
            if next == current {
                return next;
            }
            current = next;
        }
    }

    fn normalize_once(&self, name: &str) -> String {
        let without_stopwords = match &self.stopword_regex {
            Some(re) => re.replace_all(name, "").into_owned(),
            None => name.to_string(),
        };
        let without_punctuation = PUNCTUATION_REGEX.replace_all(&without_stopwords, "");
        collapse_whitespace(&without_punctuation)
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_facility_words_and_punctuation() {
        let normalizer = NameNormalizer::default();
        assert_eq!(
            normalizer.normalize("Devon Gables Rehabilitation Center"),
            "devon gables"
        );
        assert_eq!(
            normalizer.normalize("St. Mary's Post-Acute Care"),
            "st marys"
        );
        assert_eq!(
            normalizer.normalize("  Sunrise   Manor (Skilled Nursing) "),
            "sunrise manor"
        );
    }

    #[test]
    fn test_whole_words_only() {
        let normalizer = NameNormalizer::default();
        // "carefree" and "centerville" contain stopwords but are not stopwords.
        assert_eq!(
            normalizer.normalize("Carefree Centerville Health"),
            "carefree centerville"
        );
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        let normalizer = NameNormalizer::default();
        assert_eq!(normalizer.normalize(""), "");
        assert_eq!(normalizer.normalize("   \t "), "");
        assert_eq!(normalizer.normalize("Rehab Center"), "");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let normalizer = NameNormalizer::default();
        let samples = [
            "Devon Gables Rehabilitation Center",
            "cen.ter of Hope",
            "Care-Center Health's",
            "Memory  Care @ The Lakes!!",
            "RÉSIDENCE Élan Nursing",
            "post--acute",
            "",
        ];
        for s in samples {
            let once = normalizer.normalize(s);
            assert_eq!(normalizer.normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_custom_vocabulary_is_case_insensitive() {
        let normalizer = NameNormalizer::with_vocabulary(["Manor", "LLC"]).unwrap();
        assert_eq!(normalizer.normalize("Sunrise MANOR llc"), "sunrise");
        // Default words are no longer removed.
        assert_eq!(normalizer.normalize("Sunrise Care"), "sunrise care");
    }

    #[test]
    fn test_empty_vocabulary_only_strips_punctuation() {
        let normalizer = NameNormalizer::with_vocabulary(Vec::<String>::new()).unwrap();
        assert_eq!(normalizer.normalize("Rehab, Center!"), "rehab center");
    }
}
