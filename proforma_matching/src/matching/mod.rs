pub mod matcher;
pub mod normalize;
pub mod similarity;

pub use matcher::{BestMatch, CandidateMatcher};
pub use normalize::{NameNormalizer, FACILITY_STOPWORDS};
pub use similarity::SimilarityScorer;
