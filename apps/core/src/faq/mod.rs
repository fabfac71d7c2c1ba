//! Semantic FAQ deduplication: similarity, vector index, candidate search and matching.

pub mod index;
pub mod matcher;
pub mod search;
pub mod similarity;

pub use index::{Collection, LanceVectorIndex, VectorIndex};
pub use matcher::{FaqMatch, FaqMatcher, MatchSource};
pub use search::CandidateSearch;
