use crate::config::{MatchOrder, MatchingConfig};
use crate::database;
use crate::faq::search::{CandidateSearch, ScoredCandidate};
use crate::models::EmbeddedQuestion;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

/// FAQ candidates scoring within this margin of the best are ranked by frequency instead.
pub const TIE_MARGIN: f32 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    AnsweredQuery,
    FaqIndex,
}

/// An existing answer that a new question resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaqMatch {
    pub source: MatchSource,
    pub similarity: f32,
    pub answer: String,
    pub matched_question: String,
    /// Set for FAQ matches.
    pub faq_id: Option<String>,
    /// The stub's frequency after this match was counted.
    pub frequency: Option<i64>,
    /// Set for answered-query matches.
    pub query_id: Option<String>,
}

/// Picks the FAQ stub to reuse among those at or above `threshold`.
///
/// Highest score wins, except that candidates within [`TIE_MARGIN`] of it are ordered
/// by frequency (then score).
pub fn pick_faq_candidate(
    candidates: &[ScoredCandidate<EmbeddedQuestion>],
    threshold: f32,
) -> Option<&ScoredCandidate<EmbeddedQuestion>> {
    let best = candidates
        .iter()
        .filter(|c| c.score >= threshold)
        .map(|c| c.score)
        .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))))?;

    candidates
        .iter()
        .filter(|c| c.score >= threshold && best - c.score <= TIE_MARGIN)
        .max_by(|a, b| {
            a.record
                .frequency
                .cmp(&b.record.frequency)
                .then(a.score.total_cmp(&b.score))
        })
}

/// Two-stage near-duplicate lookup: answered queries, then the FAQ index (or the
/// reverse, per [`MatchOrder`]).
#[derive(Clone)]
pub struct FaqMatcher {
    pool: SqlitePool,
    search: CandidateSearch,
    threshold: f32,
    order: MatchOrder,
}

impl FaqMatcher {
    pub fn new(pool: SqlitePool, search: CandidateSearch, config: &MatchingConfig) -> Self {
        Self {
            pool,
            search,
            threshold: config.similarity_threshold,
            order: config.order,
        }
    }

    pub fn search(&self) -> &CandidateSearch {
        &self.search
    }

    #[instrument(skip(self, vector), fields(order = ?self.order))]
    pub async fn find_match(&self, course_id: &str, vector: &[f32]) -> Option<FaqMatch> {
        let found = match self.order {
            MatchOrder::AnsweredFirst => match self.match_answered(course_id, vector).await {
                Some(m) => Some(m),
                None => self.match_faq(course_id, vector).await,
            },
            MatchOrder::FaqFirst => match self.match_faq(course_id, vector).await {
                Some(m) => Some(m),
                None => self.match_answered(course_id, vector).await,
            },
        };

        match &found {
            Some(m) => info!(source = ?m.source, similarity = m.similarity, "Question matched"),
            None => info!("No similar answered question"),
        }
        found
    }

    async fn match_answered(&self, course_id: &str, vector: &[f32]) -> Option<FaqMatch> {
        let candidates = self.search.answered_queries(course_id, vector).await;
        let best = candidates.into_iter().next()?;
        if best.score < self.threshold {
            return None;
        }
        let answer = best.record.answer?;
        Some(FaqMatch {
            source: MatchSource::AnsweredQuery,
            similarity: best.score,
            answer,
            matched_question: best.record.question,
            faq_id: None,
            frequency: None,
            query_id: Some(best.record.id),
        })
    }

    async fn match_faq(&self, course_id: &str, vector: &[f32]) -> Option<FaqMatch> {
        let candidates = self.search.faq_entries(course_id, vector).await;
        let chosen = pick_faq_candidate(&candidates, self.threshold)?;
        let answer = chosen.record.answer.clone()?;

        let frequency = match database::increment_frequency(&self.pool, &chosen.record.id).await {
            Ok(Some(updated)) => updated.frequency,
            Ok(None) => {
                warn!("FAQ entry {} vanished before its frequency was bumped", chosen.record.id);
                chosen.record.frequency
            }
            Err(e) => {
                warn!("Failed to bump frequency of {}: {}", chosen.record.id, e);
                chosen.record.frequency
            }
        };

        Some(FaqMatch {
            source: MatchSource::FaqIndex,
            similarity: chosen.score,
            answer,
            matched_question: chosen.record.question.clone(),
            faq_id: Some(chosen.record.id.clone()),
            frequency: Some(frequency),
            query_id: None,
        })
    }
}
