use crate::database;
use crate::faq::index::{Collection, IndexHit, VectorIndex};
use crate::faq::similarity::match_score;
use crate::models::{EmbeddedQuestion, Query};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Rows loaded from SQLite for an exact cosine scan.
pub const LOCAL_SCAN_LIMIT: i64 = 200;
const NATIVE_SEARCH_TIMEOUT: Duration = Duration::from_secs(3);

/// A record with its match score in [0, 1].
#[derive(Debug, Clone)]
pub struct ScoredCandidate<T> {
    pub record: T,
    pub score: f32,
}

/// Something carrying a stored embedding.
pub trait Embedded {
    fn id(&self) -> &str;
    fn vector(&self) -> Option<&[f32]>;
}

impl Embedded for Query {
    fn id(&self) -> &str {
        &self.id
    }

    fn vector(&self) -> Option<&[f32]> {
        self.embedding.as_ref().map(|v| v.0.as_slice())
    }
}

impl Embedded for EmbeddedQuestion {
    fn id(&self) -> &str {
        &self.id
    }

    fn vector(&self) -> Option<&[f32]> {
        Some(self.embedding.0.as_slice())
    }
}

/// Scores every record against `vector` and sorts best first.
pub fn rank_locally<T: Embedded>(records: Vec<T>, vector: &[f32]) -> Vec<ScoredCandidate<T>> {
    let mut scored: Vec<ScoredCandidate<T>> = records
        .into_iter()
        .filter_map(|record| {
            let score = match_score(record.vector()?, vector);
            Some(ScoredCandidate { record, score })
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

/// Attaches index scores to the rows SQLite returned, dropping ids it filtered out.
fn join_hits<T: Embedded>(hits: Vec<IndexHit>, records: Vec<T>) -> Vec<ScoredCandidate<T>> {
    let mut by_id: HashMap<String, T> = records
        .into_iter()
        .map(|r| (r.id().to_string(), r))
        .collect();
    hits.into_iter()
        .filter_map(|hit| {
            by_id.remove(&hit.id).map(|record| ScoredCandidate {
                record,
                score: hit.score,
            })
        })
        .collect()
}

/// Similarity search over the two collections, natively when an index is configured
/// and by an exact scan over SQLite otherwise (or when the index fails or finds nothing
/// answered).
///
/// Never fails: any error ends up as an empty candidate list.
#[derive(Clone)]
pub struct CandidateSearch {
    pool: SqlitePool,
    index: Option<Arc<dyn VectorIndex>>,
    candidates: usize,
}

impl CandidateSearch {
    pub fn new(pool: SqlitePool, index: Option<Arc<dyn VectorIndex>>, candidates: usize) -> Self {
        Self {
            pool,
            index,
            candidates,
        }
    }

    /// Answered queries of `course_id`, best first.
    pub async fn answered_queries(
        &self,
        course_id: &str,
        vector: &[f32],
    ) -> Vec<ScoredCandidate<Query>> {
        if let Some(hits) = self.native(Collection::Queries, course_id, vector).await {
            let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
            match database::answered_queries_by_ids(&self.pool, course_id, &ids).await {
                Ok(records) => {
                    let joined = join_hits(hits, records);
                    if !joined.is_empty() {
                        return joined;
                    }
                    debug!("No answered queries among native hits, using local scan");
                }
                Err(e) => warn!("Failed to load indexed queries, using local scan: {}", e),
            }
        }

        match database::answered_queries_with_embeddings(&self.pool, course_id, LOCAL_SCAN_LIMIT)
            .await
        {
            Ok(records) => rank_locally(records, vector),
            Err(e) => {
                warn!("Local query scan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Answered FAQ stubs of `course_id`, best first.
    pub async fn faq_entries(
        &self,
        course_id: &str,
        vector: &[f32],
    ) -> Vec<ScoredCandidate<EmbeddedQuestion>> {
        if let Some(hits) = self.native(Collection::Faq, course_id, vector).await {
            let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
            match database::answered_faq_by_ids(&self.pool, course_id, &ids).await {
                Ok(records) => {
                    let joined = join_hits(hits, records);
                    if !joined.is_empty() {
                        return joined;
                    }
                    debug!("No answered FAQ entries among native hits, using local scan");
                }
                Err(e) => warn!("Failed to load indexed FAQ entries, using local scan: {}", e),
            }
        }

        match database::answered_faq_with_embeddings(&self.pool, course_id, LOCAL_SCAN_LIMIT).await
        {
            Ok(records) => rank_locally(records, vector),
            Err(e) => {
                warn!("Local FAQ scan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// `None` means "use the local scan": no index, an index error, or a timeout.
    /// An empty or fully filtered result also ends in the local scan, which covers rows
    /// the index never received.
    async fn native(
        &self,
        collection: Collection,
        course_id: &str,
        vector: &[f32],
    ) -> Option<Vec<IndexHit>> {
        let index = self.index.as_ref()?;
        match timeout(
            NATIVE_SEARCH_TIMEOUT,
            index.search(collection, course_id, vector, self.candidates),
        )
        .await
        {
            Ok(Ok(hits)) => {
                debug!(collection = collection.table_name(), hits = hits.len(), "Native search");
                Some(hits)
            }
            Ok(Err(e)) => {
                warn!("Native vector search failed, using local scan: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Native vector search timed out after {:?}, using local scan",
                    NATIVE_SEARCH_TIMEOUT
                );
                None
            }
        }
    }

    /// Adds or refreshes a record's vector in the native index. Best effort.
    pub async fn index(
        &self,
        collection: Collection,
        id: &str,
        course_id: &str,
        vector: &[f32],
        answered: bool,
    ) {
        let Some(index) = self.index.as_ref() else {
            return;
        };
        if let Err(e) = index.upsert(collection, id, course_id, vector, answered).await {
            warn!("Failed to index {} in {}: {}", id, collection.table_name(), e);
        }
    }
}
