//! HTTP API: shared state, router assembly and the route modules.

pub mod admin_routes;
pub mod auth_routes;
pub mod course_routes;
pub mod query_routes;

use crate::actors::traits::{EmbeddingProvider, LlmActor};
use crate::auth::JwtKeys;
use crate::config::AppConfig;
use crate::faq::{CandidateSearch, FaqMatcher, VectorIndex};
use crate::lifecycle::QueryLifecycle;
use crate::moderation::{Classifier, ModerationGate, SubjectRelevanceGate};
use crate::rate_limiter::RateLimiter;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Everything a handler needs, built once at startup.
pub struct AppState {
    pub db: SqlitePool,
    pub jwt: JwtKeys,
    pub lifecycle: QueryLifecycle,
    /// Used directly by the teacher insights route.
    pub classifier: Classifier,
    /// Guards question submission, keyed by student id.
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wires the gates, matcher and lifecycle around the given actors and index.
    ///
    /// Pass `None` for `index` to search with the local cosine scan only.
    pub fn new(
        db: SqlitePool,
        config: &AppConfig,
        llm: Arc<dyn LlmActor>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Option<Arc<dyn VectorIndex>>,
    ) -> Self {
        let classifier = Classifier::new(llm);
        let moderation = ModerationGate::new(config.gates.bad_words.clone(), classifier.clone());
        let relevance = SubjectRelevanceGate::new(
            classifier.clone(),
            config.gates.subject_validation_enabled,
            config.gates.subject_confidence_threshold,
        );
        let search = CandidateSearch::new(db.clone(), index, config.matching.search_candidates);
        let matcher = FaqMatcher::new(db.clone(), search, &config.matching);
        let lifecycle = QueryLifecycle::new(db.clone(), moderation, relevance, embedder, matcher);

        Self {
            jwt: JwtKeys::new(&config.jwt_secret),
            rate_limiter: RateLimiter::new(config.question_rate_limit, config.question_rate_window),
            db,
            lifecycle,
            classifier,
        }
    }
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Classroom Q&A API is running" }))
}

async fn health() -> &'static str {
    "OK"
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(auth_routes::routes())
        .merge(course_routes::routes())
        .merge(query_routes::routes())
        .merge(admin_routes::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
