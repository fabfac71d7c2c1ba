//! Test Module
//!
//! Shared fixtures for the backend test suite.
//!
//! ## Test Categories
//! - `database_tests`: users, courses, queries, FAQ stubs, notifications and ratings
//! - `moderation_tests`: moderation and subject-relevance gates against a scripted LLM
//! - `faq_tests`: two-stage matching over the local scan and the LanceDB index
//! - `lifecycle_tests`: submit/answer workflows end to end
//! - `api_tests`: the HTTP surface through `axum-test`

pub mod api_tests;
pub mod database_tests;

use crate::actors::messages::{ActorError, AppError};
use crate::actors::traits::{EmbeddingProvider, LlmActor};
use crate::config::{
    ApiEndpoint, AppConfig, EmbeddingBackend, GateConfig, MatchOrder, MatchingConfig,
};
use crate::database::{self, NewUser};
use crate::faq::{CandidateSearch, FaqMatcher, VectorIndex};
use crate::lifecycle::QueryLifecycle;
use crate::models::{Course, Role, User};
use crate::moderation::{Classifier, ModerationGate, SubjectRelevanceGate};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use url::Url;

// ============================================================================
// Test Fixtures
// ============================================================================

/// A migrated database living in its own temp directory.
///
/// The directory is removed when this is dropped, so keep it alive for the whole test.
pub struct TestDb {
    pub pool: SqlitePool,
    pub dir: TempDir,
}

pub async fn create_test_db() -> TestDb {
    let dir = tempdir().expect("Failed to create temp dir");
    let db_url = format!("sqlite://{}", dir.path().join("test.sqlite").display());
    let pool = database::init_db(&db_url)
        .await
        .expect("Failed to create test pool");
    TestDb { pool, dir }
}

/// Scripted LLM. Replies are computed from the prompt; every call is counted.
pub struct MockLlm {
    response_fn: Box<dyn Fn(&str) -> Result<String, AppError> + Send + Sync>,
    calls: AtomicUsize,
}

impl MockLlm {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            response_fn: Box::new(move |prompt| Ok(f(prompt))),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every call fails, as if the provider were down.
    pub fn failing() -> Self {
        Self {
            response_fn: Box::new(|_| {
                Err(AppError::Actor(ActorError::LlmError(
                    "provider unavailable".to_string(),
                )))
            }),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers every classifier prompt with a permissive verdict.
    pub fn classroom() -> Self {
        Self::new(classroom_reply)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Default replies, picked by which classifier prompt is being asked.
pub fn classroom_reply(prompt: &str) -> String {
    if prompt.contains("content moderation") {
        r#"{"label": "SAFE", "confidence": 0.97}"#.to_string()
    } else if prompt.contains("belongs to a course") {
        r#"{"is_relevant": true, "confidence": 0.9, "reason": "on topic"}"#.to_string()
    } else if prompt.contains("emotion detection") {
        r#"{"emotion": "CURIOUS", "confidence": 0.8}"#.to_string()
    } else if prompt.contains("topic clusters") {
        r#"[{"topic": "Calculus", "questions": ["What is a limit?"]}]"#.to_string()
    } else {
        "unexpected prompt".to_string()
    }
}

#[async_trait]
impl LlmActor for MockLlm {
    async fn complete(
        &self,
        prompt: String,
        _system_prompt: Option<String>,
    ) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.response_fn)(&prompt)
    }
}

/// Looks embeddings up in a fixed table; unknown text has no embedding.
#[derive(Default)]
pub struct MockEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.vectors.get(text).cloned()
    }
}

/// Two unit vectors whose cosine similarity is `similarity`.
pub fn vectors_with_similarity(similarity: f32) -> (Vec<f32>, Vec<f32>) {
    let other = (1.0 - similarity * similarity).max(0.0).sqrt();
    (vec![1.0, 0.0, 0.0], vec![similarity, other, 0.0])
}

pub fn test_config() -> AppConfig {
    let endpoint = ApiEndpoint {
        base_url: Url::parse("http://127.0.0.1:9/v1/").expect("valid url"),
        api_key: None,
        model: "test-model".to_string(),
    };
    AppConfig {
        bind_addr: "127.0.0.1:0".parse().expect("valid addr"),
        data_dir: "./data".into(),
        database_url: None,
        jwt_secret: "classroom-test-secret-0123456789".to_string(),
        llm: endpoint.clone(),
        embedding_backend: EmbeddingBackend::Remote,
        embedding_api: endpoint,
        matching: MatchingConfig::default(),
        gates: GateConfig::default(),
        question_rate_limit: 10,
        question_rate_window: Duration::from_secs(60),
    }
}

/// Builds the lifecycle the same way `AppState::new` does.
pub fn build_lifecycle(
    pool: &SqlitePool,
    llm: Arc<dyn LlmActor>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Option<Arc<dyn VectorIndex>>,
    order: MatchOrder,
) -> QueryLifecycle {
    let config = test_config();
    let classifier = Classifier::new(llm);
    let moderation = ModerationGate::new(config.gates.bad_words.clone(), classifier.clone());
    let relevance = SubjectRelevanceGate::new(
        classifier,
        config.gates.subject_validation_enabled,
        config.gates.subject_confidence_threshold,
    );
    let matching = MatchingConfig {
        order,
        ..MatchingConfig::default()
    };
    let search = CandidateSearch::new(pool.clone(), index, matching.search_candidates);
    let matcher = FaqMatcher::new(pool.clone(), search, &matching);
    QueryLifecycle::new(pool.clone(), moderation, relevance, embedder, matcher)
}

pub async fn create_user(pool: &SqlitePool, name: &str, role: Role) -> User {
    let email = format!("{}@school.test", name.to_lowercase().replace(' ', "."));
    database::create_user(
        pool,
        NewUser {
            name,
            email: &email,
            roll: (role == Role::Student).then_some("R-001"),
            password_hash: "not-a-real-hash",
            role,
        },
    )
    .await
    .expect("Failed to create user")
}

pub async fn create_course(pool: &SqlitePool, name: &str, teacher: &User) -> Course {
    database::create_course(pool, name, teacher)
        .await
        .expect("Failed to create course")
}

/// Polls until `check` passes; notifications are written by a spawned task.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}
