//! Runtime configuration, sourced from the environment (and `.env` when present).

use crate::error::AppError;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use validator::Validate;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.82;
pub const DEFAULT_SEARCH_CANDIDATES: usize = 50;
pub const DEFAULT_SUBJECT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Words blocked by the local profanity list unless `MODERATION_BAD_WORDS` overrides them.
pub const DEFAULT_BAD_WORDS: &[&str] = &[
    "muji", "randi", "machikne", "fuck", "bitch", "idiot", "stupid",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorSearchBackend {
    /// LanceDB nearest-neighbour search, falling back to a local scan on failure.
    Native,
    /// Exact cosine scan over the document store only.
    Local,
}

/// Which collection the FAQ matcher consults first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOrder {
    AnsweredFirst,
    FaqFirst,
}

impl FromStr for EmbeddingBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(AppError::Config(format!("Unknown EMBEDDING_BACKEND '{}'", other))),
        }
    }
}

impl FromStr for VectorSearchBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "lancedb" => Ok(Self::Native),
            "local" => Ok(Self::Local),
            other => Err(AppError::Config(format!(
                "Unknown VECTOR_SEARCH_BACKEND '{}'",
                other
            ))),
        }
    }
}

impl FromStr for MatchOrder {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "answered_first" => Ok(Self::AnsweredFirst),
            "faq_first" => Ok(Self::FaqFirst),
            other => Err(AppError::Config(format!("Unknown FAQ_MATCH_ORDER '{}'", other))),
        }
    }
}

/// Connection settings for an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub model: String,
}

/// FAQ matching knobs.
#[derive(Debug, Clone, Validate)]
pub struct MatchingConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f32,
    #[validate(range(min = 1, max = 10000))]
    pub search_candidates: usize,
    pub order: MatchOrder,
    pub vector_backend: VectorSearchBackend,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            search_candidates: DEFAULT_SEARCH_CANDIDATES,
            order: MatchOrder::AnsweredFirst,
            vector_backend: VectorSearchBackend::Local,
        }
    }
}

/// Moderation and subject-relevance knobs.
#[derive(Debug, Clone, Validate)]
pub struct GateConfig {
    pub bad_words: Vec<String>,
    pub subject_validation_enabled: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    pub subject_confidence_threshold: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            bad_words: DEFAULT_BAD_WORDS.iter().map(|w| w.to_string()).collect(),
            subject_validation_enabled: true,
            subject_confidence_threshold: DEFAULT_SUBJECT_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub llm: ApiEndpoint,
    pub embedding_backend: EmbeddingBackend,
    pub embedding_api: ApiEndpoint,
    pub matching: MatchingConfig,
    pub gates: GateConfig,
    pub question_rate_limit: usize,
    pub question_rate_window: Duration,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.trim().eq_ignore_ascii_case("true") || v.trim() == "1")
        .unwrap_or(default)
}

fn parse_url(key: &str, default: &str) -> Result<Url, AppError> {
    let raw = var_or(key, default);
    // Url::join drops the last path segment unless it ends with a slash.
    let normalized = if raw.ends_with('/') { raw } else { format!("{}/", raw) };
    Ok(Url::parse(&normalized)?)
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET must be set".to_string()))?;
        if jwt_secret.len() < 16 {
            return Err(AppError::Config(
                "JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }

        let bad_words = match env::var("MODERATION_BAD_WORDS") {
            Ok(list) => list
                .split(',')
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
            Err(_) => GateConfig::default().bad_words,
        };

        let matching = MatchingConfig {
            similarity_threshold: parse_var(
                "EMBEDDING_SIMILARITY_THRESHOLD",
                DEFAULT_SIMILARITY_THRESHOLD,
            )?,
            search_candidates: parse_var("EMBEDDING_SEARCH_CANDIDATES", DEFAULT_SEARCH_CANDIDATES)?,
            order: parse_var("FAQ_MATCH_ORDER", MatchOrder::AnsweredFirst)?,
            vector_backend: parse_var("VECTOR_SEARCH_BACKEND", VectorSearchBackend::Native)?,
        };
        matching.validate()?;

        let gates = GateConfig {
            bad_words,
            subject_validation_enabled: parse_bool("SUBJECT_VALIDATION_ENABLED", true),
            subject_confidence_threshold: parse_var(
                "SUBJECT_VALIDATION_CONFIDENCE_THRESHOLD",
                DEFAULT_SUBJECT_CONFIDENCE_THRESHOLD,
            )?,
        };
        gates.validate()?;

        Ok(Self {
            bind_addr: parse_var("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?,
            data_dir: PathBuf::from(var_or("DATA_DIR", "./data")),
            database_url: env::var("DATABASE_URL").ok(),
            jwt_secret,
            llm: ApiEndpoint {
                base_url: parse_url("LLM_API_BASE", "https://api.openai.com/v1")?,
                api_key: env::var("LLM_API_KEY").ok(),
                model: var_or("LLM_MODEL", "gpt-4o-mini"),
            },
            embedding_backend: parse_var("EMBEDDING_BACKEND", EmbeddingBackend::Local)?,
            embedding_api: ApiEndpoint {
                base_url: parse_url("EMBEDDING_API_BASE", "https://api.openai.com/v1")?,
                api_key: env::var("EMBEDDING_API_KEY").ok(),
                model: var_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            },
            matching,
            gates,
            question_rate_limit: parse_var("QUESTION_RATE_LIMIT", 10usize)?,
            question_rate_window: Duration::from_secs(parse_var("QUESTION_RATE_WINDOW_SECS", 60u64)?),
        })
    }
}
