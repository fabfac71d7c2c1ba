// Classroom Q&A Backend Entry Point
// Gates, FAQ matcher and query lifecycle behind an axum API.

mod actors;
mod auth;
mod config;
mod database;
mod error;
mod faq;
mod fs_manager;
mod http;
mod lifecycle;
mod models;
mod moderation;
mod rate_limiter;
mod telemetry;

#[cfg(test)]
mod tests;

use actors::embedding::EmbeddingActorHandle;
use actors::llm::LlmActorHandle;
use actors::traits::{EmbeddingProvider, LlmActor};
use config::{AppConfig, EmbeddingBackend, VectorSearchBackend};
use faq::{LanceVectorIndex, VectorIndex};
use fs_manager::PortablePathManager;
use http::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    telemetry::init_telemetry("codeyatra-core")?;

    let config = AppConfig::from_env()?;

    let paths = PortablePathManager::new(&config.data_dir);
    paths.init()?;
    info!("Data directory: {:?}", paths.data_dir());

    let database_url = config
        .database_url
        .clone()
        .unwrap_or_else(|| paths.database_url());
    let pool = database::init_db(&database_url).await?;

    let llm: Arc<dyn LlmActor> = Arc::new(LlmActorHandle::new(config.llm.clone()));
    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding_backend {
        EmbeddingBackend::Local => Arc::new(EmbeddingActorHandle::new_local(paths.models_dir())),
        EmbeddingBackend::Remote => {
            Arc::new(EmbeddingActorHandle::new_remote(config.embedding_api.clone()))
        }
    };

    let index: Option<Arc<dyn VectorIndex>> = match config.matching.vector_backend {
        VectorSearchBackend::Native => match LanceVectorIndex::open(&paths.vectors_dir()).await {
            Ok(index) => Some(Arc::new(index)),
            Err(e) => {
                warn!("Vector index unavailable, using local similarity scan: {}", e);
                None
            }
        },
        VectorSearchBackend::Local => None,
    };

    let state = Arc::new(AppState::new(pool, &config, llm, embedder, index));

    let prune_state = state.clone();
    let prune_every = config.question_rate_window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(prune_every);
        loop {
            ticker.tick().await;
            prune_state.rate_limiter.prune();
        }
    });

    let app = http::router(state);

    info!("Starting Classroom Q&A API on http://{}", config.bind_addr);
    let listener = TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
