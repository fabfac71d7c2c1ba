use crate::actors::messages::EmbedMessage;
use crate::actors::traits::EmbeddingProvider;
use crate::config::ApiEndpoint;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use lru::LruCache;
use reqwest::Client;
use serde_json::json;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{error, info, warn};

const HANDLE_TIMEOUT: Duration = Duration::from_secs(30);
const REMOTE_TIMEOUT: Duration = Duration::from_secs(15);

/// A handle to the embedding actor.
///
/// Cloneable; every clone talks to the same runner and shares its LRU cache.
#[derive(Clone)]
pub struct EmbeddingActorHandle {
    sender: mpsc::Sender<EmbedMessage>,
}

impl EmbeddingActorHandle {
    /// Spawns an actor backed by the local `fastembed` encoder (AllMiniLML6V2, 384 dims).
    ///
    /// The model is loaded (and downloaded on first use) into `models_dir` when the runner starts.
    pub fn new_local(models_dir: PathBuf) -> Self {
        Self::spawn(Backend::Local {
            cache_dir: models_dir.join("embeddings"),
            model: None,
        })
    }

    /// Spawns an actor that calls an OpenAI-compatible `/embeddings` endpoint.
    pub fn new_remote(endpoint: ApiEndpoint) -> Self {
        Self::spawn(Backend::Remote {
            client: Client::new(),
            endpoint,
        })
    }

    fn spawn(backend: Backend) -> Self {
        let (sender, receiver) = mpsc::channel(64);
        let actor = EmbeddingActorRunner::new(receiver, backend);
        tokio::spawn(async move { actor.run().await });
        Self { sender }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingActorHandle {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let (send, recv) = oneshot::channel();
        let msg = EmbedMessage::Embed {
            text: text.to_string(),
            responder: send,
        };
        if self.sender.send(msg).await.is_err() {
            warn!("Embedding actor closed");
            return None;
        }
        match timeout(HANDLE_TIMEOUT, recv).await {
            Ok(Ok(vector)) => vector,
            Ok(Err(_)) => {
                warn!("Embedding actor failed to respond");
                None
            }
            Err(_) => {
                warn!("Embedding request timed out after {:?}", HANDLE_TIMEOUT);
                None
            }
        }
    }
}

enum Backend {
    Local {
        cache_dir: PathBuf,
        model: Option<TextEmbedding>,
    },
    Remote {
        client: Client,
        endpoint: ApiEndpoint,
    },
}

// --- Actor Runner (Internal Logic) ---
struct EmbeddingActorRunner {
    receiver: mpsc::Receiver<EmbedMessage>,
    backend: Backend,
    cache: LruCache<String, Vec<f32>>,
}

impl EmbeddingActorRunner {
    const CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(1000) {
        Some(size) => size,
        None => panic!("Cache size must be non-zero"),
    };

    fn new(receiver: mpsc::Receiver<EmbedMessage>, backend: Backend) -> Self {
        Self {
            receiver,
            backend,
            cache: LruCache::new(Self::CACHE_SIZE),
        }
    }

    async fn run(mut self) {
        info!("EmbeddingActor started");

        if let Backend::Local { cache_dir, model } = &mut self.backend {
            let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2);
            options.show_download_progress = false;
            options.cache_dir = cache_dir.clone();

            match TextEmbedding::try_new(options) {
                Ok(loaded) => {
                    info!("Embedding model loaded successfully");
                    *model = Some(loaded);
                }
                Err(e) => error!("Failed to load embedding model: {}", e),
            }
        }

        while let Some(msg) = self.receiver.recv().await {
            self.handle_message(msg).await;
        }

        info!("EmbeddingActor stopped");
    }

    async fn handle_message(&mut self, msg: EmbedMessage) {
        match msg {
            EmbedMessage::Embed { text, responder } => {
                let vector = self.embed_cached(text).await;
                if responder.send(vector).is_err() {
                    warn!("Failed to send embedding response (channel closed)");
                }
            }
        }
    }

    async fn embed_cached(&mut self, text: String) -> Option<Vec<f32>> {
        if let Some(vector) = self.cache.get(&text) {
            return Some(vector.clone());
        }

        let vector = match &self.backend {
            Backend::Local { model, .. } => embed_local(model.as_ref(), &text),
            Backend::Remote { client, endpoint } => embed_remote(client, endpoint, &text).await,
        }?;

        if vector.is_empty() {
            warn!("Embedding provider returned an empty vector");
            return None;
        }

        self.cache.put(text, vector.clone());
        Some(vector)
    }
}

fn embed_local(model: Option<&TextEmbedding>, text: &str) -> Option<Vec<f32>> {
    let Some(model) = model else {
        warn!("Embedding model not loaded");
        return None;
    };
    match model.embed(vec![text.to_string()], None) {
        Ok(mut embeddings) if !embeddings.is_empty() => Some(embeddings.swap_remove(0)),
        Ok(_) => {
            warn!("No embedding generated");
            None
        }
        Err(e) => {
            warn!("Local embedding failed: {}", e);
            None
        }
    }
}

async fn embed_remote(client: &Client, endpoint: &ApiEndpoint, text: &str) -> Option<Vec<f32>> {
    let url = match endpoint.base_url.join("embeddings") {
        Ok(url) => url,
        Err(e) => {
            warn!("Invalid embedding endpoint: {}", e);
            return None;
        }
    };

    let mut request = client
        .post(url)
        .json(&json!({ "model": endpoint.model, "input": text }));
    if let Some(key) = &endpoint.api_key {
        request = request.bearer_auth(key);
    }

    let res = match timeout(REMOTE_TIMEOUT, request.send()).await {
        Ok(Ok(res)) => res,
        Ok(Err(e)) => {
            warn!("Embedding request failed: {}", e);
            return None;
        }
        Err(_) => {
            warn!("Embedding request timed out");
            return None;
        }
    };

    if !res.status().is_success() {
        warn!("Embedding request failed with status {}", res.status());
        return None;
    }

    let body: serde_json::Value = match res.json().await {
        Ok(body) => body,
        Err(e) => {
            warn!("Malformed embedding response: {}", e);
            return None;
        }
    };

    let values = body["data"][0]["embedding"].as_array()?;
    values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()
}
