use crate::actors::messages::{ActorError, AppError, LlmMessage};
use crate::actors::traits::LlmActor;
use crate::config::ApiEndpoint;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{info, warn};

/// A handle to the `LlmActor`.
///
/// This struct provides a public, cloneable interface for sending messages to the
/// running LLM actor. It abstracts away the `mpsc::Sender`.
#[derive(Clone)]
pub struct LlmActorHandle {
    sender: mpsc::Sender<LlmMessage>,
}

impl LlmActorHandle {
    /// Creates a new `LlmActor` talking to an OpenAI-compatible chat completions API.
    ///
    /// This will spawn the `LlmActorRunner` in a new Tokio task.
    pub fn new(endpoint: ApiEndpoint) -> Self {
        let (sender, receiver) = mpsc::channel(32);
        let actor = LlmActorRunner::new(receiver, endpoint);
        tokio::spawn(async move { actor.run().await });
        Self { sender }
    }
}

#[async_trait]
impl LlmActor for LlmActorHandle {
    async fn complete(
        &self,
        prompt: String,
        system_prompt: Option<String>,
    ) -> Result<String, AppError> {
        let (send, recv) = oneshot::channel();
        let msg = LlmMessage::Complete {
            prompt,
            system_prompt,
            responder: send,
        };

        self.sender
            .send(msg)
            .await
            .map_err(|_| AppError::Actor(ActorError::Internal("LLM Actor closed".to_string())))?;
        timeout(HANDLE_TIMEOUT, recv)
            .await
            .map_err(ActorError::from)?
            .map_err(|_| {
                AppError::Actor(ActorError::Internal(
                    "LLM Actor failed to respond".to_string(),
                ))
            })?
    }
}

// --- Constants ---
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(20);
const HANDLE_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const TEMPERATURE: f32 = 0.1;

// --- Actor Runner (Internal Logic) ---
struct LlmActorRunner {
    receiver: mpsc::Receiver<LlmMessage>,
    endpoint: ApiEndpoint,
    client: Client,
    retry_base_delay: Duration,
}

/// Outcome of one HTTP attempt: whether it is worth trying again.
enum AttemptError {
    Retryable(String),
    Fatal(String),
}

impl LlmActorRunner {
    fn new(receiver: mpsc::Receiver<LlmMessage>, endpoint: ApiEndpoint) -> Self {
        Self {
            receiver,
            endpoint,
            client: Client::new(),
            retry_base_delay: RETRY_BASE_DELAY,
        }
    }

    async fn run(mut self) {
        info!("LlmActor started (model: {})", self.endpoint.model);

        while let Some(msg) = self.receiver.recv().await {
            self.handle_message(msg).await;
        }

        info!("LlmActor stopped");
    }

    async fn handle_message(&mut self, msg: LlmMessage) {
        match msg {
            LlmMessage::Complete {
                prompt,
                system_prompt,
                responder,
            } => {
                let result = self.complete_with_retries(prompt, system_prompt).await;
                if responder.send(result).is_err() {
                    warn!("Failed to send completion response (channel closed)");
                }
            }
        }
    }

    async fn complete_with_retries(
        &self,
        prompt: String,
        system_prompt: Option<String>,
    ) -> Result<String, AppError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let payload = json!({
            "model": self.endpoint.model,
            "messages": messages,
            "temperature": TEMPERATURE,
        });

        let mut attempt = 0;
        loop {
            match self.send_once(&payload).await {
                Ok(text) => return Ok(text),
                Err(AttemptError::Retryable(reason)) if attempt < MAX_RETRIES => {
                    let delay = self.retry_base_delay * 2u32.pow(attempt);
                    attempt += 1;
                    warn!(
                        "LLM request failed ({}), retry {}/{} in {:?}",
                        reason, attempt, MAX_RETRIES, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Retryable(reason)) | Err(AttemptError::Fatal(reason)) => {
                    return Err(AppError::Actor(ActorError::LlmError(reason)));
                }
            }
        }
    }

    async fn send_once(&self, payload: &serde_json::Value) -> Result<String, AttemptError> {
        let url = self
            .endpoint
            .base_url
            .join("chat/completions")
            .map_err(|e| AttemptError::Fatal(format!("Invalid LLM endpoint: {}", e)))?;

        let mut request = self.client.post(url).json(payload);
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }

        let res = match timeout(COMPLETION_TIMEOUT, request.send()).await {
            Err(_) => return Err(AttemptError::Retryable("request timed out".to_string())),
            Ok(Err(e)) => return Err(AttemptError::Retryable(format!("transport error: {}", e))),
            Ok(Ok(res)) => res,
        };

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let reason = format!("status {}: {}", status, body);
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(AttemptError::Retryable(reason))
            } else {
                Err(AttemptError::Fatal(reason))
            };
        }

        let json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| AttemptError::Fatal(format!("Malformed completion body: {}", e)))?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AttemptError::Fatal("Completion had no message content".to_string()))
    }
}
