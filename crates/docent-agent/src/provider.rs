use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use docent_core::types::{Role, Turn};

/// Common interface for the conversation LLM.
///
/// The adapter receives the whole history; how much of it travels upstream
/// is the adapter's business (the HTTP backend keeps its own per-session
/// context and only wants the newest user turn).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send the conversation, return the model's raw text reply.
    async fn send(&self, session_id: &str, history: &[Turn]) -> Result<String, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// HTTP LLM backend — POST /chat on a configured base URL.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLlmProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    response: String,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, session_id: &str, history: &[Turn]) -> Result<String, ProviderError> {
        let message = history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .ok_or_else(|| ProviderError::Parse("history has no user turn".to_string()))?;

        let url = format!("{}/chat", self.base_url);
        debug!(session_id, chars = message.len(), "sending chat request");

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "session_id": session_id,
                "message": message,
                "stream": false,
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(status, "LLM backend returned error");
            return Err(ProviderError::Api { status, message });
        }

        let body: ChatApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(body.response)
    }
}
