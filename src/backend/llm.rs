//! Backend over an `edgequake-llm` provider (OpenAI, Anthropic, Gemini,
//! Ollama, ...).
//!
//! ## Message Layout
//!
//! 1. **System message** — extraction instructions + JSON schema
//! 2. **User message** — chunk text and fragment coordinates
//! 3. **One user message per page image** — labelled `Page N` so the model
//!    can cite which page a value came from
//!
//! Hosted providers pick a default model, so [`ModelBackend::needs_model`]
//! is `false` here.

use super::{ModelBackend, ModelRequest};
use crate::error::BackendError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

static STATUS_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:status|http)[^0-9]{0,12}([1-5][0-9]{2})\b").unwrap());

pub struct LlmProviderBackend {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl LlmProviderBackend {
    /// `label` names the provider in logs and result sources, e.g. `"openai"`.
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            name: format!("llm:{}", label.into()),
        }
    }

    fn build_messages(request: &ModelRequest) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(request.system_prompt.as_str())];
        messages.push(ChatMessage::user(request.user_text.as_str()));
        for image in &request.images {
            messages.push(ChatMessage::user_with_images(
                format!("Page {}", image.page_number),
                vec![image.to_image_data()],
            ));
        }
        messages
    }
}

impl std::fmt::Debug for LlmProviderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProviderBackend")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl ModelBackend for LlmProviderBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ModelRequest) -> Result<String, BackendError> {
        if !request.file_ids.is_empty() {
            return Err(BackendError::Unsupported {
                capability: "file references".into(),
            });
        }
        let messages = Self::build_messages(request);
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let start = Instant::now();
        match self.provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    self.name,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                Ok(response.content)
            }
            Err(e) => Err(classify_error(&e.to_string())),
        }
    }
}

/// Map a provider error message onto a [`BackendError`].
///
/// Providers surface failures as formatted strings; the HTTP status, when
/// present, is recovered from the text.
pub(crate) fn classify_error(message: &str) -> BackendError {
    let lower = message.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        return BackendError::Timeout { secs: 0 };
    }
    if let Some(status) = STATUS_CODE
        .captures(message)
        .and_then(|c| c[1].parse::<u16>().ok())
    {
        return BackendError::Http {
            status,
            body: message.to_string(),
        };
    }
    if lower.contains("rate limit") {
        return BackendError::Http {
            status: 429,
            body: message.to_string(),
        };
    }
    BackendError::Network(message.to_string())
}
