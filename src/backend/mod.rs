//! Model backends: the network side of every LLM strategy.
//!
//! A backend offers up to three capabilities, matching what real servers
//! expose:
//!
//! | Capability | Request | Reply |
//! |------------|---------|-------|
//! | [`ModelBackend::chat`] | system prompt, text, images, file ids | model text |
//! | [`ModelBackend::upload`] | original file bytes | opaque file id |
//! | [`ModelBackend::submit_file`] | original file bytes + prompt | text or structured JSON |
//!
//! Strategies only depend on this trait, so tests drive the whole pipeline
//! with an in-memory backend and no network.

pub mod http;
pub mod llm;
pub mod oom;

use crate::document::SourceFile;
use crate::error::BackendError;
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use serde_json::Value;

pub use http::HttpBackend;
pub use llm::LlmProviderBackend;
pub use oom::{MarkerOomDetector, OomDetector};

/// One request to a model.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub user_text: String,
    /// Page images, sent one message per page.
    pub images: Vec<EncodedImage>,
    /// Ids returned by [`ModelBackend::upload`] that the model should read.
    pub file_ids: Vec<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Reply to a raw file submission.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendReply {
    /// Free-form model text; goes through the repairer.
    Text(String),
    /// The server already returned a structured analysis.
    Structured(Value),
}

/// A file stored by the backend's retrieval service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short label for logs and `source` fields.
    fn name(&self) -> &str;

    /// Whether requests must name a model explicitly. Servers that route to
    /// a default model (hosted providers) return `false`.
    fn needs_model(&self) -> bool {
        false
    }

    /// Chat completion; returns the assistant text.
    async fn chat(&self, request: &ModelRequest) -> Result<String, BackendError>;

    /// Store a file for later reference by id.
    async fn upload(&self, file: &SourceFile) -> Result<UploadedFile, BackendError> {
        let _ = file;
        Err(BackendError::Unsupported {
            capability: "file upload".into(),
        })
    }

    /// Forward the original file untouched together with the prompt.
    async fn submit_file(
        &self,
        file: &SourceFile,
        request: &ModelRequest,
    ) -> Result<BackendReply, BackendError> {
        let _ = (file, request);
        Err(BackendError::Unsupported {
            capability: "raw file submission".into(),
        })
    }
}
