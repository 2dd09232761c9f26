//! Backend for self-hosted OpenAI-compatible servers (Open WebUI, LM Studio,
//! vLLM, llama.cpp server, ...).
//!
//! Unlike hosted providers these servers host many models and never pick
//! one on their own, so every request must carry an explicit model name.
//!
//! ## Endpoints
//!
//! | Capability | Method | Path |
//! |------------|--------|------|
//! | chat | POST | `/v1/chat/completions` |
//! | upload | POST (multipart) | first of [`UPLOAD_PATHS`] that exists |
//! | raw file | POST (multipart) | `/v1/files` |
//! | model list | GET | `/v1/models` |
//!
//! Servers disagree on the upload route, so the known routes are probed in
//! order; only 404/405 moves on to the next one.

use super::{BackendReply, ModelBackend, ModelRequest, UploadedFile};
use crate::document::SourceFile;
use crate::error::{BackendError, DocExtractError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upload routes tried in order when no explicit upload endpoint is set.
pub const UPLOAD_PATHS: &[&str] = &[
    "/api/v1/files/",
    "/api/v1/files/upload/",
    "/api/files/",
    "/api/files/upload/",
    "/rag/api/v1/document/upload",
];

/// Longest error body kept in a [`BackendError::Http`].
const MAX_ERROR_BODY: usize = 2000;

pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    upload_endpoint: Option<String>,
    timeout_secs: u64,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("upload_endpoint", &self.upload_endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl HttpBackend {
    /// Backend for the server at `base_url` (with or without a trailing `/v1`).
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, DocExtractError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DocExtractError::Internal(format!("HTTP client: {e}")))?;

        let trimmed = base_url.trim_end_matches('/');
        let base_url = trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string();

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
            upload_endpoint: None,
            timeout_secs,
        })
    }

    /// Upload to this URL instead of probing [`UPLOAD_PATHS`].
    pub fn with_upload_endpoint(mut self, url: impl Into<String>) -> Self {
        self.upload_endpoint = Some(url.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of the models the server offers.
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self.send(self.client.get(&url)).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        let list = body
            .get("data")
            .or_else(|| body.get("models"))
            .and_then(Value::as_array)
            .ok_or_else(|| BackendError::InvalidResponse("no model list in reply".into()))?;

        Ok(list
            .iter()
            .filter_map(|m| {
                m.get("id")
                    .or_else(|| m.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect())
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send and turn non-2xx statuses into [`BackendError::Http`].
    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Http {
            status: status.as_u16(),
            body: truncate(&body, MAX_ERROR_BODY),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            BackendError::Network(e.to_string())
        }
    }

    fn file_part(file: &SourceFile) -> Result<Part, BackendError> {
        Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| BackendError::InvalidResponse(format!("bad MIME type: {e}")))
    }

    fn chat_body(request: &ModelRequest) -> Value {
        let mut messages = vec![
            json!({ "role": "system", "content": request.system_prompt }),
            json!({ "role": "user", "content": request.user_text }),
        ];
        for image in &request.images {
            messages.push(json!({
                "role": "user",
                "content": [
                    { "type": "text", "text": format!("Page {}", image.page_number) },
                    { "type": "image_url", "image_url": { "url": image.data_url(), "detail": image.detail } }
                ]
            }));
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });
        if !request.file_ids.is_empty() {
            let files: Vec<Value> = request
                .file_ids
                .iter()
                .map(|id| json!({ "type": "file", "id": id }))
                .collect();
            body["files"] = Value::Array(files);
        }
        body
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn needs_model(&self) -> bool {
        true
    }

    async fn chat(&self, request: &ModelRequest) -> Result<String, BackendError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(
            "POST {} ({} image(s), {} file(s))",
            url,
            request.images.len(),
            request.file_ids.len()
        );
        let response = self
            .send(self.client.post(&url).json(&Self::chat_body(request)))
            .await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        completion_text(&body)
            .ok_or_else(|| BackendError::InvalidResponse("reply has no choices[0].message.content".into()))
    }

    async fn upload(&self, file: &SourceFile) -> Result<UploadedFile, BackendError> {
        let targets: Vec<String> = match &self.upload_endpoint {
            Some(url) => vec![url.clone()],
            None => UPLOAD_PATHS
                .iter()
                .map(|p| format!("{}{}", self.base_url, p))
                .collect(),
        };

        let mut last_err = BackendError::Unsupported {
            capability: "file upload".into(),
        };
        for url in &targets {
            let form = Form::new().part("file", Self::file_part(file)?);
            match self.send(self.client.post(url).multipart(form)).await {
                Ok(response) => {
                    let body: Value = response
                        .json()
                        .await
                        .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
                    let id = body
                        .get("id")
                        .or_else(|| body.pointer("/data/id"))
                        .or_else(|| body.get("file_id"))
                        .and_then(|v| match v {
                            Value::String(s) => Some(s.clone()),
                            Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        })
                        .ok_or_else(|| BackendError::InvalidResponse("upload reply has no id".into()))?;
                    info!("Uploaded '{}' to {} (id {})", file.name, url, id);
                    return Ok(UploadedFile {
                        id,
                        name: file.name.clone(),
                    });
                }
                Err(BackendError::Http { status, body })
                    if status == StatusCode::NOT_FOUND.as_u16()
                        || status == StatusCode::METHOD_NOT_ALLOWED.as_u16() =>
                {
                    debug!("Upload route {} unavailable (HTTP {})", url, status);
                    last_err = BackendError::Http { status, body };
                }
                Err(e) => {
                    warn!("Upload to {} failed: {}", url, e);
                    return Err(e);
                }
            }
        }
        Err(last_err)
    }

    async fn submit_file(
        &self,
        file: &SourceFile,
        request: &ModelRequest,
    ) -> Result<BackendReply, BackendError> {
        let url = format!("{}/v1/files", self.base_url);
        let mut form = Form::new()
            .part("file", Self::file_part(file)?)
            .text("prompt", format!("{}\n\n{}", request.system_prompt, request.user_text))
            .text("temperature", request.temperature.to_string())
            .text("max_tokens", request.max_tokens.to_string());
        if let Some(model) = &request.model {
            form = form.text("model", model.clone());
        }

        let response = self.send(self.client.post(&url).multipart(form)).await?;
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(match serde_json::from_str::<Value>(&text) {
            Ok(body) => match completion_text(&body) {
                Some(content) => BackendReply::Text(content),
                None if body.is_object() => BackendReply::Structured(body),
                None => BackendReply::Text(text),
            },
            Err(_) => BackendReply::Text(text),
        })
    }
}

/// `choices[0].message.content` of an OpenAI-style completion.
fn completion_text(body: &Value) -> Option<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
