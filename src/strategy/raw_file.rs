//! Raw file: forward the original bytes untouched to an endpoint that reads
//! files itself, skipping all client-side reconstruction.

use super::{Strategy, StrategyContext, StrategyInput, StrategyKind};
use crate::backend::BackendReply;
use crate::error::{BackendError, StrategyError};
use crate::output::AnalysisResult;
use crate::pipeline::normalize::result_from_value;
use crate::prompts::{file_user_message, FILE_SYSTEM_PROMPT};
use async_trait::async_trait;
use serde_json::Value;

/// Server-side structured analysis.
const STRUCTURED_CONFIDENCE: f64 = 0.95;
/// Free text from the server, through the repairer.
const TEXT_CONFIDENCE: f64 = 0.85;

pub struct RawFileStrategy;

#[async_trait]
impl Strategy for RawFileStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RawFile
    }

    async fn analyze(
        &self,
        input: &StrategyInput<'_>,
        ctx: &StrategyContext<'_>,
    ) -> Result<AnalysisResult, StrategyError> {
        let file = input.file.ok_or_else(|| StrategyError::MissingInput {
            what: "original file".into(),
        })?;
        let backend = ctx.backend()?;

        let request = ctx.request(FILE_SYSTEM_PROMPT, file_user_message(&file.name));
        let reply = ctx
            .call_with_retry("raw file", || backend.submit_file(file, &request))
            .await?;

        match reply {
            BackendReply::Text(text) => ctx.finish_reply(self.kind(), &text, TEXT_CONFIDENCE),
            BackendReply::Structured(value) => {
                if let Some(detail) = value.get("error").and_then(error_detail) {
                    return Err(if ctx.config.oom_detector.is_oom_text(&detail) {
                        StrategyError::OutOfMemory { detail }
                    } else {
                        StrategyError::Backend(BackendError::InvalidResponse(detail))
                    });
                }
                let record = ["analysis", "data", "result"]
                    .iter()
                    .filter_map(|k| value.get(*k))
                    .find(|v| v.is_object())
                    .unwrap_or(&value);

                let mut result = result_from_value(record);
                result.confidence = STRUCTURED_CONFIDENCE;
                result.analysis_method = self.kind().as_str().to_string();
                result.source = self.kind().as_str().to_string();
                Ok(result)
            }
        }
    }
}

/// Text of an `error` field that actually reports a failure. Success
/// envelopes carry `"error": null` or `false`.
fn error_detail(error: &Value) -> Option<String> {
    match error {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) if !map.is_empty() => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        ),
        Value::Bool(true) => Some("server reported an error".into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ModelBackend, ModelRequest};
    use crate::config::PipelineConfig;
    use crate::document::SourceFile;
    use crate::output::DocumentType;
    use crate::pipeline::chunk::{ChunkMetadata, DocumentChunk};
    use serde_json::json;

    struct FileServer(BackendReply);

    #[async_trait]
    impl ModelBackend for FileServer {
        fn name(&self) -> &str {
            "file-server"
        }

        async fn chat(&self, _request: &ModelRequest) -> Result<String, BackendError> {
            Err(BackendError::Unsupported {
                capability: "chat".into(),
            })
        }

        async fn submit_file(
            &self,
            _file: &SourceFile,
            _request: &ModelRequest,
        ) -> Result<BackendReply, BackendError> {
            Ok(self.0.clone())
        }
    }

    fn run(reply: BackendReply) -> Result<AnalysisResult, StrategyError> {
        let config = PipelineConfig::default();
        let backend = FileServer(reply);
        let ctx = StrategyContext {
            config: &config,
            backend: Some(&backend),
        };
        let chunk = DocumentChunk {
            id: 0,
            spatial_text: String::new(),
            elements: vec![],
            metadata: ChunkMetadata {
                chunk_index: 0,
                total_chunks: 1,
                page_range: None,
            },
        };
        let file = SourceFile {
            name: "ponuda.pdf".into(),
            mime_type: "application/pdf".into(),
            bytes: b"%PDF-1.4".to_vec(),
        };
        let input = StrategyInput {
            chunk: &chunk,
            images: vec![],
            file: Some(&file),
        };
        tokio_test::block_on(RawFileStrategy.analyze(&input, &ctx))
    }

    #[test]
    fn structured_reply_is_taken_as_is() {
        let r = run(BackendReply::Structured(json!({
            "analysis": { "documentType": "quote", "documentNumber": "P-9" }
        })))
        .unwrap();
        assert_eq!(r.document_type, DocumentType::Quote);
        assert_eq!(r.document_number.as_deref(), Some("P-9"));
        assert_eq!(r.confidence, STRUCTURED_CONFIDENCE);
        assert_eq!(r.source, "raw_file");
    }

    #[test]
    fn empty_error_field_is_a_success_envelope() {
        for error in [json!(null), json!(false), json!(""), json!({})] {
            let r = run(BackendReply::Structured(json!({
                "error": error,
                "analysis": { "documentNumber": "P-9" }
            })))
            .unwrap();
            assert_eq!(r.document_number.as_deref(), Some("P-9"));
        }
    }

    #[test]
    fn structured_error_object_is_a_failure() {
        let err = run(BackendReply::Structured(json!({
            "error": { "message": "unsupported file type" }
        })))
        .unwrap_err();
        assert!(matches!(
            err,
            StrategyError::Backend(BackendError::InvalidResponse(ref d)) if d == "unsupported file type"
        ));
    }

    #[test]
    fn text_reply_goes_through_the_repairer() {
        let r = run(BackendReply::Text("Here you go: {\"documentNumber\": \"P-9\"}".into())).unwrap();
        assert_eq!(r.document_number.as_deref(), Some("P-9"));
        assert!((r.confidence - (TEXT_CONFIDENCE - 0.05)).abs() < 1e-9);
        assert_eq!(r.analysis_method, "raw_file:balanced");
    }

    #[test]
    fn structured_error_reports_oom() {
        let err = run(BackendReply::Structured(json!({ "error": "model failed: out of memory" })))
            .unwrap_err();
        assert!(err.is_oom());
    }

    #[test]
    fn missing_file_is_missing_input() {
        let config = PipelineConfig::default();
        let ctx = StrategyContext {
            config: &config,
            backend: None,
        };
        let chunk = DocumentChunk {
            id: 0,
            spatial_text: "x".into(),
            elements: vec![],
            metadata: ChunkMetadata {
                chunk_index: 0,
                total_chunks: 1,
                page_range: None,
            },
        };
        let input = StrategyInput {
            chunk: &chunk,
            images: vec![],
            file: None,
        };
        let err = tokio_test::block_on(RawFileStrategy.analyze(&input, &ctx)).unwrap_err();
        assert!(matches!(err, StrategyError::MissingInput { .. }));
    }
}
