//! Upload/RAG: store the original file with the backend's retrieval
//! service, then ask about it by id.

use super::{Strategy, StrategyContext, StrategyInput, StrategyKind};
use crate::error::StrategyError;
use crate::output::AnalysisResult;
use crate::prompts::{file_user_message, FILE_SYSTEM_PROMPT};
use async_trait::async_trait;
use tracing::info;

const BASE_CONFIDENCE: f64 = 0.92;

pub struct UploadStrategy;

#[async_trait]
impl Strategy for UploadStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Upload
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

        let uploaded = ctx
            .call_with_retry("upload", || backend.upload(file))
            .await?;
        info!("'{}' stored as {}", uploaded.name, uploaded.id);

        let mut request = ctx.request(FILE_SYSTEM_PROMPT, file_user_message(&uploaded.name));
        request.file_ids.push(uploaded.id);
        let reply = ctx
            .call_with_retry("upload analysis", || backend.chat(&request))
            .await?;
        ctx.finish_reply(self.kind(), &reply, BASE_CONFIDENCE)
    }
}
