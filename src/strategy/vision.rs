//! Vision prompt: page images to a multimodal model.
//!
//! Highest fidelity for scans and complex layouts, and the most memory
//! hungry on the model server. The memory profile caps how many pages go
//! into one request; the encoded payloads live only for the duration of the
//! call and are dropped whether it succeeds or fails.

use super::{Strategy, StrategyContext, StrategyInput, StrategyKind};
use crate::error::StrategyError;
use crate::output::AnalysisResult;
use crate::pipeline::encode::encode_image;
use crate::prompts::{vision_user_message, VISION_SYSTEM_PROMPT};
use async_trait::async_trait;
use tracing::debug;

const BASE_CONFIDENCE: f64 = 0.97;

pub struct VisionStrategy;

#[async_trait]
impl Strategy for VisionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Vision
    }

    async fn analyze(
        &self,
        input: &StrategyInput<'_>,
        ctx: &StrategyContext<'_>,
    ) -> Result<AnalysisResult, StrategyError> {
        if input.images.is_empty() {
            return Err(StrategyError::MissingInput {
                what: "page images".into(),
            });
        }
        let backend = ctx.backend()?;

        let max_pages = ctx.config.memory_profile.max_vision_pages();
        if input.images.len() > max_pages {
            debug!(
                "Chunk {}: sending {} of {} page images ({:?})",
                input.chunk.metadata.chunk_index + 1,
                max_pages,
                input.images.len(),
                ctx.config.memory_profile
            );
        }

        let mut request = ctx.request(VISION_SYSTEM_PROMPT, vision_user_message(input.chunk));
        request.images = input
            .images
            .iter()
            .take(max_pages)
            .map(|img| encode_image(img))
            .collect();

        let outcome = ctx
            .call_with_retry("vision", || backend.chat(&request))
            .await;
        drop(request);

        ctx.finish_reply(self.kind(), &outcome?, BASE_CONFIDENCE)
    }
}
