//! Coordinate prompt: reconstructed text plus fragment positions to a text
//! model.
//!
//! Cheapest model strategy: no images, and the reconstructed text already
//! carries table structure. Fragment coordinates let the model resolve
//! label/value adjacency the text alone leaves ambiguous.

use super::{Strategy, StrategyContext, StrategyInput, StrategyKind};
use crate::error::StrategyError;
use crate::output::AnalysisResult;
use crate::prompts::{coordinate_user_message, SPATIAL_SYSTEM_PROMPT};
use async_trait::async_trait;
use tracing::debug;

const BASE_CONFIDENCE: f64 = 0.95;

pub struct CoordinateStrategy;

#[async_trait]
impl Strategy for CoordinateStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Coordinate
    }

    async fn analyze(
        &self,
        input: &StrategyInput<'_>,
        ctx: &StrategyContext<'_>,
    ) -> Result<AnalysisResult, StrategyError> {
        let chunk = input.chunk;
        if chunk.spatial_text.trim().is_empty() {
            return Err(StrategyError::MissingInput {
                what: "document text".into(),
            });
        }
        let backend = ctx.backend()?;

        let cap = ctx.config.max_prompt_elements;
        let shown = &chunk.elements[..chunk.elements.len().min(cap)];
        let truncated = shown.len() < chunk.elements.len();
        if truncated {
            debug!(
                "Chunk {}: listing {} of {} fragments",
                chunk.metadata.chunk_index + 1,
                shown.len(),
                chunk.elements.len()
            );
        }
        let elements_json = serde_json::to_string(shown).unwrap_or_else(|_| "[]".to_string());

        let request = ctx.request(
            SPATIAL_SYSTEM_PROMPT,
            coordinate_user_message(chunk, &elements_json, truncated),
        );
        let reply = ctx
            .call_with_retry("coordinate", || backend.chat(&request))
            .await?;
        ctx.finish_reply(self.kind(), &reply, BASE_CONFIDENCE)
    }
}
