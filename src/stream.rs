//! Streaming extraction API: observe the run as it happens.
//!
//! Large documents take minutes on a local model server. The stream yields
//! every [`PipelineEvent`] of the run (assessment, chunking, strategy
//! failures, per-chunk results) and ends with
//! [`PipelineEvent::Completed`] or [`PipelineEvent::Cancelled`].
//!
//! The pipeline runs on a spawned tokio task. Dropping the stream, or calling
//! [`CancelToken::cancel`], stops it before the next chunk is submitted.

use crate::config::PipelineConfig;
use crate::document::SourceDocument;
use crate::error::DocExtractError;
use crate::extract::{resolve_backend, run_pipeline};
use crate::output::ExtractedDocument;
use crate::pipeline::input;
use crate::progress::{CancelToken, EventSink, PipelineEvent};
use crate::strategy::Dispatcher;
use futures::stream::StreamExt;
use std::pin::Pin;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{info, warn};

/// A boxed stream of pipeline events.
pub type EventStream = Pin<Box<dyn Stream<Item = PipelineEvent> + Send>>;

/// Load `input` (path or URL) and extract it, streaming events.
///
/// # Returns
/// - `Ok((EventStream, CancelToken))`
/// - `Err(DocExtractError)` — input or configuration errors, reported before
///   anything is spawned
pub async fn extract_stream(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<(EventStream, CancelToken), DocExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming extraction: {}", input_str);
    let doc = input::load_document(input_str, config.download_timeout_secs).await?;
    extract_document_stream(doc, config).await
}

/// Extract an in-memory document, streaming events.
pub async fn extract_document_stream(
    doc: SourceDocument,
    config: &PipelineConfig,
) -> Result<(EventStream, CancelToken), DocExtractError> {
    let backend = resolve_backend(config).await?;
    // Surface configuration errors here rather than as a silent empty stream.
    Dispatcher::new(config, backend.clone())?;

    let (sink, rx) = EventSink::channel();
    let token = CancelToken::new();
    let cancel = token.subscribe();
    let config = config.clone();

    tokio::spawn(async move {
        if let Err(e) = run_pipeline(doc, &config, backend, &sink, Some(cancel)).await {
            warn!("Streaming extraction stopped: {}", e);
        }
    });

    Ok((Box::pin(UnboundedReceiverStream::new(rx)), token))
}

/// Drain a stream and return the final document, if the run completed.
pub async fn final_document(mut events: EventStream) -> Option<ExtractedDocument> {
    while let Some(event) = events.next().await {
        if let PipelineEvent::Completed(document) = event {
            return Some(*document);
        }
    }
    None
}
