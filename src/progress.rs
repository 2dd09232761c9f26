//! Pipeline events and cancellation.
//!
//! Progress is reported as a sequence of [`PipelineEvent`]s rather than
//! through callbacks: [`crate::stream::extract_stream`] hands them out as a
//! `Stream`, the CLI turns them into a progress bar, and the eager
//! [`crate::extract::extract`] runs the same pipeline with no sink at all.
//!
//! A run emits, in order:
//!
//! ```text
//! Assessed ─▶ [FileAnalyzed] ─▶ Chunked ─▶ (ChunkStarted ─▶ StrategyFailed* ─▶ ChunkCompleted)* ─▶ Completed
//!                                                                      └──▶ Cancelled
//! ```

use crate::output::ExtractedDocument;
use crate::pipeline::assess::ContextAssessment;
use crate::strategy::StrategyKind;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Something that happened during an extraction run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Complexity assessment of the whole document.
    Assessed(ContextAssessment),

    /// A whole-file strategy produced the result; no chunking follows.
    FileAnalyzed { strategy: String, confidence: f64 },

    /// The document was split.
    Chunked { total_chunks: usize, budget_tokens: usize },

    /// A chunk is about to be submitted.
    ChunkStarted {
        chunk_index: usize,
        total_chunks: usize,
        pages: Vec<u32>,
    },

    /// One strategy failed; the cascade continues. `chunk_index` is `None`
    /// for whole-file strategies.
    StrategyFailed {
        chunk_index: Option<usize>,
        strategy: StrategyKind,
        reason: &'static str,
        error: String,
    },

    /// A chunk has its result.
    ChunkCompleted {
        chunk_index: usize,
        total_chunks: usize,
        source: String,
        confidence: f64,
        oom_detected: bool,
    },

    /// The run stopped before submitting the next chunk.
    Cancelled { completed_chunks: usize },

    /// The merged document.
    Completed(Box<ExtractedDocument>),
}

/// Where the pipeline sends its events. Sending never blocks and never fails
/// the run; a dropped receiver only means nobody is listening any more.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    /// A sink that discards everything.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// A channel sink whose receiver was dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }
}

/// Requests cancellation of a running extraction.
///
/// The pipeline checks before each chunk; the chunk already in flight runs
/// to completion or to its timeout.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver handed to the pipeline.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_sink_is_silent() {
        let sink = EventSink::none();
        sink.emit(PipelineEvent::Cancelled { completed_chunks: 0 });
        assert!(!sink.is_closed());
    }

    #[test]
    fn channel_sink_delivers_and_detects_drop() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(PipelineEvent::Chunked {
            total_chunks: 2,
            budget_tokens: 4915,
        });
        match rx.try_recv() {
            Ok(PipelineEvent::Chunked { total_chunks, .. }) => assert_eq!(total_chunks, 2),
            other => panic!("unexpected {other:?}"),
        }
        drop(rx);
        assert!(sink.is_closed());
    }

    #[test]
    fn cancel_token_is_shared_by_clones() {
        let token = CancelToken::new();
        let rx = token.subscribe();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(*rx.borrow());
    }
}
