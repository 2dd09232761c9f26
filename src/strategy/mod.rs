//! Extraction strategies and the fallback cascade that drives them.
//!
//! Every strategy takes the same [`StrategyInput`] and returns an
//! [`AnalysisResult`] or a [`StrategyError`]. The [`Dispatcher`] walks the
//! configured list in order and stops at the first success; the
//! deterministic strategy is always last, so a chunk always gets a result.
//!
//! ```text
//!             ┌── upload ── raw_file ──┐   whole file, once
//! document ───┤                        ├── ok ──▶ done
//!             └──── failed / absent ───┘
//!                        │
//!                        ▼
//! each chunk ── coordinate ── vision ── deterministic ──▶ AnalysisResult
//!               (first success wins, failures recorded in `source`)
//! ```
//!
//! ## Retry Strategy
//!
//! 429 / 502-504 and network errors are transient on busy model servers.
//! They are retried with exponential backoff (`retry_backoff_ms * 2^attempt`,
//! capped at one minute) before the strategy is declared failed. Out-of-memory replies are never
//! retried: resubmitting the same prompt to a server that just ran out of
//! memory fails the same way, so the cascade moves on immediately.

pub mod coordinate;
pub mod deterministic;
pub mod raw_file;
pub mod upload;
pub mod vision;

use crate::backend::{ModelBackend, ModelRequest};
use crate::config::PipelineConfig;
use crate::document::{PageImage, SourceFile};
use crate::error::{BackendError, DocExtractError, StrategyError};
use crate::output::AnalysisResult;
use crate::pipeline::chunk::DocumentChunk;
use crate::pipeline::normalize::result_from_value;
use crate::pipeline::repair::{parse_response, RecoveryMethod};
use crate::progress::{EventSink, PipelineEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Characters of an unparsable reply kept in the error.
const PREVIEW_CHARS: usize = 200;
const MAX_BACKOFF_MS: u64 = 60_000;

/// The available extraction strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Reconstructed text + fragment coordinates to a text model.
    Coordinate,
    /// Page images to a vision model.
    Vision,
    /// Upload the file to a retrieval service, then ask about it by id.
    Upload,
    /// Post the original file bytes to a file-accepting endpoint.
    RawFile,
    /// Regex/keyword extraction. No network.
    Deterministic,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Coordinate => "coordinate",
            StrategyKind::Vision => "vision",
            StrategyKind::Upload => "upload",
            StrategyKind::RawFile => "raw_file",
            StrategyKind::Deterministic => "deterministic",
        }
    }

    /// Runs once on the whole file instead of per chunk.
    pub fn is_whole_file(&self) -> bool {
        matches!(self, StrategyKind::Upload | StrategyKind::RawFile)
    }

    pub fn requires_model(&self) -> bool {
        !matches!(self, StrategyKind::Deterministic)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one strategy attempt gets to look at.
#[derive(Debug, Clone)]
pub struct StrategyInput<'a> {
    pub chunk: &'a DocumentChunk,
    /// Page images of the chunk's pages, in page order.
    pub images: Vec<&'a PageImage>,
    pub file: Option<&'a SourceFile>,
}

/// Shared, read-only state for all attempts of one run.
pub struct StrategyContext<'a> {
    pub config: &'a PipelineConfig,
    pub backend: Option<&'a dyn ModelBackend>,
}

impl<'a> StrategyContext<'a> {
    /// The backend, or `MissingInput` when the run has none.
    pub fn backend(&self) -> Result<&'a dyn ModelBackend, StrategyError> {
        self.backend.ok_or_else(|| StrategyError::MissingInput {
            what: "model backend".into(),
        })
    }

    /// A request carrying the configured model and sampling settings.
    pub fn request(&self, default_prompt: &str, user_text: String) -> ModelRequest {
        let system_prompt = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| crate::prompts::with_schema(default_prompt));
        ModelRequest {
            system_prompt,
            user_text,
            images: Vec::new(),
            file_ids: Vec::new(),
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens(),
        }
    }

    /// Run a backend call, retrying transient failures with backoff.
    pub async fn call_with_retry<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, StrategyError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, BackendError>> + Send,
        T: Send,
    {
        let max_retries = self.config.max_retries;
        let mut attempt: u32 = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if self.config.oom_detector.is_oom_error(&e) {
                        return Err(StrategyError::OutOfMemory {
                            detail: e.to_string(),
                        });
                    }
                    if !e.is_transient() || attempt >= max_retries {
                        return Err(StrategyError::Backend(e));
                    }
                    attempt += 1;
                    let backoff = backoff_ms(self.config.retry_backoff_ms, attempt);
                    warn!(
                        "{}: retry {}/{} after {}ms ({})",
                        label, attempt, max_retries, backoff, e
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    /// Turn model text into a result: OOM check, repair cascade, normalisation.
    pub fn finish_reply(
        &self,
        kind: StrategyKind,
        reply: &str,
        base_confidence: f64,
    ) -> Result<AnalysisResult, StrategyError> {
        if self.config.oom_detector.is_oom_text(reply) {
            return Err(StrategyError::OutOfMemory {
                detail: preview(reply),
            });
        }
        let parsed = parse_response(reply).ok_or_else(|| StrategyError::Unparsable {
            preview: preview(reply),
        })?;

        let mut result = result_from_value(&parsed.value);
        result.confidence = parsed.confidence(base_confidence);
        result.analysis_method = match parsed.method {
            RecoveryMethod::Partial => "partial".to_string(),
            m if m.is_salvage() => format!("{}:{}", kind.as_str(), m.as_str()),
            _ => kind.as_str().to_string(),
        };
        result.source = kind.as_str().to_string();
        Ok(result)
    }
}

/// Delay before retry `attempt` (1-based): doubles each time, capped.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_BACKOFF_MS)
}

fn preview(text: &str) -> String {
    let mut p: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        p.push('…');
    }
    p
}

/// One way of turning a chunk (or the whole file) into a result.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn analyze(
        &self,
        input: &StrategyInput<'_>,
        ctx: &StrategyContext<'_>,
    ) -> Result<AnalysisResult, StrategyError>;
}

/// The built-in implementation of `kind`.
pub fn strategy_for(kind: StrategyKind) -> Box<dyn Strategy> {
    match kind {
        StrategyKind::Coordinate => Box::new(coordinate::CoordinateStrategy),
        StrategyKind::Vision => Box::new(vision::VisionStrategy),
        StrategyKind::Upload => Box::new(upload::UploadStrategy),
        StrategyKind::RawFile => Box::new(raw_file::RawFileStrategy),
        StrategyKind::Deterministic => Box::new(deterministic::DeterministicStrategy),
    }
}

/// Failures recorded so far for one chunk (or the whole file).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Degradation {
    /// Reason tag of the first real failure.
    pub reason: Option<&'static str>,
    pub oom: bool,
}

impl Degradation {
    fn record(&mut self, error: &StrategyError) {
        if self.reason.is_none() {
            self.reason = Some(error.reason());
        }
        self.oom |= error.is_oom();
    }

    fn apply(&self, result: &mut AnalysisResult) {
        if let Some(reason) = self.reason {
            result.source = format!("fallback:{reason}");
        }
        result.oom_detected |= self.oom;
    }
}

/// Walks the strategy cascade.
pub struct Dispatcher<'a> {
    config: &'a PipelineConfig,
    backend: Option<Arc<dyn ModelBackend>>,
    file_strategies: Vec<Box<dyn Strategy>>,
    chunk_strategies: Vec<Box<dyn Strategy>>,
}

impl<'a> fmt::Debug for Dispatcher<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = |s: &[Box<dyn Strategy>]| s.iter().map(|s| s.kind()).collect::<Vec<_>>();
        f.debug_struct("Dispatcher")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("file_strategies", &kinds(&self.file_strategies))
            .field("chunk_strategies", &kinds(&self.chunk_strategies))
            .finish()
    }
}

impl<'a> Dispatcher<'a> {
    /// Validate the configuration against the backend and build the cascade.
    ///
    /// # Errors
    /// - [`DocExtractError::ProviderNotConfigured`] — a model strategy is
    ///   configured but there is no backend
    /// - [`DocExtractError::ModelNotSelected`] — the backend needs an explicit
    ///   model name and none is set
    pub fn new(
        config: &'a PipelineConfig,
        backend: Option<Arc<dyn ModelBackend>>,
    ) -> Result<Self, DocExtractError> {
        let order = config.strategy_order();

        if let Some(kind) = order.iter().find(|k| k.requires_model()) {
            match &backend {
                None => {
                    return Err(DocExtractError::ProviderNotConfigured {
                        provider: config
                            .provider_name
                            .clone()
                            .unwrap_or_else(|| "auto".to_string()),
                        hint: "Set --provider/--endpoint, or an API key such as OPENAI_API_KEY, \
                               or use --strategy deterministic."
                            .into(),
                    })
                }
                Some(b) if b.needs_model() && config.model.is_none() => {
                    return Err(DocExtractError::ModelNotSelected {
                        strategy: kind.to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        let (file, chunk): (Vec<StrategyKind>, Vec<StrategyKind>) =
            order.into_iter().partition(|k| k.is_whole_file());
        debug!("Strategy order: file {:?}, chunk {:?}", file, chunk);

        Ok(Self {
            config,
            backend,
            file_strategies: file.into_iter().map(strategy_for).collect(),
            chunk_strategies: chunk.into_iter().map(strategy_for).collect(),
        })
    }

    /// Replace the built-in implementation of a strategy kind.
    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        let kind = strategy.kind();
        let slot = self
            .file_strategies
            .iter_mut()
            .chain(self.chunk_strategies.iter_mut())
            .find(|s| s.kind() == kind);
        if let Some(slot) = slot {
            *slot = strategy;
        }
        self
    }

    pub fn has_file_strategies(&self) -> bool {
        !self.file_strategies.is_empty()
    }

    fn context(&self) -> StrategyContext<'_> {
        StrategyContext {
            config: self.config,
            backend: self.backend.as_deref(),
        }
    }

    /// Try the whole-file strategies once.
    ///
    /// Returns the first result, or the recorded failures so the chunked
    /// cascade can carry them forward.
    pub async fn analyze_file(
        &self,
        whole: &DocumentChunk,
        file: Option<&SourceFile>,
        sink: &EventSink,
    ) -> Result<AnalysisResult, Degradation> {
        let input = StrategyInput {
            chunk: whole,
            images: Vec::new(),
            file,
        };
        let mut degradation = Degradation::default();
        match self
            .cascade(&self.file_strategies, &input, None, &mut degradation, sink)
            .await
        {
            Some(mut result) => {
                degradation.apply(&mut result);
                Ok(result)
            }
            None => Err(degradation),
        }
    }

    /// Run the per-chunk cascade. Never fails: the deterministic strategy
    /// is always the last resort.
    pub async fn analyze_chunk(
        &self,
        input: &StrategyInput<'_>,
        prior: &Degradation,
        sink: &EventSink,
    ) -> AnalysisResult {
        let index = input.chunk.metadata.chunk_index;
        let mut degradation = prior.clone();

        let mut result = match self
            .cascade(&self.chunk_strategies, input, Some(index), &mut degradation, sink)
            .await
        {
            Some(result) => result,
            None => {
                warn!("Chunk {}: every strategy failed", index + 1);
                AnalysisResult {
                    analysis_method: "none".into(),
                    source: "none".into(),
                    ..Default::default()
                }
            }
        };
        result.chunk_index = Some(index);
        degradation.apply(&mut result);
        result
    }

    /// Try `strategies` in order. Each attempt gets its own
    /// `chunk_timeout_secs` budget; a timeout moves on to the next strategy.
    async fn cascade(
        &self,
        strategies: &[Box<dyn Strategy>],
        input: &StrategyInput<'_>,
        chunk_index: Option<usize>,
        degradation: &mut Degradation,
        sink: &EventSink,
    ) -> Option<AnalysisResult> {
        let ctx = self.context();
        let limit = Duration::from_secs(self.config.chunk_timeout_secs);
        let label = match chunk_index {
            Some(i) => format!("chunk {}", i + 1),
            None => "file".to_string(),
        };

        for strategy in strategies {
            let kind = strategy.kind();
            debug!("{}: trying {}", label, kind);

            let outcome = match timeout(limit, strategy.analyze(input, &ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StrategyError::Timeout {
                    secs: self.config.chunk_timeout_secs,
                }),
            };

            match outcome {
                Ok(result) => {
                    info!(
                        "{}: {} succeeded (confidence {:.2})",
                        label, kind, result.confidence
                    );
                    return Some(result);
                }
                Err(e @ StrategyError::MissingInput { .. })
                | Err(e @ StrategyError::Backend(BackendError::Unsupported { .. })) => {
                    debug!("{}: {} skipped ({})", label, kind, e);
                }
                Err(e) => {
                    warn!("{}: {} failed: {}", label, kind, e);
                    degradation.record(&e);
                    sink.emit(PipelineEvent::StrategyFailed {
                        chunk_index,
                        strategy: kind,
                        reason: e.reason(),
                        error: e.to_string(),
                    });
                }
            }
        }
        None
    }
}
