//! Configuration types for document extraction.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The config is immutable once built and is
//! passed explicitly into every call; nothing is read from ambient state
//! except the provider auto-detection environment variables.

use crate::backend::oom::{MarkerOomDetector, OomDetector};
use crate::backend::ModelBackend;
use crate::error::DocExtractError;
use crate::strategy::StrategyKind;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Upper bound for [`PipelineConfig::max_retries`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for an extraction run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docextract::{PipelineConfig, StrategyKind, MemoryProfile};
///
/// let config = PipelineConfig::builder()
///     .strategies(vec![StrategyKind::Vision, StrategyKind::Coordinate])
///     .model("qwen2.5-vl-7b-instruct")
///     .memory_profile(MemoryProfile::LowMemory)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_tokens(), 4000);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Strategies to try, in order. Default: `[Coordinate]`.
    ///
    /// The deterministic strategy is always appended as the last resort, so
    /// an empty list means "regex only, no network".
    pub strategies: Vec<StrategyKind>,

    /// Model identifier, e.g. "gpt-4.1-mini", "qwen2.5-vl-7b-instruct".
    ///
    /// Required when the resolved backend cannot pick a model on its own
    /// (plain HTTP endpoints such as LM Studio).
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed backend. Takes precedence over everything else.
    pub backend: Option<Arc<dyn ModelBackend>>,

    /// Base URL of an OpenAI-compatible server (LM Studio, vLLM, llama.cpp).
    pub endpoint: Option<String>,

    /// Bearer token for `endpoint` / `upload_endpoint`.
    pub api_key: Option<String>,

    /// Base URL of a retrieval service accepting file uploads (Open WebUI).
    /// Defaults to `endpoint` when unset.
    pub upload_endpoint: Option<String>,

    /// Memory profile of the model server. Default: [`MemoryProfile::Balanced`].
    pub memory_profile: MemoryProfile,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Completion token limit; overrides the memory profile when set.
    pub max_tokens: Option<usize>,

    /// Retries on transient backend errors (429, 502–504, network). Default: 1,
    /// at most [`MAX_RETRIES`].
    ///
    /// Out-of-memory and parse failures are never retried; they fall through
    /// to the next strategy instead.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled on each retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Timeout for one strategy attempt on one chunk, in seconds. Default: 120.
    ///
    /// Each strategy in the cascade gets its own budget, so a chunk that
    /// falls through several model strategies can take a multiple of this.
    pub chunk_timeout_secs: u64,

    /// Model context window in tokens. When `None`, the context assessor
    /// picks a tier from the document's size.
    pub context_window_tokens: Option<usize>,

    /// Maximum positioned fragments listed in a coordinate prompt. Default: 1000.
    pub max_prompt_elements: usize,

    /// Custom system prompt. If None, each strategy uses its built-in prompt.
    pub system_prompt: Option<String>,

    /// Decides whether a backend reply or error means "out of memory".
    pub oom_detector: Arc<dyn OomDetector>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategies: vec![StrategyKind::Coordinate],
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            endpoint: None,
            api_key: None,
            upload_endpoint: None,
            memory_profile: MemoryProfile::default(),
            temperature: 0.1,
            max_tokens: None,
            max_retries: 1,
            retry_backoff_ms: 500,
            chunk_timeout_secs: 120,
            context_window_tokens: None,
            max_prompt_elements: 1000,
            system_prompt: None,
            oom_detector: Arc::new(MarkerOomDetector::default()),
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("strategies", &self.strategies)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("upload_endpoint", &self.upload_endpoint)
            .field("memory_profile", &self.memory_profile)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens())
            .field("max_retries", &self.max_retries)
            .field("chunk_timeout_secs", &self.chunk_timeout_secs)
            .field("context_window_tokens", &self.context_window_tokens)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective completion token limit.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
            .unwrap_or_else(|| self.memory_profile.max_tokens())
    }

    /// The configured strategies followed by the deterministic one.
    pub fn strategy_order(&self) -> Vec<StrategyKind> {
        let mut order: Vec<StrategyKind> = Vec::with_capacity(self.strategies.len() + 1);
        for kind in &self.strategies {
            if !order.contains(kind) && *kind != StrategyKind::Deterministic {
                order.push(*kind);
            }
        }
        order.push(StrategyKind::Deterministic);
        order
    }

    /// Whether any configured strategy talks to a model.
    pub fn needs_backend(&self) -> bool {
        self.strategies.iter().any(|k| k.requires_model())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn strategies(mut self, strategies: Vec<StrategyKind>) -> Self {
        self.config.strategies = strategies;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn upload_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.upload_endpoint = Some(url.into());
        self
    }

    pub fn memory_profile(mut self, profile: MemoryProfile) -> Self {
        self.config.memory_profile = profile;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = Some(n);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn chunk_timeout_secs(mut self, secs: u64) -> Self {
        self.config.chunk_timeout_secs = secs.max(1);
        self
    }

    pub fn context_window_tokens(mut self, tokens: usize) -> Self {
        self.config.context_window_tokens = Some(tokens);
        self
    }

    pub fn max_prompt_elements(mut self, n: usize) -> Self {
        self.config.max_prompt_elements = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn oom_detector(mut self, detector: Arc<dyn OomDetector>) -> Self {
        self.config.oom_detector = detector;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DocExtractError> {
        let c = &self.config;
        if let Some(ctx) = c.context_window_tokens {
            if ctx < 512 {
                return Err(DocExtractError::InvalidConfig(format!(
                    "Context window must be ≥ 512 tokens, got {ctx}"
                )));
            }
        }
        if c.max_tokens == Some(0) {
            return Err(DocExtractError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(DocExtractError::InvalidConfig(
                "Model name must not be empty".into(),
            ));
        }
        for url in [&c.endpoint, &c.upload_endpoint].into_iter().flatten() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(DocExtractError::InvalidConfig(format!(
                    "Endpoint must be an http(s) URL, got '{url}'"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How much memory the model server can spend on one request.
///
/// Local servers (LM Studio, llama.cpp) crash or answer "out of memory" when
/// a request carries too many page images or asks for too long a reply. The
/// profile bounds both:
///
/// | Profile | Completion tokens | Vision pages per request |
/// |---------|-------------------|--------------------------|
/// | HighMemory | 16 000 | 5 |
/// | Balanced   | 8 000  | 3 (default) |
/// | LowMemory  | 4 000  | 2 |
/// | Minimal    | 2 000  | 1 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemoryProfile {
    HighMemory,
    #[default]
    Balanced,
    LowMemory,
    Minimal,
}

impl MemoryProfile {
    pub fn max_tokens(self) -> usize {
        match self {
            MemoryProfile::HighMemory => 16_000,
            MemoryProfile::Balanced => 8_000,
            MemoryProfile::LowMemory => 4_000,
            MemoryProfile::Minimal => 2_000,
        }
    }

    pub fn max_vision_pages(self) -> usize {
        match self {
            MemoryProfile::HighMemory => 5,
            MemoryProfile::Balanced => 3,
            MemoryProfile::LowMemory => 2,
            MemoryProfile::Minimal => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.strategies, vec![StrategyKind::Coordinate]);
        assert_eq!(c.chunk_timeout_secs, 120);
        assert_eq!(c.max_tokens(), 8000);
        assert_eq!(c.max_prompt_elements, 1000);
        assert!((c.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn deterministic_is_always_last() {
        let c = PipelineConfig::builder()
            .strategies(vec![
                StrategyKind::Deterministic,
                StrategyKind::Vision,
                StrategyKind::Coordinate,
                StrategyKind::Vision,
            ])
            .build()
            .unwrap();
        assert_eq!(
            c.strategy_order(),
            vec![StrategyKind::Vision, StrategyKind::Coordinate, StrategyKind::Deterministic]
        );
    }

    #[test]
    fn empty_strategy_list_means_regex_only() {
        let c = PipelineConfig::builder().strategies(vec![]).build().unwrap();
        assert_eq!(c.strategy_order(), vec![StrategyKind::Deterministic]);
        assert!(!c.needs_backend());
    }

    #[test]
    fn explicit_max_tokens_overrides_profile() {
        let c = PipelineConfig::builder()
            .memory_profile(MemoryProfile::Minimal)
            .max_tokens(3000)
            .build()
            .unwrap();
        assert_eq!(c.max_tokens(), 3000);
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = PipelineConfig::builder()
            .temperature(5.0)
            .chunk_timeout_secs(0)
            .max_retries(u32::MAX)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.chunk_timeout_secs, 1);
        assert_eq!(c.max_retries, MAX_RETRIES);

        assert!(PipelineConfig::builder().context_window_tokens(100).build().is_err());
        assert!(PipelineConfig::builder().model("  ").build().is_err());
        assert!(PipelineConfig::builder().endpoint("localhost:1234").build().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = PipelineConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn memory_profiles() {
        assert_eq!(MemoryProfile::HighMemory.max_vision_pages(), 5);
        assert_eq!(MemoryProfile::Minimal.max_tokens(), 2000);
    }
}
