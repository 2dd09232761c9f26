//! Out-of-memory detection.
//!
//! Backends report memory exhaustion in wildly different ways: an HTTP 500
//! with a CUDA message, a 200 reply whose content is an error string, or a
//! dropped connection. Detection is therefore a pluggable predicate; the
//! default [`MarkerOomDetector`] matches the phrases local inference servers
//! actually emit.

use crate::error::BackendError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static OOM_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bOOM\b").unwrap());

/// Body fragments that make an HTTP 500 count as memory exhaustion.
const MEMORY_HINTS: &[&str] = &["memory", "alloc", "vram", "cuda", "metal"];

/// Decides whether a backend reply or error signals out-of-memory.
pub trait OomDetector: Send + Sync + fmt::Debug {
    /// A successful reply whose text is really an OOM report.
    fn is_oom_text(&self, text: &str) -> bool;

    /// A failed call.
    fn is_oom_error(&self, error: &BackendError) -> bool {
        match error {
            BackendError::Http { body, .. } => self.is_oom_text(body),
            BackendError::Network(msg) | BackendError::InvalidResponse(msg) => self.is_oom_text(msg),
            BackendError::Timeout { .. } | BackendError::Unsupported { .. } => false,
        }
    }
}

/// Phrase-based detector.
#[derive(Clone)]
pub struct MarkerOomDetector {
    markers: Vec<String>,
}

impl Default for MarkerOomDetector {
    fn default() -> Self {
        Self::new([
            "out of memory",
            "out-of-memory",
            "outofmemory",
            "insufficient memory",
            "not enough memory",
            "memory exhausted",
            "failed to allocate",
            "cannot allocate memory",
            "failed to load model",
        ])
    }
}

impl MarkerOomDetector {
    /// Detector matching the given phrases case-insensitively (plus the
    /// standalone word `OOM`).
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(|m| m.into().to_lowercase()).collect(),
        }
    }
}

impl fmt::Debug for MarkerOomDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkerOomDetector")
            .field("markers", &self.markers.len())
            .finish()
    }
}

impl OomDetector for MarkerOomDetector {
    fn is_oom_text(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.markers.iter().any(|m| lower.contains(m.as_str())) || OOM_WORD.is_match(text)
    }

    fn is_oom_error(&self, error: &BackendError) -> bool {
        match error {
            BackendError::Http { status: 500, body } => {
                let lower = body.to_lowercase();
                self.is_oom_text(body) || MEMORY_HINTS.iter().any(|h| lower.contains(h))
            }
            BackendError::Http { body, .. } => self.is_oom_text(body),
            BackendError::Network(msg) | BackendError::InvalidResponse(msg) => self.is_oom_text(msg),
            BackendError::Timeout { .. } | BackendError::Unsupported { .. } => false,
        }
    }
}
