//! Error types for the edgequake-docextract library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`DocExtractError`] — **Fatal**: extraction cannot start or finish at
//!   all (bad input file, model not selected, unwritable output). Returned as
//!   `Err(DocExtractError)` from the top-level `extract*` functions.
//!
//! * [`StrategyError`] — **Non-fatal**: one extraction strategy failed for one
//!   chunk (transport error, timeout, out-of-memory, unparsable reply). The
//!   dispatcher records it and moves on to the next strategy, ending with the
//!   deterministic one that cannot fail.
//!
//! * [`BackendError`] — a model backend call failed. Always wrapped into a
//!   [`StrategyError`] before it reaches the dispatcher.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docextract library.
///
/// Strategy-level failures use [`StrategyError`] and are absorbed by the
/// fallback cascade rather than propagated here.
#[derive(Debug, Error)]
pub enum DocExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file was read but is not a valid source-document JSON.
    #[error("'{source_name}' is not a valid source document: {detail}\nExpected JSON with a \"pages\" array.")]
    InvalidDocument { source_name: String, detail: String },

    // ── Configuration errors ──────────────────────────────────────────────
    /// A model-requiring strategy was configured but no model was selected.
    #[error("Strategy '{strategy}' requires a model but none is selected.\nPass --model <NAME> or set EDGEQUAKE_MODEL.")]
    ModelNotSelected { strategy: String },

    /// Model strategies are configured but no backend could be resolved.
    #[error("Model backend '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Run control ───────────────────────────────────────────────────────
    /// The run was cancelled before every chunk was analyzed.
    #[error("Extraction cancelled after {completed} of {total} chunk(s)")]
    Cancelled { completed: usize, total: usize },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed call to a model backend.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum BackendError {
    /// Non-2xx HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request did not complete in time.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection refused, DNS failure, reset, ...
    #[error("network error: {0}")]
    Network(String),

    /// The backend does not offer this capability (upload, raw file, ...).
    #[error("backend does not support {capability}")]
    Unsupported { capability: String },

    /// 2xx reply whose body could not be understood.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http { status, .. } => matches!(status, 408 | 429 | 502 | 503 | 504),
            BackendError::Network(_) => true,
            BackendError::Timeout { .. }
            | BackendError::Unsupported { .. }
            | BackendError::InvalidResponse(_) => false,
        }
    }
}

/// A non-fatal failure of one strategy on one chunk.
///
/// Recorded by the dispatcher, emitted as a progress event, and folded into
/// the `source` field of the result that eventually succeeds.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum StrategyError {
    /// The backend call failed after retries.
    #[error("backend call failed: {0}")]
    Backend(#[from] BackendError),

    /// The backend reported memory exhaustion.
    #[error("backend ran out of memory: {detail}")]
    OutOfMemory { detail: String },

    /// No structured record could be recovered from the reply.
    #[error("unparsable model response: {preview}")]
    Unparsable { preview: String },

    /// The strategy needs input the document does not carry (images, file).
    #[error("missing input: {what}")]
    MissingInput { what: String },

    /// The strategy attempt exceeded `chunk_timeout_secs`.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl StrategyError {
    /// Short machine-readable tag used in `source = "fallback:<reason>"`.
    pub fn reason(&self) -> &'static str {
        match self {
            StrategyError::Backend(BackendError::Http { .. }) => "http",
            StrategyError::Backend(BackendError::Timeout { .. }) => "timeout",
            StrategyError::Backend(BackendError::Network(_)) => "network",
            StrategyError::Backend(BackendError::Unsupported { .. }) => "unsupported",
            StrategyError::Backend(BackendError::InvalidResponse(_)) => "invalid-response",
            StrategyError::OutOfMemory { .. } => "oom",
            StrategyError::Unparsable { .. } => "unparsable",
            StrategyError::MissingInput { .. } => "missing-input",
            StrategyError::Timeout { .. } => "timeout",
        }
    }

    pub fn is_oom(&self) -> bool {
        matches!(self, StrategyError::OutOfMemory { .. })
    }
}
