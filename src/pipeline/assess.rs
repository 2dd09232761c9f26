//! Document complexity scoring and context-tier recommendation.
//!
//! The assessment is advisory: it picks a nominal context window when the
//! caller did not configure one, and its size hints are logged. It never
//! rejects a document.

use crate::document::SourceDocument;
use crate::pipeline::chunk::estimate_tokens;
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Recommended model context tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContextTier {
    Small,
    Medium,
    Large,
    Xlarge,
}

impl ContextTier {
    /// Nominal context window in tokens.
    pub fn context_window_tokens(self) -> usize {
        match self {
            ContextTier::Small => 4096,
            ContextTier::Medium => 8192,
            ContextTier::Large => 16384,
            ContextTier::Xlarge => 32768,
        }
    }

    /// Largest document (characters) a model of this tier handles comfortably.
    pub fn max_document_chars(self) -> usize {
        match self {
            ContextTier::Small => 12_000,
            ContextTier::Medium => 24_000,
            ContextTier::Large => 48_000,
            ContextTier::Xlarge => 96_000,
        }
    }

    pub fn max_pages(self) -> usize {
        match self {
            ContextTier::Small => 2,
            ContextTier::Medium => 5,
            ContextTier::Large => 10,
            ContextTier::Xlarge => 25,
        }
    }
}

/// Raw size metrics of a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetrics {
    pub text_length: usize,
    pub element_count: usize,
    pub page_count: usize,
    pub file_size_bytes: u64,
}

impl DocumentMetrics {
    pub fn from_document(doc: &SourceDocument, text: &str) -> Self {
        Self {
            text_length: text.chars().count(),
            element_count: doc.element_count(),
            page_count: doc.pages.len(),
            file_size_bytes: doc.byte_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAssessment {
    pub tier: ContextTier,
    pub context_window_tokens: usize,
    pub max_document_chars: usize,
    pub max_pages: usize,
    pub estimated_tokens: usize,
    pub score: u32,
}

/// Score a document and recommend a tier.
///
/// | Metric | Points |
/// |--------|--------|
/// | text length | 1 (≤5k) · 2 (>5k) · 3 (>20k) · 4 (>50k) |
/// | elements | 0 · 1 (>500) · 2 (>2000) |
/// | pages | 0 · 1 (>3) · 2 (>10) |
/// | file size | 0 · 1 (>1 MiB) · 2 (>5 MiB) |
///
/// Score ≥8 → XLARGE, ≥6 → LARGE, ≥4 → MEDIUM, else SMALL.
pub fn assess(metrics: &DocumentMetrics) -> ContextAssessment {
    let text_points = match metrics.text_length {
        n if n > 50_000 => 4,
        n if n > 20_000 => 3,
        n if n > 5_000 => 2,
        _ => 1,
    };
    let element_points = match metrics.element_count {
        n if n > 2000 => 2,
        n if n > 500 => 1,
        _ => 0,
    };
    let page_points = match metrics.page_count {
        n if n > 10 => 2,
        n if n > 3 => 1,
        _ => 0,
    };
    let size_points = match metrics.file_size_bytes {
        n if n > 5 * MIB => 2,
        n if n > MIB => 1,
        _ => 0,
    };

    let score = text_points + element_points + page_points + size_points;
    let tier = match score {
        s if s >= 8 => ContextTier::Xlarge,
        s if s >= 6 => ContextTier::Large,
        s if s >= 4 => ContextTier::Medium,
        _ => ContextTier::Small,
    };

    ContextAssessment {
        tier,
        context_window_tokens: tier.context_window_tokens(),
        max_document_chars: tier.max_document_chars(),
        max_pages: tier.max_pages(),
        estimated_tokens: metrics.text_length.div_ceil(4),
        score,
    }
}

/// Convenience: assess a document given its reconstructed text.
pub fn assess_document(doc: &SourceDocument, text: &str) -> ContextAssessment {
    let mut a = assess(&DocumentMetrics::from_document(doc, text));
    a.estimated_tokens = estimate_tokens(text);
    a
}
