//! # edgequake-docextract
//!
//! Extract structured data (parties, line items, totals) from business
//! documents such as invoices, quotes, delivery notes and goods receipts,
//! with first-class support for Croatian number and date formats.
//!
//! ## Why this crate?
//!
//! Page/OCR tools hand us positioned text fragments, not reading order. A
//! model given raw fragments loses the table structure; a model given the
//! whole document overflows a local server's context window or runs out of
//! memory. This crate rebuilds the spatial layout, splits the text into
//! context-sized chunks, asks a model for JSON through an ordered cascade of
//! strategies, repairs whatever JSON comes back, and falls back to regex
//! extraction so every run produces a document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! SourceDocument (positioned text, page images, original file)
//!  │
//!  ├─ 1. Layout     rows, columns and tables from x/y coordinates
//!  ├─ 2. Assess     complexity score → context-window tier
//!  ├─ 3. Chunk      page-aligned pieces within 60 % of the window
//!  ├─ 4. Strategies upload / raw file (whole file), then coordinate /
//!  │                vision / deterministic per chunk
//!  ├─ 5. Repair     JSON recovery cascade + locale normalization
//!  └─ 6. Merge      best field per chunk, deduplicated items
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docextract::{extract_document, PipelineConfig, StrategyKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .endpoint("http://localhost:1234/v1")
//!         .model("qwen2.5-vl-7b-instruct")
//!         .strategies(vec![StrategyKind::Coordinate, StrategyKind::Vision])
//!         .build()?;
//!     let doc = extract_document("racun.json", &config).await?;
//!     println!("{}", doc.to_json_pretty());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docextract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docextract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod locale;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod strategy;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{HttpBackend, LlmProviderBackend, MarkerOomDetector, ModelBackend, OomDetector};
pub use config::{MemoryProfile, PipelineConfig, PipelineConfigBuilder};
pub use document::{PageContent, PageImage, PositionedTextElement, SourceDocument, SourceFile};
pub use error::{BackendError, DocExtractError, StrategyError};
pub use extract::{
    assess_input, extract, extract_document, extract_sync, extract_to_file, extract_with_file,
    write_document,
};
pub use output::{AnalysisResult, DocumentType, ExtractedDocument, LineItem, Party, Totals};
pub use progress::{CancelToken, PipelineEvent};
pub use strategy::StrategyKind;
pub use stream::{extract_document_stream, extract_stream, EventStream};
