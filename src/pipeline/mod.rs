//! Pipeline stages for document extraction.
//!
//! Each submodule implements exactly one transformation step and is
//! independently testable. Only the strategies in [`crate::strategy`] talk
//! to a model; everything here is pure computation except [`input`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ layout ──▶ assess ──▶ chunk ──▶ (strategy) ──▶ repair ──▶ normalize ──▶ merge
//! (path/URL) (spatial)  (tier)    (budget)   (cascade)     (JSON)     (locale)     (document)
//! ```
//!
//! 1. [`input`]     — load collaborator JSON or a raw file from a path or URL
//! 2. [`layout`]    — rebuild reading order and tables from positioned text
//! 3. [`assess`]    — score complexity and pick a context-window tier
//! 4. [`chunk`]     — split the text on page boundaries to fit the budget
//! 5. [`encode`]    — base64-wrap page images for vision requests
//! 6. [`repair`]    — recover a JSON object from a model reply
//! 7. [`normalize`] — locale-aware numbers, dates and identifiers
//! 8. [`merge`]     — combine chunk results into one document

pub mod assess;
pub mod chunk;
pub mod encode;
pub mod input;
pub mod layout;
pub mod merge;
pub mod normalize;
pub mod repair;
