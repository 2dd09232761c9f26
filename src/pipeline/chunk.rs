//! Token-budget-aware document chunking.
//!
//! A model's context window must hold the system prompt, the document text
//! and the JSON reply, so only 60 % of it is spent on document text. Page
//! boundaries are the preferred cut points: a page is a natural semantic unit
//! and keeps line items with their table header. When no page structure is
//! available the text is cut at a newline or space near the budget.

use crate::document::PositionedTextElement;
use crate::pipeline::layout::PageText;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rough characters-per-token ratio for Latin-script documents.
pub const CHARS_PER_TOKEN: usize = 4;

/// Floor for the per-chunk token budget.
pub const MIN_BUDGET_TOKENS: usize = 2000;

/// Share of the context window available for document text.
const CONTEXT_SHARE: f64 = 0.6;

/// How far back from the hard cut a newline is looked for (characters).
const NEWLINE_WINDOW: usize = 200;

/// Estimated tokens for a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Per-chunk token budget for a context window.
pub fn token_budget(context_window_tokens: usize) -> usize {
    MIN_BUDGET_TOKENS.max((context_window_tokens as f64 * CONTEXT_SHARE) as usize)
}

/// Separator inserted between pages when a document is flattened to text.
pub fn page_marker(page_number: u32) -> String {
    format!("\n\n<!-- page {page_number} -->\n\n")
}

/// Join page texts with [`page_marker`]s.
pub fn join_pages(pages: &[PageText]) -> String {
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            out.push_str(&page_marker(page.page_number));
        }
        out.push_str(&page.text);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// 0-based position in the chunk list.
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Page numbers covered, when page structure was available.
    pub page_range: Option<Vec<u32>>,
}

/// A context-window-sized slice of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub id: usize,
    pub spatial_text: String,
    pub elements: Vec<PositionedTextElement>,
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.spatial_text)
    }

    /// Pages covered by this chunk (empty when unknown).
    pub fn pages(&self) -> &[u32] {
        self.metadata.page_range.as_deref().unwrap_or(&[])
    }
}

/// Splits documents into chunks that fit a token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    budget_tokens: usize,
}

impl Chunker {
    pub fn for_context_window(context_window_tokens: usize) -> Self {
        Self {
            budget_tokens: token_budget(context_window_tokens),
        }
    }

    pub fn budget_tokens(&self) -> usize {
        self.budget_tokens
    }

    /// Split a document.
    ///
    /// `text` is the full reconstructed text; when `pages` holds two or more
    /// pages it must equal [`join_pages`] of them. `elements` are distributed
    /// to the chunks that contain them.
    pub fn chunk(
        &self,
        text: &str,
        pages: &[PageText],
        elements: &[PositionedTextElement],
    ) -> Vec<DocumentChunk> {
        let drafts = if estimate_tokens(text) <= self.budget_tokens {
            let range = (!pages.is_empty()).then(|| pages.iter().map(|p| p.page_number).collect());
            vec![Draft {
                text: text.to_string(),
                pages: range,
                elements: elements.to_vec(),
            }]
        } else if pages.len() >= 2 {
            self.split_pages(pages, elements)
        } else {
            let pieces = self.split_chars(text);
            let mut drafts = assign_by_offset(pieces, elements);
            // Pieces of one oversized page still belong to that page.
            if let [only] = pages {
                for d in &mut drafts {
                    d.pages = Some(vec![only.page_number]);
                }
            }
            drafts
        };

        let total = drafts.len();
        debug!(
            "Chunked {} tokens into {} chunk(s) (budget {})",
            estimate_tokens(text),
            total,
            self.budget_tokens
        );

        drafts
            .into_iter()
            .enumerate()
            .map(|(i, d)| DocumentChunk {
                id: i,
                spatial_text: d.text,
                elements: d.elements,
                metadata: ChunkMetadata {
                    chunk_index: i,
                    total_chunks: total,
                    page_range: d.pages,
                },
            })
            .collect()
    }

    fn split_pages(&self, pages: &[PageText], elements: &[PositionedTextElement]) -> Vec<Draft> {
        let mut groups: Vec<Vec<&PageText>> = Vec::new();
        let mut current: Vec<&PageText> = Vec::new();
        let mut current_text = String::new();

        for page in pages {
            if current.is_empty() {
                current_text = page.text.clone();
                current.push(page);
                continue;
            }
            let candidate = format!("{current_text}{}{}", page_marker(page.page_number), page.text);
            if estimate_tokens(&candidate) > self.budget_tokens {
                groups.push(std::mem::take(&mut current));
                current_text = page.text.clone();
            } else {
                current_text = candidate;
            }
            current.push(page);
        }
        if !current.is_empty() {
            groups.push(current);
        }

        groups
            .into_iter()
            .map(|group| {
                let numbers: Vec<u32> = group.iter().map(|p| p.page_number).collect();
                let owned: Vec<PageText> = group.into_iter().cloned().collect();
                Draft {
                    text: join_pages(&owned),
                    elements: elements
                        .iter()
                        .filter(|e| numbers.contains(&e.page))
                        .cloned()
                        .collect(),
                    pages: Some(numbers),
                }
            })
            .collect()
    }

    /// Cut plain text into pieces of at most `budget * 4` characters.
    ///
    /// Each cut backs off to the last newline in the final 200 characters,
    /// else to the last space; a piece with no whitespace at all is extended
    /// to the next whitespace instead of being split mid-word.
    fn split_chars(&self, text: &str) -> Vec<String> {
        let max_chars = self.budget_tokens * CHARS_PER_TOKEN;
        let mut pieces = Vec::new();
        let mut rest = text;

        while !rest.is_empty() {
            let Some(hard) = byte_offset(rest, max_chars) else {
                pieces.push(rest.to_string());
                break;
            };

            let window_start = byte_offset(rest, max_chars.saturating_sub(NEWLINE_WINDOW)).unwrap_or(0);
            let cut = if let Some(nl) = rest[window_start..hard].rfind('\n') {
                window_start + nl + 1
            } else if let Some(sp) = rest[..hard].rfind(' ') {
                sp + 1
            } else {
                match rest[hard..].find(char::is_whitespace) {
                    Some(i) => {
                        let ws = rest[hard + i..].chars().next().map_or(1, char::len_utf8);
                        hard + i + ws
                    }
                    None => rest.len(),
                }
            };

            pieces.push(rest[..cut].to_string());
            rest = &rest[cut..];
        }

        pieces
    }
}

struct Draft {
    text: String,
    pages: Option<Vec<u32>>,
    elements: Vec<PositionedTextElement>,
}

/// Byte offset of the `n`-th character, or `None` when the text is shorter.
fn byte_offset(text: &str, n: usize) -> Option<usize> {
    text.char_indices().nth(n).map(|(i, _)| i)
}

/// Give each element to the piece where its text is next found.
fn assign_by_offset(pieces: Vec<String>, elements: &[PositionedTextElement]) -> Vec<Draft> {
    let full: String = pieces.concat();
    let mut ends = Vec::with_capacity(pieces.len());
    let mut acc = 0;
    for p in &pieces {
        acc += p.len();
        ends.push(acc);
    }
    let piece_of = |offset: usize| ends.iter().position(|end| offset < *end).unwrap_or(ends.len().saturating_sub(1));

    let mut buckets: Vec<Vec<PositionedTextElement>> = vec![Vec::new(); pieces.len()];
    let mut cursor = 0;
    for el in elements {
        let needle = el.text.trim();
        let at = if needle.is_empty() {
            None
        } else {
            full[cursor..].find(needle).map(|i| cursor + i)
        };
        if let Some(pos) = at {
            cursor = pos;
        }
        if let Some(bucket) = buckets.get_mut(piece_of(cursor)) {
            bucket.push(el.clone());
        }
    }

    pieces
        .into_iter()
        .zip(buckets)
        .map(|(text, elements)| Draft {
            text,
            pages: None,
            elements,
        })
        .collect()
}
