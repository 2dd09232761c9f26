//! Prompts for LLM-based document extraction.
//!
//! Every strategy asks for the same JSON record so the repairer and the
//! normaliser see one shape regardless of the path taken. Callers can
//! override the system prompt via
//! [`crate::config::PipelineConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

use crate::pipeline::chunk::DocumentChunk;

/// JSON shape every strategy asks the model for.
pub const OUTPUT_SCHEMA: &str = r#"{
  "documentType": "invoice | quote | delivery | transfer | receipt | other",
  "documentNumber": "string or null",
  "date": "DD.MM.YYYY or null",
  "dueDate": "DD.MM.YYYY or null",
  "currency": "EUR",
  "supplier": { "name": null, "address": null, "oib": null, "iban": null },
  "buyer": { "name": null, "address": null, "oib": null, "iban": null },
  "items": [
    { "position": 1, "code": null, "description": "", "quantity": null, "unit": "kom",
      "unitPrice": null, "discountPercent": null, "totalPrice": null }
  ],
  "totals": { "subtotal": null, "vatAmount": null, "totalAmount": null }
}"#;

/// System prompt for the coordinate strategy (reconstructed text + positions).
pub const SPATIAL_SYSTEM_PROMPT: &str = r#"You are an expert at extracting structured data from Croatian and international business documents (invoices, quotes, delivery notes, goods receipts, warehouse transfers).

The document text was reconstructed from positioned fragments. Rows of a table are separated by newlines, cells by "|" or tab characters. Fragment coordinates (x grows right, y grows down) are attached so you can use spatial adjacency:

1. A label and its value are on the same row (similar y) or directly below it (same x, next row).
2. The supplier block is usually top-left, the buyer block to its right or below it.
3. Item table columns align on x; use the header row to name each column.
4. Totals (osnovica / PDV / ukupno) sit below the item table, right-aligned.

OIB is an 11-digit tax number. Croatian IBANs start with HR followed by 19 digits.
Keep numbers exactly as printed; do not convert currencies.

Reply with ONLY one JSON object in this shape, no commentary, no Markdown fences:
"#;

/// System prompt for the vision strategy (page images).
pub const VISION_SYSTEM_PROMPT: &str = r#"You are an expert at reading scanned business documents (invoices, quotes, delivery notes, goods receipts, warehouse transfers), mostly in Croatian.

Read every page image carefully. Identify the supplier and the buyer, the document number and dates, every line of the item table, and the totals block. OIB is an 11-digit tax number; Croatian IBANs start with HR. Keep numbers exactly as printed.

Reply with ONLY one JSON object in this shape, no commentary, no Markdown fences:
"#;

/// System prompt for analysis of an uploaded or raw file.
pub const FILE_SYSTEM_PROMPT: &str = r#"You are an expert at extracting structured data from business documents. The document is attached as a file. Extract the supplier, buyer, document number, dates, all line items and the totals.

Reply with ONLY one JSON object in this shape, no commentary, no Markdown fences:
"#;

/// Full system prompt: instructions followed by the schema.
pub fn with_schema(instructions: &str) -> String {
    format!("{instructions}{OUTPUT_SCHEMA}")
}

/// Where this chunk sits in the document, so the model does not invent
/// totals for a middle chunk.
pub fn chunk_context(chunk: &DocumentChunk) -> String {
    let m = &chunk.metadata;
    if m.total_chunks <= 1 {
        return String::new();
    }
    let pages = match &m.page_range {
        Some(p) if !p.is_empty() => format!(
            " (pages {})",
            p.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
        ),
        _ => String::new(),
    };
    format!(
        "This is part {} of {}{} of a longer document. Extract only what appears in this part; use null for fields that are not visible here.\n\n",
        m.chunk_index + 1,
        m.total_chunks,
        pages
    )
}

/// User message for the coordinate strategy.
pub fn coordinate_user_message(chunk: &DocumentChunk, elements_json: &str, truncated: bool) -> String {
    let note = if truncated {
        "\n(Only the first fragments are listed; the text above is complete.)"
    } else {
        ""
    };
    format!(
        "{}DOCUMENT TEXT:\n{}\n\nFRAGMENTS (text, x, y, width, height, page):\n{}{}",
        chunk_context(chunk),
        chunk.spatial_text,
        elements_json,
        note
    )
}

/// User message accompanying page images.
pub fn vision_user_message(chunk: &DocumentChunk) -> String {
    format!(
        "{}Extract the document data from the attached page image(s).",
        chunk_context(chunk)
    )
}

/// Follow-up message referencing an uploaded file.
pub fn file_user_message(file_name: &str) -> String {
    format!("Extract the document data from the attached file '{file_name}'.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::chunk::ChunkMetadata;

    fn chunk(index: usize, total: usize, pages: Option<Vec<u32>>) -> DocumentChunk {
        DocumentChunk {
            id: index,
            spatial_text: "RAČUN br. 1".into(),
            elements: vec![],
            metadata: ChunkMetadata {
                chunk_index: index,
                total_chunks: total,
                page_range: pages,
            },
        }
    }

    #[test]
    fn schema_is_valid_json() {
        let v: serde_json::Value = serde_json::from_str(OUTPUT_SCHEMA).unwrap();
        assert!(v["items"].is_array());
        assert!(v["totals"]["totalAmount"].is_null());
    }

    #[test]
    fn single_chunk_has_no_context_line() {
        assert!(chunk_context(&chunk(0, 1, None)).is_empty());
    }

    #[test]
    fn chunk_context_names_part_and_pages() {
        let ctx = chunk_context(&chunk(1, 3, Some(vec![2, 3])));
        assert!(ctx.contains("part 2 of 3"));
        assert!(ctx.contains("pages 2, 3"));
    }

    #[test]
    fn coordinate_message_carries_text_and_fragments() {
        let msg = coordinate_user_message(&chunk(0, 1, None), "[]", true);
        assert!(msg.contains("RAČUN br. 1"));
        assert!(msg.contains("FRAGMENTS"));
        assert!(msg.contains("first fragments"));
    }

    #[test]
    fn prompts_end_with_schema() {
        assert!(with_schema(SPATIAL_SYSTEM_PROMPT).ends_with(OUTPUT_SCHEMA));
    }
}
