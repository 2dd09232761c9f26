//! Combine per-chunk results into one document.
//!
//! Each header field is taken independently from the most confident chunk
//! that actually populated it, so a low-confidence chunk can still supply
//! the due date the others missed. Line items are concatenated and
//! deduplicated by a 20-character case-insensitive description prefix.

use crate::output::{
    AnalysisResult, ChunkSummary, DocumentType, ExtractedDocument, LineItem, Party, Totals,
};
use crate::pipeline::normalize::normalize_result;
use std::collections::HashSet;
use tracing::debug;

/// Description prefix length used to detect the same item in two chunks.
pub const DEDUP_PREFIX_CHARS: usize = 20;

/// Merge chunk results in chunk order.
pub fn merge(mut results: Vec<AnalysisResult>) -> ExtractedDocument {
    results.sort_by_key(|r| r.chunk_index.unwrap_or(0));
    let chunks: Vec<ChunkSummary> = results.iter().map(ChunkSummary::from).collect();
    let oom_detected = results.iter().any(|r| r.oom_detected);

    if results.len() <= 1 {
        let mut r = results.pop().unwrap_or_default();
        normalize_result(&mut r);
        return ExtractedDocument {
            document_type: r.document_type,
            document_number: r.document_number,
            date: r.date,
            due_date: r.due_date,
            currency: r.currency,
            supplier: r.supplier,
            buyer: r.buyer,
            items: r.items,
            totals: r.totals,
            confidence: r.confidence,
            analysis_method: r.analysis_method,
            source: r.source,
            oom_detected,
            chunk_count: chunks.len(),
            chunks,
        };
    }

    let ranked = rank(&results, false);
    let ranked_late = rank(&results, true);

    let document_type = ranked
        .iter()
        .map(|r| r.document_type)
        .find(|t| *t != DocumentType::Other)
        .unwrap_or_default();

    let item_total: usize = results.iter().map(|r| r.items.len()).sum();
    let items = dedup_items(results.iter().flat_map(|r| r.items.iter().cloned()));
    debug!(
        "Merged {} chunks: {} items ({} duplicates dropped)",
        results.len(),
        items.len(),
        item_total - items.len()
    );

    let confidence = results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64;
    let methods: Vec<&str> = results.iter().map(|r| r.analysis_method.as_str()).collect();
    let mut sources: Vec<&str> = Vec::new();
    for r in &results {
        if !sources.contains(&r.source.as_str()) {
            sources.push(&r.source);
        }
    }

    let mut merged = AnalysisResult {
        document_type,
        document_number: pick(&ranked, |r| r.document_number.clone()),
        date: pick(&ranked, |r| r.date.clone()),
        due_date: pick(&ranked, |r| r.due_date.clone()),
        currency: ranked
            .iter()
            .map(|r| r.currency.clone())
            .find(|c| !c.is_empty())
            .unwrap_or_default(),
        supplier: pick_party(&ranked, |r| &r.supplier),
        buyer: pick_party(&ranked, |r| &r.buyer),
        items,
        totals: Totals {
            subtotal: pick(&ranked_late, |r| r.totals.subtotal),
            vat_amount: pick(&ranked_late, |r| r.totals.vat_amount),
            total_amount: pick(&ranked_late, |r| r.totals.total_amount),
        },
        confidence,
        analysis_method: format!("merged({})", methods.join(",")),
        source: sources.join(","),
        chunk_index: None,
        oom_detected,
    };
    normalize_result(&mut merged);

    ExtractedDocument {
        document_type: merged.document_type,
        document_number: merged.document_number,
        date: merged.date,
        due_date: merged.due_date,
        currency: merged.currency,
        supplier: merged.supplier,
        buyer: merged.buyer,
        items: merged.items,
        totals: merged.totals,
        confidence: merged.confidence,
        analysis_method: merged.analysis_method,
        source: merged.source,
        oom_detected,
        chunk_count: chunks.len(),
        chunks,
    }
}

/// Results ordered by descending confidence. Ties keep chunk order, or
/// reverse chunk order when `late_wins` (totals usually sit on the last page).
fn rank(results: &[AnalysisResult], late_wins: bool) -> Vec<&AnalysisResult> {
    let mut ranked: Vec<&AnalysisResult> = results.iter().collect();
    if late_wins {
        ranked.reverse();
    }
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    ranked
}

/// First populated value in rank order.
fn pick<T>(ranked: &[&AnalysisResult], get: impl Fn(&AnalysisResult) -> Option<T>) -> Option<T> {
    ranked.iter().copied().find_map(get)
}

fn pick_party(ranked: &[&AnalysisResult], get: impl Fn(&AnalysisResult) -> &Party) -> Party {
    Party {
        name: pick(ranked, |r| get(r).name.clone()),
        address: pick(ranked, |r| get(r).address.clone()),
        oib: pick(ranked, |r| get(r).oib.clone()),
        iban: pick(ranked, |r| get(r).iban.clone()),
    }
}

/// Drop items whose description prefix was already seen; renumber positions.
///
/// Items with an empty description never match each other.
pub fn dedup_items(items: impl IntoIterator<Item = LineItem>) -> Vec<LineItem> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<LineItem> = Vec::new();
    for item in items {
        let key: String = item
            .description
            .trim()
            .to_lowercase()
            .chars()
            .take(DEDUP_PREFIX_CHARS)
            .collect();
        if !key.is_empty() && !seen.insert(key) {
            continue;
        }
        out.push(item);
    }
    for (i, item) in out.iter_mut().enumerate() {
        item.position = i as u32 + 1;
    }
    out
}
