//! Spatial text reconstruction: positioned fragments → reading-ordered text.
//!
//! PDF text layers and OCR engines report a bag of fragments with bounding
//! boxes, in whatever order the producer emitted them. Models read far better
//! when the text comes back in human reading order with table columns kept
//! apart, so fragments are clustered into rows by `y`, ordered by `x`, and
//! either re-flowed as prose or emitted as a `|`-separated grid.
//!
//! All thresholds are relative to the average fragment height, which makes
//! the heuristics independent of DPI and page units.

use crate::document::{PositionedTextElement, SourceDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Rows whose first line matches one of these are item tables (HR + EN).
static TABLE_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:r\.?\s?br|rbr|šifra|sifra|naziv|opis|artikl\w*|količin\w*|kolicin\w*|kol|jmj|cijen\w*|iznos|rabat|description|qty|quantity|unit|price|amount|total|item)\b",
    )
    .unwrap()
});

/// Column positions are snapped to this grid (page units).
const COLUMN_SNAP: f64 = 5.0;

/// Minimum tolerance / minimum horizontal gap that counts as a word break.
const MIN_GAP: f64 = 5.0;

/// Reading-ordered text of one document or page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructedText {
    pub text: String,
    pub is_table: bool,
    /// Cell strings, one inner vector per row, when `is_table`.
    pub grid: Option<Vec<Vec<String>>>,
}

/// Fragments sharing a baseline.
#[derive(Debug, Clone)]
pub struct TextRow<'a> {
    pub page: u32,
    pub y: f64,
    pub elements: Vec<&'a PositionedTextElement>,
}

impl TextRow<'_> {
    pub fn text(&self) -> String {
        self.elements
            .iter()
            .map(|e| e.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Text of one page after reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
    pub is_table: bool,
}

/// Average height over fragments that report one.
pub fn average_height(elements: &[PositionedTextElement]) -> Option<f64> {
    let heights: Vec<f64> = elements
        .iter()
        .map(|e| e.height)
        .filter(|h| *h > 0.0)
        .collect();
    if heights.is_empty() {
        None
    } else {
        Some(heights.iter().sum::<f64>() / heights.len() as f64)
    }
}

/// Vertical distance within which two fragments share a row.
pub fn row_tolerance(avg_height: f64) -> f64 {
    MIN_GAP.max(avg_height * 0.4)
}

/// Group fragments into rows ordered by `(page, y)`, each row ordered by `x`.
pub fn cluster_rows(elements: &[PositionedTextElement], tolerance: f64) -> Vec<TextRow<'_>> {
    let mut sorted: Vec<&PositionedTextElement> = elements.iter().collect();
    sorted.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then(a.y.total_cmp(&b.y))
            .then(a.x.total_cmp(&b.x))
    });

    let mut rows: Vec<TextRow<'_>> = Vec::new();
    for el in sorted {
        match rows.last_mut() {
            Some(row) if row.page == el.page && (el.y - row.y).abs() <= tolerance => {
                row.elements.push(el);
            }
            _ => rows.push(TextRow {
                page: el.page,
                y: el.y,
                elements: vec![el],
            }),
        }
    }

    for row in &mut rows {
        row.elements.sort_by(|a, b| a.x.total_cmp(&b.x));
    }
    rows
}

/// Decide whether a set of rows forms a table.
///
/// Pure function of the row element counts and the first row's text:
/// * at least three rows, and
/// * either ≥60 % of rows hold an element count within 30 % of the mean
///   (with at least two elements per row on average),
/// * or the first row reads like an item-table header.
pub fn detect_table_structure(rows: &[TextRow<'_>]) -> bool {
    if rows.len() < 3 {
        return false;
    }

    let counts: Vec<f64> = rows.iter().map(|r| r.elements.len() as f64).collect();
    let mean = counts.iter().sum::<f64>() / counts.len() as f64;
    let consistent = counts
        .iter()
        .filter(|c| (*c - mean).abs() <= mean * 0.3)
        .count();

    if mean >= 2.0 && consistent as f64 >= counts.len() as f64 * 0.6 {
        return true;
    }

    TABLE_HEADER.is_match(&rows[0].text())
}

/// Reconstruct reading order for a set of fragments.
pub fn reconstruct(elements: &[PositionedTextElement]) -> ReconstructedText {
    if elements.is_empty() {
        return ReconstructedText::default();
    }

    let Some(avg_height) = average_height(elements) else {
        return ReconstructedText {
            text: naive_join(elements),
            is_table: false,
            grid: None,
        };
    };

    let rows = cluster_rows(elements, row_tolerance(avg_height));

    if detect_table_structure(&rows) {
        let grid = build_grid(&rows);
        let text = render_grid(&grid);
        ReconstructedText {
            text,
            is_table: true,
            grid: Some(grid),
        }
    } else {
        ReconstructedText {
            text: render_flow(&rows, avg_height),
            is_table: false,
            grid: None,
        }
    }
}

/// Reconstruct each page independently; pages without fragments fall back
/// to their plain text.
pub fn reconstruct_pages(doc: &SourceDocument) -> Vec<PageText> {
    doc.pages
        .iter()
        .map(|page| {
            if page.elements.is_empty() {
                PageText {
                    page_number: page.page_number,
                    text: page.text.trim().to_string(),
                    is_table: false,
                }
            } else {
                let r = reconstruct(&page.elements);
                PageText {
                    page_number: page.page_number,
                    text: r.text,
                    is_table: r.is_table,
                }
            }
        })
        .collect()
}

// ── Rendering ────────────────────────────────────────────────────────────

fn naive_join(elements: &[PositionedTextElement]) -> String {
    elements
        .iter()
        .map(|e| e.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn snap(x: f64) -> f64 {
    (x / COLUMN_SNAP).round() * COLUMN_SNAP
}

fn build_grid(rows: &[TextRow<'_>]) -> Vec<Vec<String>> {
    let mut columns: Vec<f64> = rows
        .iter()
        .flat_map(|r| r.elements.iter().map(|e| snap(e.x)))
        .collect();
    columns.sort_by(|a, b| a.total_cmp(b));
    columns.dedup();

    rows.iter()
        .map(|row| {
            let mut cells = vec![String::new(); columns.len()];
            for el in &row.elements {
                let text = el.text.trim();
                if text.is_empty() {
                    continue;
                }
                let col = nearest_column(&columns, el.x);
                let cell = &mut cells[col];
                if !cell.is_empty() {
                    cell.push(' ');
                }
                cell.push_str(text);
            }
            cells
        })
        .collect()
}

fn nearest_column(columns: &[f64], x: f64) -> usize {
    columns
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (*a - x)
                .abs()
                .partial_cmp(&(*b - x).abs())
                .unwrap_or(Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn render_grid(grid: &[Vec<String>]) -> String {
    let mut lines = Vec::with_capacity(grid.len() + 1);
    for (i, cells) in grid.iter().enumerate() {
        lines.push(cells.join("|"));
        if i == 0 {
            lines.push("---".to_string());
        }
    }
    lines.join("\n")
}

fn render_flow(rows: &[TextRow<'_>], avg_height: f64) -> String {
    let mut out = String::new();
    let mut prev: Option<&TextRow<'_>> = None;

    for row in rows {
        if let Some(p) = prev {
            if p.page != row.page || row.y - p.y > avg_height * 2.5 {
                out.push_str("\n\n");
            } else {
                out.push('\n');
            }
        }

        let mut last: Option<&PositionedTextElement> = None;
        for el in &row.elements {
            if let Some(l) = last {
                let gap = el.x - (l.x + l.width);
                if gap > avg_height * 3.0 {
                    out.push('\t');
                } else if gap > MIN_GAP {
                    out.push(' ');
                }
            }
            out.push_str(&el.text);
            last = Some(el);
        }
        prev = Some(row);
    }

    out.trim().to_string()
}
