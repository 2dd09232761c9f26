//! Output types: per-chunk [`AnalysisResult`] and the merged [`ExtractedDocument`].
//!
//! Every field is always serialised (`null` for missing values, `[]` for no
//! items) so downstream consumers can rely on a stable JSON shape regardless
//! of which strategy produced the record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of business document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Invoice,
    Quote,
    Delivery,
    Transfer,
    Receipt,
    #[default]
    Other,
}

impl DocumentType {
    /// Lenient mapping from model output or document keywords.
    pub fn from_label(label: &str) -> Self {
        let l = label.trim().to_lowercase();
        match l.as_str() {
            "invoice" | "račun" | "racun" | "r-1" | "r1" | "bill" => DocumentType::Invoice,
            "quote" | "quotation" | "offer" | "ponuda" | "proforma" | "predračun"
            | "predracun" => DocumentType::Quote,
            "delivery" | "delivery_note" | "delivery note" | "otpremnica" => {
                DocumentType::Delivery
            }
            "transfer" | "međuskladišnica" | "meduskladisnica" => DocumentType::Transfer,
            "receipt" | "primka" => DocumentType::Receipt,
            _ => DocumentType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Quote => "quote",
            DocumentType::Delivery => "delivery",
            DocumentType::Transfer => "transfer",
            DocumentType::Receipt => "receipt",
            DocumentType::Other => "other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supplier or buyer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub name: Option<String>,
    pub address: Option<String>,
    /// Croatian personal identification number (11 digits).
    pub oib: Option<String>,
    pub iban: Option<String>,
}

impl Party {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.address.is_none() && self.oib.is_none() && self.iban.is_none()
    }
}

/// One line of the items table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub position: u32,
    pub code: Option<String>,
    pub description: String,
    pub quantity: Option<f64>,
    pub unit: String,
    pub unit_price: Option<f64>,
    pub discount_percent: Option<f64>,
    pub total_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub subtotal: Option<f64>,
    pub vat_amount: Option<f64>,
    pub total_amount: Option<f64>,
}

/// Structured record produced by one strategy for one chunk (or the whole file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub document_type: DocumentType,
    pub document_number: Option<String>,
    /// ISO `YYYY-MM-DD`.
    pub date: Option<String>,
    pub due_date: Option<String>,
    pub currency: String,
    pub supplier: Party,
    pub buyer: Party,
    pub items: Vec<LineItem>,
    pub totals: Totals,
    pub confidence: f64,
    /// How the record was obtained, e.g. `"vision"`, `"partial"`, `"regex"`.
    pub analysis_method: String,
    /// Which strategy produced it; `"fallback:<reason>"` after a failed attempt.
    pub source: String,
    pub chunk_index: Option<usize>,
    #[serde(default)]
    pub oom_detected: bool,
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self {
            document_type: DocumentType::Other,
            document_number: None,
            date: None,
            due_date: None,
            currency: "EUR".to_string(),
            supplier: Party::default(),
            buyer: Party::default(),
            items: Vec::new(),
            totals: Totals::default(),
            confidence: 0.0,
            analysis_method: String::new(),
            source: String::new(),
            chunk_index: None,
            oom_detected: false,
        }
    }
}

/// Per-chunk provenance kept on the merged document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSummary {
    pub chunk_index: usize,
    pub analysis_method: String,
    pub source: String,
    pub confidence: f64,
    pub item_count: usize,
    pub oom_detected: bool,
}

impl From<&AnalysisResult> for ChunkSummary {
    fn from(r: &AnalysisResult) -> Self {
        Self {
            chunk_index: r.chunk_index.unwrap_or(0),
            analysis_method: r.analysis_method.clone(),
            source: r.source.clone(),
            confidence: r.confidence,
            item_count: r.items.len(),
            oom_detected: r.oom_detected,
        }
    }
}

/// Final document-level record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocument {
    pub document_type: DocumentType,
    pub document_number: Option<String>,
    pub date: Option<String>,
    pub due_date: Option<String>,
    pub currency: String,
    pub supplier: Party,
    pub buyer: Party,
    pub items: Vec<LineItem>,
    pub totals: Totals,
    /// Mean of the chunk confidences.
    pub confidence: f64,
    pub analysis_method: String,
    pub source: String,
    /// Set when any chunk fell back because the backend ran out of memory;
    /// the record may be incomplete.
    pub oom_detected: bool,
    pub chunk_count: usize,
    pub chunks: Vec<ChunkSummary>,
}

impl ExtractedDocument {
    /// Serialise as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> String {
        // Every field is a plain value type; serialisation cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_type_labels() {
        assert_eq!(DocumentType::from_label("Invoice"), DocumentType::Invoice);
        assert_eq!(DocumentType::from_label("RAČUN"), DocumentType::Invoice);
        assert_eq!(DocumentType::from_label("predračun"), DocumentType::Quote);
        assert_eq!(DocumentType::from_label("otpremnica"), DocumentType::Delivery);
        assert_eq!(DocumentType::from_label("primka"), DocumentType::Receipt);
        assert_eq!(DocumentType::from_label("memo"), DocumentType::Other);
    }

    #[test]
    fn empty_result_keeps_every_key() {
        let v = serde_json::to_value(AnalysisResult::default()).unwrap();
        assert_eq!(v["documentType"], "other");
        assert!(v["items"].as_array().unwrap().is_empty());
        assert!(v["totals"]["totalAmount"].is_null());
        assert!(v["totals"]["vatAmount"].is_null());
        assert!(v["supplier"]["oib"].is_null());
        assert!(v.get("documentNumber").is_some());
        assert_eq!(v["oomDetected"], false);
    }

    #[test]
    fn line_item_uses_camel_case() {
        let item = LineItem {
            position: 1,
            description: "Vijak M8".into(),
            unit: "kom".into(),
            unit_price: Some(0.5),
            ..Default::default()
        };
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["unitPrice"], 0.5);
        assert!(v["discountPercent"].is_null());
    }
}
