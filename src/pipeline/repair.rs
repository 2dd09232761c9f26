//! Recover a structured JSON record from free-form model output.
//!
//! Models wrap JSON in prose, fence it in Markdown, leave trailing commas,
//! forget to quote keys, or get cut off at the token limit. Recovery runs an
//! ordered list of strategies and the first one that yields a JSON *object*
//! wins:
//!
//! 1. fenced block (or the whole reply) parsed as-is
//! 2. first brace-balanced `{…}` span
//! 3. slice from the first `{` to the last `}`
//! 4. textual repair: fences, trailing commas, bare keys, single quotes
//! 5. partial extraction of labelled fields into a skeleton record
//!
//! The order matters on ambiguous input; do not collapse it into one regex.
//! Nothing here panics on malformed input.

use crate::locale::parse_number;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};

// ── Rule 1: fences ───────────────────────────────────────────────────────

static FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

static FENCE_MARK: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z]*").unwrap());

// ── Rule 4: textual repair ───────────────────────────────────────────────

static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());

static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*):").unwrap());

static SINGLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,:\[]\s*)'([^'\n]*)'").unwrap());

// ── Rule 5: partial extraction ───────────────────────────────────────────

static DOC_NUMBER_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""documentNumber"\s*:\s*"([^"]+)""#).unwrap());

static DOC_NUMBER_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:broj\s+(?:računa|racuna|ponude|dokumenta)|račun\s+br|racun\s+br|ponuda\s+br|invoice\s*(?:no|number|#)|document\s*(?:no|number))\.?\s*[:#]?\s*([A-Z0-9][A-Z0-9\-/]*)",
    )
    .unwrap()
});

static SUPPLIER_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""supplier"\s*:\s*\{\s*"name"\s*:\s*"([^"]+)""#).unwrap());

static SUPPLIER_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\W*(?:supplier|vendor|seller|dobavljač|dobavljac|prodavatelj|izdavatelj)(?:\s+name)?\s*[:\-]\s*(\S.*)$")
        .unwrap()
});

static TOTAL_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""totalAmount"\s*:\s*"?(-?\d[\d.,]*)"#).unwrap());

static TOTAL_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(total\s+amount|grand\s+total|ukupno\s+za\s+platiti|sveukupno|za\s+platiti|total|ukupno)\s*[:\-]?\s*(?:EUR|€|HRK|kn)?\s*(-?\d[\d.,\s]*\d|\d)",
    )
    .unwrap()
});

/// Amount behind a total label on one line, ranked by how final the label
/// is. Subtotals are not totals.
fn labelled_total(line: &str) -> Option<(u8, f64)> {
    let c = TOTAL_LABEL.captures(line)?;
    let label = c.get(1)?;
    let before = line[..label.start()]
        .trim_end_matches([' ', '-'])
        .to_lowercase();
    if before.ends_with("sub") || before.ends_with("među") || before.ends_with("medu") {
        return None;
    }
    let amount = parse_number(&c[2])?;
    let label = label.as_str().to_lowercase();
    let rank = if label == "total" || label == "ukupno" { 1 } else { 2 };
    Some((rank, amount))
}

/// Which recovery rule produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMethod {
    /// Rule 1: the reply (or its fenced block) was valid JSON.
    Direct,
    /// Rule 2.
    Balanced,
    /// Rule 3.
    Sliced,
    /// Rule 4.
    Repaired,
    /// Rule 5: skeleton assembled from labelled lines.
    Partial,
}

impl RecoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryMethod::Direct => "direct",
            RecoveryMethod::Balanced => "balanced",
            RecoveryMethod::Sliced => "sliced",
            RecoveryMethod::Repaired => "repaired",
            RecoveryMethod::Partial => "partial",
        }
    }

    /// Salvaged JSON was not what the model was asked for.
    pub fn is_salvage(&self) -> bool {
        !matches!(self, RecoveryMethod::Direct)
    }
}

/// A recovered record and how it was recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub value: Value,
    pub method: RecoveryMethod,
    /// Fields found by partial extraction (0 otherwise).
    pub partial_fields: usize,
}

impl ParsedResponse {
    /// Confidence given the producing strategy's base confidence.
    ///
    /// Salvaged JSON loses 0.05; partial skeletons score 0.4 + 0.1 per field,
    /// never above 0.75.
    pub fn confidence(&self, base: f64) -> f64 {
        match self.method {
            RecoveryMethod::Direct => base,
            RecoveryMethod::Partial => (0.4 + 0.1 * self.partial_fields as f64).min(0.75),
            _ => (base - 0.05).max(0.0),
        }
    }
}

/// Recover a JSON object from model text, or `None`.
///
/// ```
/// use edgequake_docextract::pipeline::repair::extract_structured;
/// use serde_json::json;
///
/// assert_eq!(extract_structured("```json\n{\"a\":1}\n```"), Some(json!({"a": 1})));
/// assert_eq!(extract_structured("noise {\"a\":1} noise"), Some(json!({"a": 1})));
/// assert_eq!(extract_structured("{a:1,}"), Some(json!({"a": 1})));
/// ```
pub fn extract_structured(raw: &str) -> Option<Value> {
    parse_response(raw).map(|p| p.value)
}

/// Run the recovery rules in order.
pub fn parse_response(raw: &str) -> Option<ParsedResponse> {
    let found = |value: Value, method| {
        Some(ParsedResponse {
            value,
            method,
            partial_fields: 0,
        })
    };

    // Rule 1
    let unfenced = FENCED
        .captures(raw)
        .and_then(|c| c.get(1))
        .map_or(raw, |m| m.as_str());
    if let Some(v) = parse_object(unfenced) {
        return found(v, RecoveryMethod::Direct);
    }

    // Rule 2
    if let Some(v) = balanced_span(raw).and_then(parse_object) {
        return found(v, RecoveryMethod::Balanced);
    }

    // Rule 3
    if let Some(slice) = outer_slice(raw) {
        if let Some(v) = parse_object(slice) {
            return found(v, RecoveryMethod::Sliced);
        }
    }

    // Rule 4
    if let Some(v) = parse_object(&repair_text(raw)) {
        return found(v, RecoveryMethod::Repaired);
    }

    // Rule 5
    partial_extract(raw)
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

/// First brace-balanced `{…}` span. Braces inside strings are counted too,
/// which is what rule 3 exists to recover from.
fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (i, b) in text.bytes().enumerate().skip(start) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn outer_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Textual repair pass (rule 4).
pub fn repair_text(raw: &str) -> String {
    let stripped = FENCE_MARK.replace_all(raw, "");
    let candidate = outer_slice(&stripped).unwrap_or(&stripped).to_string();

    let no_trailing = TRAILING_COMMA.replace_all(&candidate, "$1");
    let quoted_keys = BARE_KEY.replace_all(&no_trailing, "$1\"$2\"$3:");
    SINGLE_QUOTED
        .replace_all(&quoted_keys, |c: &Captures| {
            format!("{}\"{}\"", &c[1], c[2].replace('"', "\\\""))
        })
        .into_owned()
}

/// Rule 5: assemble a skeleton from labelled lines.
fn partial_extract(raw: &str) -> Option<ParsedResponse> {
    let mut number: Option<String> = None;
    let mut supplier: Option<String> = None;
    let mut total: Option<f64> = None;

    if let Some(c) = DOC_NUMBER_KEY.captures(raw) {
        number = Some(c[1].trim().to_string());
    }
    if let Some(c) = SUPPLIER_KEY.captures(raw) {
        supplier = Some(c[1].trim().to_string());
    }
    if let Some(c) = TOTAL_KEY.captures(raw) {
        total = parse_number(&c[1]);
    }

    // Totals sit at the bottom: an explicit "amount due" label beats a bare
    // "total", and among equals the later line wins.
    let mut label_total: Option<(u8, f64)> = None;
    for line in raw.lines() {
        let line = line.trim();
        if number.is_none() {
            if let Some(c) = DOC_NUMBER_LABEL.captures(line) {
                number = Some(c[1].to_string());
            }
        }
        if supplier.is_none() {
            if let Some(c) = SUPPLIER_LABEL.captures(line) {
                let name = c[1].trim().trim_end_matches([',', ';']).trim();
                if !name.is_empty() {
                    supplier = Some(name.to_string());
                }
            }
        }
        if let Some((rank, amount)) = labelled_total(line) {
            if label_total.map_or(true, |(best, _)| rank >= best) {
                label_total = Some((rank, amount));
            }
        }
    }
    if total.is_none() {
        total = label_total.map(|(_, amount)| amount);
    }

    let fields = [number.is_some(), supplier.is_some(), total.is_some()]
        .iter()
        .filter(|f| **f)
        .count();
    if fields == 0 {
        return None;
    }

    let mut record = Map::new();
    record.insert("documentNumber".into(), json!(number));
    record.insert("supplier".into(), json!({ "name": supplier }));
    record.insert("items".into(), json!([]));
    record.insert("totals".into(), json!({ "totalAmount": total }));

    Some(ParsedResponse {
        value: Value::Object(record),
        method: RecoveryMethod::Partial,
        partial_fields: fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block() {
        let p = parse_response("```json\n{\"a\":1}\n```").unwrap();
        assert_eq!(p.value, json!({"a": 1}));
        assert_eq!(p.method, RecoveryMethod::Direct);
    }

    #[test]
    fn bare_json_is_direct() {
        let p = parse_response("  {\"a\": [1, 2]}\n").unwrap();
        assert_eq!(p.method, RecoveryMethod::Direct);
    }

    #[test]
    fn json_in_prose() {
        let p = parse_response("noise {\"a\":1} noise").unwrap();
        assert_eq!(p.value, json!({"a": 1}));
        assert_eq!(p.method, RecoveryMethod::Balanced);
    }

    #[test]
    fn nested_object_in_prose() {
        let p = parse_response("Result: {\"a\": {\"b\": 1}} hope this helps").unwrap();
        assert_eq!(p.value, json!({"a": {"b": 1}}));
        assert_eq!(p.method, RecoveryMethod::Balanced);
    }

    #[test]
    fn braces_inside_strings_fall_through_to_outer_slice() {
        let raw = r#"Here: {"note": "use } carefully", "b": {"c": 2}} done"#;
        let p = parse_response(raw).unwrap();
        assert_eq!(p.value["b"]["c"], 2);
        assert_eq!(p.method, RecoveryMethod::Sliced);
    }

    #[test]
    fn bare_keys_and_trailing_commas() {
        let p = parse_response("{a:1,}").unwrap();
        assert_eq!(p.value, json!({"a": 1}));
        assert_eq!(p.method, RecoveryMethod::Repaired);
    }

    #[test]
    fn single_quotes() {
        let p = parse_response("```\n{'documentNumber': 'R-1/2024', items: [],}\n```").unwrap();
        assert_eq!(p.value["documentNumber"], "R-1/2024");
        assert_eq!(p.method, RecoveryMethod::Repaired);
    }

    #[test]
    fn arrays_are_not_records() {
        assert!(parse_response("[1, 2, 3]").is_none());
        assert!(extract_structured("null").is_none());
    }

    #[test]
    fn truncated_json_yields_partial_skeleton() {
        let raw = r#"{"documentNumber": "55-1-1", "supplier": {"name": "Kvaliteta d.o.o.", "oib": "123"#;
        let p = parse_response(raw).unwrap();
        assert_eq!(p.method, RecoveryMethod::Partial);
        assert_eq!(p.value["documentNumber"], "55-1-1");
        assert_eq!(p.value["supplier"]["name"], "Kvaliteta d.o.o.");
        assert_eq!(p.partial_fields, 2);
        assert!((p.confidence(0.95) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn labelled_lines_yield_partial_skeleton() {
        let raw = "I could not produce JSON.\nRačun br. 2024-117\nDobavljač: Alati Horvat d.o.o.\nUkupno za platiti: 1.250,00 EUR";
        let p = parse_response(raw).unwrap();
        assert_eq!(p.method, RecoveryMethod::Partial);
        assert_eq!(p.value["documentNumber"], "2024-117");
        assert_eq!(p.value["supplier"]["name"], "Alati Horvat d.o.o.");
        assert_eq!(p.value["totals"]["totalAmount"], 1250.0);
        assert!(p.confidence(0.97) <= 0.75);
        assert!(p.value["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn subtotal_above_total_is_skipped() {
        let p = parse_response("Broj računa: R-1\nSubtotal: 100,00\nTotal: 125,00").unwrap();
        assert_eq!(p.method, RecoveryMethod::Partial);
        assert_eq!(p.value["totals"]["totalAmount"], 125.0);

        let p = parse_response("Račun br. R-2\nSub-total: 80,00\nMeđuukupno: 80,00\nUkupno: 100,00").unwrap();
        assert_eq!(p.value["totals"]["totalAmount"], 100.0);
    }

    #[test]
    fn amount_due_label_beats_bare_total() {
        let raw = "Račun br. R-3\nZa platiti: 1.250,00 EUR\nTotal: 3";
        let p = parse_response(raw).unwrap();
        assert_eq!(p.value["totals"]["totalAmount"], 1250.0);
    }

    #[test]
    fn nothing_usable_is_none() {
        assert!(parse_response("").is_none());
        assert!(parse_response("Sorry, I cannot help with that.").is_none());
        assert!(parse_response("{{{{").is_none());
        assert!(parse_response("}}}}").is_none());
    }

    #[test]
    fn salvage_lowers_confidence() {
        let p = parse_response("noise {\"a\":1}").unwrap();
        assert!((p.confidence(0.95) - 0.90).abs() < 1e-9);
        let p = parse_response("{\"a\":1}").unwrap();
        assert_eq!(p.confidence(0.95), 0.95);
    }

    #[test]
    fn never_panics_on_odd_input() {
        for raw in ["```", "```json", "{\"a\": \"\\", "'''", "{'a': 'it''s'}", "ččč{ž:1}"] {
            let _ = parse_response(raw);
        }
    }
}
