//! Regex/keyword extraction over the chunk text.
//!
//! No network and no failure mode, which is why it terminates every
//! cascade. Tuned for Croatian business documents (R-1 invoices, ponude,
//! otpremnice, primke) with English labels as a second language.

use super::{Strategy, StrategyContext, StrategyInput, StrategyKind};
use crate::error::StrategyError;
use crate::locale::{parse_date, parse_number};
use crate::output::{AnalysisResult, DocumentType, LineItem, Party, Totals};
use crate::pipeline::normalize::normalize_result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

const CONFIDENCE: f64 = 0.6;

/// Characters of text scanned after a party label.
const SECTION_CHARS: usize = 400;

static DOC_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\bbr(?:oj)?\.?|\bno\.?|\bnumber|#)\s*[:.]?\s*([A-Z0-9][A-Z0-9\-/]*\d[A-Z0-9\-/]*)")
        .unwrap()
});

static ISSUE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:datum(?:\s+(?:računa|racuna|izdavanja|dokumenta|isporuke))?|date(?:\s+of\s+issue)?|issue\s+date)\s*[:.]?\s*(\d{1,2}[./-]\d{1,2}[./-]\d{2,4}\.?)",
    )
    .unwrap()
});

static DUE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:rok\s+plaćanja|rok\s+placanja|datum\s+dospijeća|dospijeće|dospijece|valuta\s+plaćanja|due\s+date|payment\s+due)\s*[:.]?\s*(\d{1,2}[./-]\d{1,2}[./-]\d{2,4}\.?)",
    )
    .unwrap()
});

static ANY_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2}[./-]\d{1,2}[./-]\d{2,4})\.?").unwrap());

static OIB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bOIB\b[^0-9\n]{0,12}(?:HR)?\s*(\d{11})\b").unwrap());

static IBAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bHR(?:\s?\d){19}\b").unwrap());

static SUPPLIER_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:dobavljač|dobavljac|prodavatelj|izdavatelj|supplier|seller|vendor)\b\s*:?").unwrap()
});

static BUYER_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:kupac|naručitelj|narucitelj|primatelj|buyer|customer|bill\s+to)\b\s*:?").unwrap()
});

/// `1. ŠIFRA Opis 2 kom 10,00 [5%] 19,00`
static NUMBERED_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(\d{1,3})[.)]?\s+(?:([A-Z0-9][A-Z0-9\-./]{2,})\s+)?(.+?)\s+(\d+(?:[.,]\d+)?)\s*((?i:kom|kg|m2|m3|m|l|h|kut|pak|set|pcs|sat|usl|kpl))\.?\s+(\d[\d.,]*)\s+(?:(\d+(?:[.,]\d+)?)\s*%\s+)?(\d[\d.,]*)\s*$",
    )
    .unwrap()
});

/// `Opis 2 x 10,00 = 20,00`
static MULTIPLIED_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(.+?)\s+(\d+(?:[.,]\d+)?)\s*(?:x|×|\*)\s*(\d[\d.,]*)\s*=\s*(\d[\d.,]*)\s*$").unwrap()
});

static UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:kom|kg|m2|m3|m|l|h|kut|pak|set|pcs|sat|usl|kpl)\.?$").unwrap()
});

static SUMMARY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:ukupno|total|osnovica|pdv|vat|za\s+platiti|iznos\s+bez)\b").unwrap()
});

static SUBTOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)\b(?:osnovica|iznos\s+bez\s+pdv-?a|ukupno\s+bez\s+pdv-?a|subtotal|net\s+amount)\s*[:\-]?\s*(?:eur|€|hrk|kn)?\s*(-?\d[\d.,]*)(?:\s|$)",
    )
    .unwrap()
});

static VAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)\b(?:pdv|porez|vat|tax)\b(?:\s*\(?\d{1,2}(?:[.,]\d+)?\s*%\)?)?\s*(?:iznos)?\s*[:\-]?\s*(?:eur|€|hrk|kn)?\s*(-?\d[\d.,]*)(?:\s|$)",
    )
    .unwrap()
});

static TOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)\b(?:ukupno\s+za\s+platiti|za\s+platiti|sveukupno|ukupan\s+iznos|total\s+amount|grand\s+total|amount\s+due|ukupno|total)\s*(?:eur|€|hrk|kn)?\s*[:\-]?\s*(?:eur|€|hrk|kn)?\s*(-?\d[\d.,]*)(?:\s|$)",
    )
    .unwrap()
});

pub struct DeterministicStrategy;

#[async_trait]
impl Strategy for DeterministicStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Deterministic
    }

    async fn analyze(
        &self,
        input: &StrategyInput<'_>,
        _ctx: &StrategyContext<'_>,
    ) -> Result<AnalysisResult, StrategyError> {
        Ok(extract_with_regex(&input.chunk.spatial_text))
    }
}

/// Extract what the patterns can find. Always returns a record.
pub fn extract_with_regex(text: &str) -> AnalysisResult {
    let (supplier, buyer) = parties(text);
    let mut result = AnalysisResult {
        document_type: document_type(text),
        document_number: capture(&DOC_NUMBER, text),
        date: capture(&ISSUE_DATE, text)
            .or_else(|| capture(&ANY_DATE, text))
            .and_then(|d| parse_date(&d)),
        due_date: capture(&DUE_DATE, text).and_then(|d| parse_date(&d)),
        currency: currency(text).to_string(),
        supplier,
        buyer,
        items: items(text),
        totals: totals(text),
        confidence: CONFIDENCE,
        analysis_method: "regex".to_string(),
        source: StrategyKind::Deterministic.as_str().to_string(),
        ..Default::default()
    };
    normalize_result(&mut result);
    result
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn document_type(text: &str) -> DocumentType {
    let lower = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if has(&["međuskladišnica", "meduskladisnica", "warehouse transfer"]) {
        DocumentType::Transfer
    } else if has(&["otpremnica", "delivery note"]) {
        DocumentType::Delivery
    } else if has(&["primka", "goods receipt"]) {
        DocumentType::Receipt
    } else if has(&["ponuda", "predračun", "predracun", "quotation", "quote"]) {
        DocumentType::Quote
    } else if has(&["račun", "racun", "r-1", "r1 ", "invoice"]) {
        DocumentType::Invoice
    } else {
        DocumentType::Other
    }
}

fn currency(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if lower.contains('€') || lower.contains("eur") {
        "EUR"
    } else if lower.contains("hrk") || lower.split_whitespace().any(|w| w.trim_matches('.') == "kn") {
        "HRK"
    } else if lower.contains("usd") || lower.contains('$') {
        "USD"
    } else {
        "EUR"
    }
}

/// Supplier and buyer from labelled sections.
///
/// Without a supplier label the text before the buyer label (the letterhead)
/// is taken as the supplier section.
fn parties(text: &str) -> (Party, Party) {
    let supplier_at = SUPPLIER_LABEL.find(text);
    let buyer_at = BUYER_LABEL.find(text);

    let supplier_section = match (supplier_at, buyer_at) {
        (Some(s), Some(b)) if b.start() > s.end() => &text[s.end()..b.start()],
        (Some(s), _) => section(text, s.end()),
        (None, Some(b)) => &text[..b.start()],
        (None, None) => section(text, 0),
    };
    let buyer_section = match (buyer_at, supplier_at) {
        (Some(b), Some(s)) if s.start() > b.end() => &text[b.end()..s.start()],
        (Some(b), _) => section(text, b.end()),
        (None, _) => "",
    };

    let mut supplier = party(supplier_section, supplier_at.is_some());
    let buyer = party(buyer_section, true);

    // Letterhead IBANs often sit in the footer, far from any label.
    if supplier.iban.is_none() {
        supplier.iban = IBAN
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .find(|i| Some(i) != buyer.iban.as_ref());
    }
    (supplier, buyer)
}

/// At most [`SECTION_CHARS`] characters from `start`, on a char boundary.
fn section(text: &str, start: usize) -> &str {
    let mut end = (start + SECTION_CHARS).min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[start..end]
}

fn party(section: &str, labelled: bool) -> Party {
    if section.trim().is_empty() {
        return Party::default();
    }
    let mut lines = section
        .lines()
        .map(|l| l.trim().trim_matches('|').trim())
        .filter(|l| !l.is_empty());

    let name = if labelled {
        lines.next().map(str::to_string)
    } else {
        None
    };
    let address = lines
        .find(|l| {
            l.chars().any(|c| c.is_ascii_digit())
                && !OIB.is_match(l)
                && !IBAN.is_match(l)
                && l.chars().any(char::is_alphabetic)
        })
        .map(str::to_string);

    Party {
        name: name.filter(|n| !OIB.is_match(n) && !IBAN.is_match(n)),
        address,
        oib: capture(&OIB, section),
        iban: IBAN.find(section).map(|m| m.as_str().to_string()),
    }
}

fn items(text: &str) -> Vec<LineItem> {
    let mut items = Vec::new();
    for line in text.lines() {
        if let Some(item) = numbered_item(line)
            .or_else(|| multiplied_item(line))
            .or_else(|| cell_item(line))
        {
            items.push(item);
        }
    }
    for (i, item) in items.iter_mut().enumerate() {
        if item.position == 0 {
            item.position = i as u32 + 1;
        }
    }
    items
}

fn numbered_item(line: &str) -> Option<LineItem> {
    let c = NUMBERED_ITEM.captures(line)?;
    Some(LineItem {
        position: c[1].parse().unwrap_or(0),
        code: c.get(2).map(|m| m.as_str().to_string()),
        description: c[3].trim().to_string(),
        quantity: parse_number(&c[4]),
        unit: c[5].to_lowercase(),
        unit_price: parse_number(&c[6]),
        discount_percent: c.get(7).and_then(|m| parse_number(m.as_str())),
        total_price: parse_number(&c[8]),
    })
}

fn multiplied_item(line: &str) -> Option<LineItem> {
    let c = MULTIPLIED_ITEM.captures(line)?;
    if SUMMARY_LINE.is_match(&c[1]) {
        return None;
    }
    Some(LineItem {
        description: c[1].trim().to_string(),
        quantity: parse_number(&c[2]),
        unit: "kom".to_string(),
        unit_price: parse_number(&c[3]),
        total_price: parse_number(&c[4]),
        ..Default::default()
    })
}

/// A row of the reconstructed table (`|` or tab separated cells).
fn cell_item(line: &str) -> Option<LineItem> {
    if SUMMARY_LINE.is_match(line) {
        return None;
    }
    let cells: Vec<&str> = line
        .split(['|', '\t'])
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if cells.len() < 3 {
        return None;
    }

    // The wordiest cell is the description; codes like `BOS-18` come before it.
    let mut description_at = None;
    let mut best = 2;
    for (i, cell) in cells.iter().enumerate() {
        let letters = cell.chars().filter(|ch| ch.is_alphabetic()).count();
        if letters > best && !UNIT.is_match(cell) {
            best = letters;
            description_at = Some(i);
        }
    }
    let description_at = description_at?;
    let numbers: Vec<f64> = cells[description_at + 1..]
        .iter()
        .filter(|c| !UNIT.is_match(c))
        .filter_map(|c| parse_number(c.trim_end_matches('%')))
        .collect();
    if numbers.len() < 2 {
        return None;
    }

    let position = cells[..description_at]
        .first()
        .and_then(|c| c.trim_end_matches('.').parse::<u32>().ok())
        .unwrap_or(0);
    let code = cells[..description_at]
        .iter()
        .find(|c| c.trim_end_matches('.').parse::<u32>().is_err())
        .map(|c| c.to_string());
    let unit = cells
        .iter()
        .find(|c| UNIT.is_match(c))
        .map(|c| c.trim_end_matches('.').to_lowercase())
        .unwrap_or_else(|| "kom".to_string());

    let total_price = numbers.last().copied();
    let unit_price = numbers.get(numbers.len() - 2).copied();
    let quantity = if numbers.len() >= 3 { numbers.first().copied() } else { None };

    Some(LineItem {
        position,
        code,
        description: cells[description_at].to_string(),
        quantity,
        unit,
        unit_price,
        discount_percent: None,
        total_price,
    })
}

fn totals(text: &str) -> Totals {
    let last = |re: &Regex| {
        re.captures_iter(text)
            .filter_map(|c| parse_number(&c[1]))
            .last()
    };
    let mut t = Totals {
        subtotal: last(&SUBTOTAL),
        vat_amount: last(&VAT),
        total_amount: last(&TOTAL),
    };

    let round = |v: f64| (v * 100.0).round() / 100.0;
    match (t.subtotal, t.vat_amount, t.total_amount) {
        (Some(s), Some(v), None) => t.total_amount = Some(round(s + v)),
        (None, Some(v), Some(total)) => t.subtotal = Some(round(total - v)),
        (Some(s), None, Some(total)) if total >= s => t.vat_amount = Some(round(total - s)),
        _ => {}
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVOICE: &str = "\
Alati Horvat d.o.o.
Ilica 10, 10000 Zagreb
OIB: 12345678901
IBAN: HR12 1001 0051 8630 0016 0

RAČUN br. R-17/2024
Datum računa: 15.01.2024.
Rok plaćanja: 15.02.2024.

Kupac:
Gradnja j.d.o.o.
Vukovarska 5, 21000 Split
OIB: 98765432109

Rb|Šifra|Naziv|Kol|JMJ|Cijena|Iznos
---
1|BOS-18|Bušilica Bosch GSB 18V|2|kom|1.234,56|2.469,12
2|SV-8|Svrdlo 8mm|10|kom|1,50|15,00

Osnovica: 2.484,12
PDV 25%: 621,03
Ukupno za platiti: 3.105,15 EUR
";

    #[test]
    fn full_invoice() {
        let r = extract_with_regex(INVOICE);
        assert_eq!(r.document_type, DocumentType::Invoice);
        assert_eq!(r.document_number.as_deref(), Some("R-17/2024"));
        assert_eq!(r.date.as_deref(), Some("2024-01-15"));
        assert_eq!(r.due_date.as_deref(), Some("2024-02-15"));
        assert_eq!(r.currency, "EUR");
        assert_eq!(r.supplier.oib.as_deref(), Some("12345678901"));
        assert_eq!(r.supplier.iban.as_deref(), Some("HR1210010051863000160"));
        assert_eq!(r.buyer.name.as_deref(), Some("Gradnja j.d.o.o."));
        assert_eq!(r.buyer.oib.as_deref(), Some("98765432109"));
        assert_eq!(r.buyer.address.as_deref(), Some("Vukovarska 5, 21000 Split"));
        assert_eq!(r.confidence, CONFIDENCE);
        assert_eq!(r.analysis_method, "regex");
    }

    #[test]
    fn table_rows_become_items() {
        let r = extract_with_regex(INVOICE);
        assert_eq!(r.items.len(), 2);
        let first = &r.items[0];
        assert_eq!(first.position, 1);
        assert_eq!(first.code.as_deref(), Some("BOS-18"));
        assert_eq!(first.description, "Bušilica Bosch GSB 18V");
        assert_eq!(first.quantity, Some(2.0));
        assert_eq!(first.unit, "kom");
        assert_eq!(first.unit_price, Some(1234.56));
        assert_eq!(first.total_price, Some(2469.12));
    }

    #[test]
    fn totals_are_read() {
        let t = extract_with_regex(INVOICE).totals;
        assert_eq!(t.subtotal, Some(2484.12));
        assert_eq!(t.vat_amount, Some(621.03));
        assert_eq!(t.total_amount, Some(3105.15));
    }

    #[test]
    fn missing_total_is_derived() {
        let t = totals("Osnovica: 100,00\nPDV 25%: 25,00\n");
        assert_eq!(t.total_amount, Some(125.0));
        let t = totals("PDV: 25,00\nUkupno: 125,00\n");
        assert_eq!(t.subtotal, Some(100.0));
        let t = totals("Osnovica: 100,00\nUkupno: 125,00\n");
        assert_eq!(t.vat_amount, Some(25.0));
    }

    #[test]
    fn numbered_and_multiplied_lines() {
        let r = extract_with_regex(
            "Ponuda br. P-3\n1. Montaža ormara 3 h 25,00 75,00\nDostava 2 x 10,00 = 20,00\n",
        );
        assert_eq!(r.document_type, DocumentType::Quote);
        assert_eq!(r.items.len(), 2);
        assert_eq!(r.items[0].description, "Montaža ormara");
        assert_eq!(r.items[0].unit, "h");
        assert_eq!(r.items[0].total_price, Some(75.0));
        assert_eq!(r.items[1].description, "Dostava");
        assert_eq!(r.items[1].quantity, Some(2.0));
        assert_eq!(r.items[1].position, 2);
    }

    #[test]
    fn document_types() {
        assert_eq!(document_type("OTPREMNICA 12"), DocumentType::Delivery);
        assert_eq!(document_type("Primka robe"), DocumentType::Receipt);
        assert_eq!(document_type("Međuskladišnica"), DocumentType::Transfer);
        assert_eq!(document_type("PREDRAČUN"), DocumentType::Quote);
        assert_eq!(document_type("lorem ipsum"), DocumentType::Other);
    }

    #[test]
    fn currency_detection() {
        assert_eq!(currency("Ukupno: 100,00 kn"), "HRK");
        assert_eq!(currency("Total $40"), "USD");
        assert_eq!(currency("nothing"), "EUR");
    }

    #[test]
    fn empty_text_still_yields_a_record() {
        let r = extract_with_regex("");
        assert_eq!(r.document_type, DocumentType::Other);
        assert!(r.items.is_empty());
        assert_eq!(r.totals, Totals::default());
        assert_eq!(r.confidence, CONFIDENCE);
    }
}
