//! Turn a recovered JSON record into a canonical [`AnalysisResult`].
//!
//! Models do not follow the requested schema to the letter: keys come back in
//! snake_case, numbers as `"1.234,56"`, dates as `15.01.2024.`, parties as
//! bare strings. Everything is read leniently here and passed through the
//! locale normaliser so the rest of the pipeline only sees canonical values.

use crate::locale::{date_from_value, number_from_value, parse_date};
use crate::output::{AnalysisResult, DocumentType, LineItem, Party, Totals};
use serde_json::Value;

/// Build a result from a JSON object. Confidence, method and source are left
/// for the caller.
pub fn result_from_value(value: &Value) -> AnalysisResult {
    let totals_obj = field(value, &["totals", "summary"]);
    let totals_src = totals_obj.unwrap_or(value);

    let mut result = AnalysisResult {
        document_type: string_field(value, &["documentType", "document_type", "type"])
            .map(|s| DocumentType::from_label(&s))
            .unwrap_or_default(),
        document_number: string_field(value, &["documentNumber", "document_number", "number", "invoiceNumber"]),
        date: field(value, &["date", "issueDate", "documentDate", "issue_date"]).and_then(date_from_value),
        due_date: field(value, &["dueDate", "due_date", "paymentDueDate"]).and_then(date_from_value),
        currency: string_field(value, &["currency"]).unwrap_or_default(),
        supplier: party(field(value, &["supplier", "seller", "vendor", "issuer"])),
        buyer: party(field(value, &["buyer", "customer", "client", "recipient"])),
        items: items(field(value, &["items", "lineItems", "line_items"])),
        totals: Totals {
            subtotal: number_field(totals_src, &["subtotal", "netAmount", "net", "base"]),
            vat_amount: number_field(totals_src, &["vatAmount", "vat_amount", "vat", "tax", "taxAmount"]),
            total_amount: number_field(
                totals_src,
                &["totalAmount", "total_amount", "total", "grandTotal", "amountDue"],
            ),
        },
        ..Default::default()
    };

    normalize_result(&mut result);
    result
}

/// Canonicalise the fields of an existing result in place.
///
/// Idempotent: blank strings become `None`, dates are re-parsed to ISO,
/// currency symbols become ISO codes, item positions fill gaps.
pub fn normalize_result(result: &mut AnalysisResult) {
    result.document_number = clean(result.document_number.take());
    result.date = result.date.take().and_then(|d| parse_date(&d));
    result.due_date = result.due_date.take().and_then(|d| parse_date(&d));
    result.currency = canonical_currency(&result.currency);
    clean_party(&mut result.supplier);
    clean_party(&mut result.buyer);

    for (i, item) in result.items.iter_mut().enumerate() {
        if item.position == 0 {
            item.position = i as u32 + 1;
        }
        item.description = item.description.trim().to_string();
        item.unit = item.unit.trim().to_string();
        item.code = clean(item.code.take());
    }
}

fn canonical_currency(raw: &str) -> String {
    let c = raw.trim();
    match c.to_lowercase().as_str() {
        "" | "€" | "eur" | "euro" | "eura" => "EUR".to_string(),
        "kn" | "hrk" | "kuna" => "HRK".to_string(),
        "$" | "usd" => "USD".to_string(),
        _ => c.to_uppercase(),
    }
}

fn clean(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn clean_party(p: &mut Party) {
    p.name = clean(p.name.take());
    p.address = clean(p.address.take());
    p.oib = clean(p.oib.take())
        .map(|o| o.chars().filter(|c| c.is_ascii_digit()).collect::<String>())
        .filter(|o| !o.is_empty());
    p.iban = clean(p.iban.take()).map(|i| i.split_whitespace().collect::<String>().to_uppercase());
}

// ── JSON access ──────────────────────────────────────────────────────────

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let obj = value.as_object()?;
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    match field(value, keys)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_field(value: &Value, keys: &[&str]) -> Option<f64> {
    field(value, keys).and_then(number_from_value)
}

fn party(value: Option<&Value>) -> Party {
    match value {
        Some(Value::String(name)) => Party {
            name: Some(name.clone()),
            ..Default::default()
        },
        Some(v @ Value::Object(_)) => Party {
            name: string_field(v, &["name", "company"]),
            address: string_field(v, &["address", "street"]),
            oib: string_field(v, &["oib", "taxId", "tax_id", "vatId"]),
            iban: string_field(v, &["iban", "IBAN", "account"]),
        },
        _ => Party::default(),
    }
}

fn items(value: Option<&Value>) -> Vec<LineItem> {
    let Some(Value::Array(arr)) = value else {
        return Vec::new();
    };
    arr.iter()
        .filter(|v| v.is_object())
        .enumerate()
        .map(|(i, v)| LineItem {
            position: number_field(v, &["position", "pos", "rb", "lineNumber"])
                .filter(|p| *p >= 1.0)
                .map(|p| p as u32)
                .unwrap_or(i as u32 + 1),
            code: string_field(v, &["code", "sku", "articleCode", "sifra"]),
            description: string_field(v, &["description", "name", "naziv", "opis"]).unwrap_or_default(),
            quantity: number_field(v, &["quantity", "qty", "kolicina"]),
            unit: string_field(v, &["unit", "jmj", "uom"]).unwrap_or_default(),
            unit_price: number_field(v, &["unitPrice", "unit_price", "price", "cijena"]),
            discount_percent: number_field(v, &["discountPercent", "discount_percent", "discount", "rabat"]),
            total_price: number_field(v, &["totalPrice", "total_price", "total", "amount", "iznos"]),
        })
        .collect()
}
