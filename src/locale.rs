//! Locale normalisation: regional number and date text → canonical values.
//!
//! Croatian and most continental documents write `1.234,56` where English
//! ones write `1,234.56`. Instead of guessing the locale up front, the
//! separator that appears *last* is taken as the decimal separator. Both
//! functions are pure and idempotent on their own canonical output.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static NUMBER_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d[\d.,]*").unwrap());

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})").unwrap());

static REGIONAL_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[./-](\d{1,2})[./-](\d{2,4})\.?").unwrap());

/// Parse a locale-formatted number.
///
/// ```
/// use edgequake_docextract::locale::parse_number;
///
/// assert_eq!(parse_number("1.234,56"), Some(1234.56));
/// assert_eq!(parse_number("1,234.56"), Some(1234.56));
/// assert_eq!(parse_number("1 234,56 EUR"), Some(1234.56));
/// assert_eq!(parse_number("n/a"), None);
/// ```
pub fn parse_number(text: &str) -> Option<f64> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let run = NUMBER_RUN.find(&compact)?.as_str();
    let run = run.trim_end_matches(['.', ',']);

    let last_dot = run.rfind('.');
    let last_comma = run.rfind(',');

    let canonical = match (last_dot, last_comma) {
        (Some(d), Some(c)) if d > c => run.replace(',', ""),
        (Some(_), Some(_)) => run.replace('.', "").replace(',', "."),
        (Some(_), None) if run.matches('.').count() > 1 => run.replace('.', ""),
        (None, Some(_)) if run.matches(',').count() > 1 => run.replace(',', ""),
        (None, Some(_)) => run.replace(',', "."),
        _ => run.to_string(),
    };

    canonical.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a `D.M.Y` / `D/M/Y` / `D-M-Y` date into ISO `YYYY-MM-DD`.
///
/// Already-ISO input is returned unchanged. Two-digit years become `20YY`.
///
/// ```
/// use edgequake_docextract::locale::parse_date;
///
/// assert_eq!(parse_date("15.01.2024.").as_deref(), Some("2024-01-15"));
/// assert_eq!(parse_date("2024-01-15").as_deref(), Some("2024-01-15"));
/// assert_eq!(parse_date("31.13.2024"), None);
/// ```
pub fn parse_date(text: &str) -> Option<String> {
    let text = text.trim();

    if let Some(caps) = ISO_DATE.captures(text) {
        let (y, m, d) = (
            caps[1].parse::<u32>().ok()?,
            caps[2].parse::<u32>().ok()?,
            caps[3].parse::<u32>().ok()?,
        );
        return valid_ymd(y, m, d).then(|| format!("{y:04}-{m:02}-{d:02}"));
    }

    let caps = REGIONAL_DATE.captures(text)?;
    let day = caps[1].parse::<u32>().ok()?;
    let month = caps[2].parse::<u32>().ok()?;
    let mut year = caps[3].parse::<u32>().ok()?;
    if caps[3].len() == 2 {
        year += 2000;
    }

    valid_ymd(year, month, day).then(|| format!("{year:04}-{month:02}-{day:02}"))
}

fn valid_ymd(year: u32, month: u32, day: u32) -> bool {
    year > 1900 && (1..=12).contains(&month) && (1..=31).contains(&day)
}

/// Numeric JSON field that may arrive as a number or a formatted string.
pub fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Date JSON field normalised to ISO.
pub fn date_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => parse_date(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decimal_separator_is_the_last_one() {
        assert_eq!(parse_number("1.234,56"), Some(1234.56));
        assert_eq!(parse_number("1,234.56"), Some(1234.56));
        assert_eq!(parse_number("12,5"), Some(12.5));
        assert_eq!(parse_number("12.5"), Some(12.5));
    }

    #[test]
    fn repeated_single_separator_is_thousands() {
        assert_eq!(parse_number("1.234.567"), Some(1_234_567.0));
        assert_eq!(parse_number("1,234,567"), Some(1_234_567.0));
    }

    #[test]
    fn whitespace_and_currency_are_ignored() {
        assert_eq!(parse_number(" 1 234,56 kn"), Some(1234.56));
        assert_eq!(parse_number("€ -12,50"), Some(-12.5));
        assert_eq!(parse_number("25%"), Some(25.0));
    }

    #[test]
    fn no_digits_is_none() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("EUR"), None);
        assert_eq!(parse_number(",."), None);
    }

    #[test]
    fn number_parsing_is_idempotent() {
        for input in ["1.234,56", "1,234.56", "0,5", "-3.25", "1000", "1.234.567"] {
            let once = parse_number(input).unwrap();
            let twice = parse_number(&once.to_string()).unwrap();
            assert_eq!(once, twice, "input {input}");
        }
    }

    #[test]
    fn regional_dates() {
        assert_eq!(parse_date("15.01.2024").as_deref(), Some("2024-01-15"));
        assert_eq!(parse_date("5/1/24").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("05-01-2024").as_deref(), Some("2024-01-05"));
        assert_eq!(parse_date("Datum: 1.2.2023.").as_deref(), Some("2023-02-01"));
    }

    #[test]
    fn invalid_dates() {
        assert_eq!(parse_date("32.01.2024"), None);
        assert_eq!(parse_date("15.00.2024"), None);
        assert_eq!(parse_date("15.01.1899"), None);
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn date_parsing_is_idempotent() {
        for input in ["15.01.2024", "2024-01-15", "1.2.23"] {
            let once = parse_date(input).unwrap();
            assert_eq!(parse_date(&once).as_deref(), Some(once.as_str()));
        }
    }

    #[test]
    fn json_helpers() {
        assert_eq!(number_from_value(&json!(12.5)), Some(12.5));
        assert_eq!(number_from_value(&json!("1.000,00")), Some(1000.0));
        assert_eq!(number_from_value(&json!(null)), None);
        assert_eq!(date_from_value(&json!("15.01.2024")).as_deref(), Some("2024-01-15"));
        assert_eq!(date_from_value(&json!(20240115)), None);
    }
}
