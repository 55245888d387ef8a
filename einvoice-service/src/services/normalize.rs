//! Total coercion helpers. Every input maps to a defined output; nothing here
//! returns an error or panics.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;

use super::validation::RATE_PATTERN;
use crate::models::{ExtraTax, Invoice, InvoiceLineItem};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

const ITEM_AMOUNT_FIELDS: &[&str] = &[
    "quantity",
    "totalValues",
    "valueSalesExcludingST",
    "fixedNotifiedValueOrRetailPrice",
    "salesTaxApplicable",
    "salesTaxWithheldAtSource",
    "furtherTax",
    "fedPayable",
    "discount",
];

/// `YYYY-MM-DD` for anything date-like, `""` when it cannot be read as a
/// real calendar day.
///
/// Offset-carrying timestamps keep the day as written at that offset.
/// Numbers are read as epoch milliseconds.
pub fn to_canonical_date(value: &Value) -> String {
    let date = match value {
        Value::String(raw) => parse_date_text(raw.trim()),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .map(|dt| dt.date_naive()),
        _ => None,
    };
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Percent string with the fewest decimals needed, at most two.
/// Negative, non-finite and non-numeric input yields `"0%"`.
pub fn to_percent_string(value: &Value) -> String {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_strict(s.trim().trim_end_matches('%')),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() && n >= 0.0 => format!("{}%", trim_decimals(n)),
        _ => "0%".to_string(),
    }
}

fn trim_decimals(n: f64) -> String {
    let fixed = format!("{:.2}", n);
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Finite number or 0.
pub fn to_finite_number(value: &Value) -> f64 {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_strict(s.trim()),
        _ => None,
    };
    number.filter(|n| n.is_finite()).unwrap_or(0.0)
}

/// Whole-string decimal parse. Rejects `inf`/`NaN` spellings.
fn parse_strict(s: &str) -> Option<f64> {
    if s.is_empty() || s.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    s.parse::<f64>().ok()
}

pub fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// `value` when the pattern matches all of it, otherwise `""`.
///
/// The pattern is anchored on both ends here, so unanchored alternations
/// such as `a|ab` still get a chance to cover the whole value.
pub fn match_or_empty(value: &str, pattern: &Regex) -> String {
    let full = Regex::new(&format!("^(?:{})$", pattern.as_str()))
        .is_ok_and(|anchored| anchored.is_match(value));
    if full {
        value.to_string()
    } else {
        String::new()
    }
}

/// Pre-validation pass over raw input: identifiers lose separators, the
/// invoice date is read leniently and numeric text in item amounts becomes a
/// number, so `"1234-567"`, `"2024/01/15"` and `"12.5"` are accepted. Values
/// that cannot be coerced are left for the validator to report.
pub fn canonicalize_input(input: &mut Value) {
    let Some(obj) = input.as_object_mut() else {
        return;
    };

    for key in ["sellerNTNCNIC", "buyerNTNCNIC"] {
        if let Some(Value::String(raw)) = obj.get(key) {
            let digits = digits_only(raw);
            obj.insert(key.to_string(), Value::String(digits));
        }
    }

    if let Some(raw) = obj.get("invoiceDate") {
        let canonical = to_canonical_date(raw);
        if !canonical.is_empty() {
            obj.insert("invoiceDate".to_string(), Value::String(canonical));
        }
    }

    if let Some(Value::Array(items)) = obj.get_mut("items") {
        for item in items.iter_mut().filter_map(Value::as_object_mut) {
            for key in ITEM_AMOUNT_FIELDS {
                let Some(Value::String(raw)) = item.get(*key) else {
                    continue;
                };
                let raw = raw.trim();
                // Blank form fields count as zero; junk and out-of-range
                // numbers stay for the validator.
                if !raw.is_empty() && !parse_strict(raw).is_some_and(f64::is_finite) {
                    continue;
                }
                let number = to_finite_number(&Value::String(raw.to_string()));
                if let Some(number) = serde_json::Number::from_f64(number) {
                    item.insert(key.to_string(), Value::Number(number));
                }
            }
        }
    }
}

/// Post-validation pass producing the authority's wire representation.
pub fn normalize_invoice(mut invoice: Invoice) -> Invoice {
    for text in [
        &mut invoice.seller_business_name,
        &mut invoice.buyer_business_name,
        &mut invoice.seller_address,
        &mut invoice.buyer_address,
        &mut invoice.invoice_ref_no,
    ] {
        *text = text.trim().to_string();
    }
    invoice.items = invoice.items.into_iter().map(normalize_item).collect();
    invoice
}

fn normalize_item(mut item: InvoiceLineItem) -> InvoiceLineItem {
    item.rate = to_percent_string(&Value::String(item.rate));
    item.product_description = item.product_description.trim().to_string();
    item.sro_schedule_no = item.sro_schedule_no.trim().to_string();
    item.sale_type = item.sale_type.trim().to_string();
    item.sro_item_serial_no = item.sro_item_serial_no.trim().to_string();
    // Sent exactly as written; only a value that no longer fits the rate
    // shape is dropped.
    item.extra_tax = match item.extra_tax {
        ExtraTax::Percent(raw) => {
            let kept = match_or_empty(&raw, &RATE_PATTERN);
            if kept.is_empty() {
                ExtraTax::Empty
            } else {
                ExtraTax::Percent(kept)
            }
        }
        other => other,
    };
    item
}
