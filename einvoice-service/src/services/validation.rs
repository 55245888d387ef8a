//! Structural validation of raw invoice input.
//!
//! The validator walks an arbitrary JSON value, records every violation under
//! its field path (`items[2].hsCode`) and only builds a typed [`Invoice`] when
//! nothing was recorded. Create and update share the same rules.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::{
    BuyerRegistrationType, ExtraTax, Invoice, InvoiceLineItem, InvoiceType, Province,
    UnitOfMeasure,
};

pub static HS_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}\.[0-9]{4}$").expect("valid hs code regex"));

pub static RATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{1,2}(\.[0-9]{1,2})?%$").expect("valid rate regex"));

pub static DATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("valid date regex"));

pub static NTN_CNIC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{7,15}$").expect("valid ntn regex"));

pub static SCENARIO_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^SN[0-9]{3}$").expect("valid scenario regex"));

/// Field path -> message. Ordered so responses are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the first complaint for a path.
    pub fn add(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.entry(path.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    /// `path: message` lines for the HTTP error envelope.
    pub fn messages(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(path, message)| format!("{}: {}", path, message))
            .collect()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("; "))
    }
}

impl std::error::Error for FieldErrors {}

/// Validates `input` against the invoice schema.
pub fn validate_invoice(input: &Value) -> Result<Invoice, FieldErrors> {
    let mut errors = FieldErrors::new();

    let Some(obj) = input.as_object() else {
        errors.add("invoice", "Invoice must be an object");
        return Err(errors);
    };

    let mut fields = Fields {
        obj,
        prefix: String::new(),
        errors: &mut errors,
    };

    let invoice_type = fields.closed(
        "invoiceType",
        InvoiceType::parse,
        format!("Invoice type must be one of: {}", InvoiceType::accepted()),
    );
    let invoice_date = fields.date("invoiceDate");
    let seller_ntn_cnic = fields.pattern(
        "sellerNTNCNIC",
        &NTN_CNIC_PATTERN,
        "Seller NTN/CNIC must be 7-15 digits only",
    );
    let buyer_ntn_cnic = fields.pattern(
        "buyerNTNCNIC",
        &NTN_CNIC_PATTERN,
        "Buyer NTN/CNIC must be 7-15 digits only",
    );
    let seller_business_name =
        fields.non_empty("sellerBusinessName", "Seller business name cannot be empty");
    let buyer_business_name =
        fields.non_empty("buyerBusinessName", "Buyer business name cannot be empty");
    let seller_address = fields.non_empty("sellerAddress", "Seller address cannot be empty");
    let buyer_address = fields.non_empty("buyerAddress", "Buyer address cannot be empty");
    let seller_province = fields.closed(
        "sellerProvince",
        Province::parse,
        format!("Seller province must be one of: {}", Province::accepted()),
    );
    let buyer_province = fields.closed(
        "buyerProvince",
        Province::parse,
        format!("Buyer province must be one of: {}", Province::accepted()),
    );
    let buyer_registration_type = fields.closed(
        "buyerRegistrationType",
        BuyerRegistrationType::parse,
        format!(
            "Buyer registration type must be one of: {}",
            BuyerRegistrationType::accepted()
        ),
    );
    let invoice_ref_no = fields.optional_text("invoiceRefNo");
    let scenario_id = fields.pattern(
        "scenarioId",
        &SCENARIO_ID_PATTERN,
        "Scenario ID must be in format SN followed by 3 digits",
    );
    let items = validate_items(obj.get("items"), &mut errors);

    let (
        Some(invoice_type),
        Some(invoice_date),
        Some(seller_ntn_cnic),
        Some(buyer_ntn_cnic),
        Some(seller_business_name),
        Some(buyer_business_name),
        Some(seller_address),
        Some(buyer_address),
        Some(seller_province),
        Some(buyer_province),
        Some(buyer_registration_type),
        Some(invoice_ref_no),
        Some(scenario_id),
        Some(items),
    ) = (
        invoice_type,
        invoice_date,
        seller_ntn_cnic,
        buyer_ntn_cnic,
        seller_business_name,
        buyer_business_name,
        seller_address,
        buyer_address,
        seller_province,
        buyer_province,
        buyer_registration_type,
        invoice_ref_no,
        scenario_id,
        items,
    )
    else {
        return Err(errors);
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Invoice {
        invoice_type,
        invoice_date,
        seller_ntn_cnic,
        buyer_ntn_cnic,
        seller_business_name,
        buyer_business_name,
        seller_address,
        buyer_address,
        seller_province,
        buyer_province,
        buyer_registration_type,
        invoice_ref_no,
        scenario_id,
        items,
    })
}

fn validate_items(value: Option<&Value>, errors: &mut FieldErrors) -> Option<Vec<InvoiceLineItem>> {
    let Some(Value::Array(raw_items)) = value else {
        errors.add("items", "At least one item is required");
        return None;
    };
    if raw_items.is_empty() {
        errors.add("items", "At least one item is required");
        return None;
    }

    raw_items
        .iter()
        .enumerate()
        .map(|(index, raw)| validate_item(index, raw, errors))
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

fn validate_item(index: usize, raw: &Value, errors: &mut FieldErrors) -> Option<InvoiceLineItem> {
    let prefix = format!("items[{}]", index);
    let Some(obj) = raw.as_object() else {
        errors.add(prefix, "Item must be an object");
        return None;
    };

    let mut fields = Fields {
        obj,
        prefix: format!("{}.", prefix),
        errors,
    };

    let hs_code = fields.pattern(
        "hsCode",
        &HS_CODE_PATTERN,
        "HS Code must be in format XXXX.XXXX",
    );
    let product_description = fields.optional_text("productDescription");
    let rate = fields.pattern(
        "rate",
        &RATE_PATTERN,
        "Rate must be in format like '0%' or '17%'",
    );
    let uom = fields.unit_of_measure("uoM");
    let quantity = fields.amount("quantity", "Quantity");
    let total_values = fields.amount("totalValues", "Total values");
    let value_sales_excluding_st =
        fields.amount("valueSalesExcludingST", "Value sales excluding ST");
    let fixed_notified_value_or_retail_price = fields.amount(
        "fixedNotifiedValueOrRetailPrice",
        "Fixed notified value or retail price",
    );
    let sales_tax_applicable = fields.amount("salesTaxApplicable", "Sales tax applicable");
    let sales_tax_withheld_at_source =
        fields.amount("salesTaxWithheldAtSource", "Sales tax withheld at source");
    let further_tax = fields.amount("furtherTax", "Further tax");
    let fed_payable = fields.amount("fedPayable", "FED payable");
    let discount = fields.amount("discount", "Discount");
    let extra_tax = fields.extra_tax("extraTax");
    let sro_schedule_no = fields.optional_text("sroScheduleNo");
    let sale_type = fields.optional_text("saleType");
    let sro_item_serial_no = fields.optional_text("sroItemSerialNo");

    Some(InvoiceLineItem {
        hs_code: hs_code?,
        product_description: product_description?,
        rate: rate?,
        uom: uom?,
        quantity: quantity?,
        total_values: total_values?,
        value_sales_excluding_st: value_sales_excluding_st?,
        fixed_notified_value_or_retail_price: fixed_notified_value_or_retail_price?,
        sales_tax_applicable: sales_tax_applicable?,
        sales_tax_withheld_at_source: sales_tax_withheld_at_source?,
        further_tax: further_tax?,
        fed_payable: fed_payable?,
        discount: discount?,
        extra_tax: extra_tax?,
        sro_schedule_no: sro_schedule_no?,
        sale_type: sale_type?,
        sro_item_serial_no: sro_item_serial_no?,
    })
}

/// Field accessors over one JSON object. Each returns `None` after
/// recording an error under `prefix + key`.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    prefix: String,
    errors: &'a mut FieldErrors,
}

impl<'a> Fields<'a> {
    fn fail<T>(&mut self, key: &str, message: impl Into<String>) -> Option<T> {
        self.errors.add(format!("{}{}", self.prefix, key), message);
        None
    }

    fn text(&self, key: &str) -> Option<&'a str> {
        self.obj.get(key).and_then(Value::as_str)
    }

    fn non_empty(&mut self, key: &str, message: &str) -> Option<String> {
        match self.text(key).map(str::trim) {
            Some(value) if !value.is_empty() => Some(value.to_string()),
            _ => self.fail(key, message),
        }
    }

    fn pattern(&mut self, key: &str, pattern: &Regex, message: &str) -> Option<String> {
        match self.text(key) {
            Some(value) if pattern.is_match(value) => Some(value.to_string()),
            _ => self.fail(key, message),
        }
    }

    fn optional_text(&mut self, key: &str) -> Option<String> {
        let obj = self.obj;
        match obj.get(key) {
            None | Some(Value::Null) => Some(String::new()),
            Some(Value::String(value)) => Some(value.clone()),
            Some(_) => self.fail(key, "Must be text"),
        }
    }

    fn closed<T>(&mut self, key: &str, parse: fn(&str) -> Option<T>, message: String) -> Option<T> {
        match self.text(key).and_then(parse) {
            Some(value) => Some(value),
            None => self.fail(key, message),
        }
    }

    fn date(&mut self, key: &str) -> Option<NaiveDate> {
        const MESSAGE: &str = "Invoice date must be in format yyyy-MM-dd";
        let parsed = self
            .text(key)
            .filter(|value| DATE_PATTERN.is_match(value))
            .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok());
        match parsed {
            Some(date) => Some(date),
            None => self.fail(key, MESSAGE),
        }
    }

    fn amount(&mut self, key: &str, label: &str) -> Option<f64> {
        let obj = self.obj;
        match obj.get(key).and_then(Value::as_f64) {
            Some(value) if value.is_finite() && value >= 0.0 => Some(value),
            Some(_) => self.fail(key, format!("{} must be >= 0", label)),
            None => self.fail(key, format!("{} must be a number", label)),
        }
    }

    fn unit_of_measure(&mut self, key: &str) -> Option<Option<UnitOfMeasure>> {
        let obj = self.obj;
        match obj.get(key) {
            None | Some(Value::Null) => Some(None),
            Some(Value::String(value)) if value.is_empty() => Some(None),
            Some(Value::String(value)) if UnitOfMeasure::parse(value).is_some() => {
                Some(UnitOfMeasure::parse(value))
            }
            Some(_) => self.fail(
                key,
                format!(
                    "Unit of measure must be one of: {}",
                    UnitOfMeasure::accepted()
                ),
            ),
        }
    }

    fn extra_tax(&mut self, key: &str) -> Option<ExtraTax> {
        let obj = self.obj;
        match obj.get(key) {
            None | Some(Value::Null) => Some(ExtraTax::Empty),
            Some(Value::String(value)) if value.is_empty() => Some(ExtraTax::Empty),
            Some(Value::String(value)) if RATE_PATTERN.is_match(value) => {
                Some(ExtraTax::Percent(value.clone()))
            }
            Some(Value::Number(number)) => match number.as_f64() {
                Some(value) if value.is_finite() && value >= 0.0 => {
                    Some(ExtraTax::Amount(number.clone()))
                }
                _ => self.fail(key, "Extra tax must be >= 0"),
            },
            Some(_) => self.fail(key, "Extra tax must be empty or in format like '0%'"),
        }
    }
}
