//! Invoice model: the authority's schema for a tax invoice and its line items,
//! plus the stored record wrapping it with identity and lifecycle state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Declares a closed list of wire strings as a fieldless enum.
///
/// The enum (de)serializes as its literal label, and unknown labels are
/// rejected with the full list of accepted values.
macro_rules! closed_list {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($label => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Accepted labels, comma separated.
            pub fn accepted() -> String {
                Self::ALL
                    .iter()
                    .map(|v| v.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                $name::parse(&raw).ok_or_else(|| {
                    de::Error::custom(format!(
                        "unknown value `{}`, expected one of: {}",
                        raw,
                        $name::accepted()
                    ))
                })
            }
        }
    };
}

closed_list! {
    /// Document type of the invoice.
    InvoiceType {
        SaleInvoice => "Sale Invoice",
        CreditNote => "Credit Note",
        DebitNote => "Debit Note",
        Stwh => "STWH",
    }
}

closed_list! {
    BuyerRegistrationType {
        Registered => "Registered",
        Unregistered => "Unregistered",
        UnregisteredDistributor => "Unregistered Distributor",
        RetailConsumer => "Retail Consumer",
    }
}

closed_list! {
    /// Administrative regions accepted for seller and buyer.
    Province {
        AzadJammuAndKashmir => "AZAD JAMMU AND KASHMIR",
        Balochistan => "BALOCHISTAN",
        CapitalTerritory => "CAPITAL TERRITORY",
        GilgitBaltistan => "GILGIT BALTISTAN",
        KhyberPakhtunkhwa => "KHYBER PAKHTUNKHWA",
        Punjab => "PUNJAB",
        Sindh => "SINDH",
        FataPata => "FATA/PATA",
    }
}

closed_list! {
    UnitOfMeasure {
        MetricTon => "MT",
        BillOfLading => "Bill of lading",
        Set => "SET",
        Number => "NO",
        ThousandKwh => "1000 kWh",
        Kwh => "KWH",
        FortyKg => "40KG",
        Liter => "Liter",
        SquareYard => "SqY",
        Bag => "Bag",
    }
}

closed_list! {
    /// Lifecycle state. Server owned: only the status operation changes it.
    InvoiceStatus {
        Draft => "draft",
        Submitted => "submitted",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl InvoiceStatus {
    /// Authority decisions are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Approved | InvoiceStatus::Rejected)
    }

    /// Allowed moves: draft -> submitted -> {approved, rejected}.
    /// Requesting the current state is always allowed and changes nothing.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        *self == next
            || matches!(
                (self, next),
                (Draft, Submitted) | (Submitted, Approved) | (Submitted, Rejected)
            )
    }

    /// Record contents may be edited until the authority decides.
    pub fn allows_edit(&self) -> bool {
        !self.is_terminal()
    }

    /// Approved invoices are legal records and are never deleted.
    pub fn allows_delete(&self) -> bool {
        *self != InvoiceStatus::Approved
    }
}

/// The authority's `extraTax` field: a percentage string, an amount, or blank.
///
/// Whatever shape arrived is the shape that goes back out, so amounts keep
/// their original JSON number representation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExtraTax {
    Percent(String),
    Amount(serde_json::Number),
    #[default]
    Empty,
}

impl Serialize for ExtraTax {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExtraTax::Percent(p) => serializer.serialize_str(p),
            ExtraTax::Amount(n) => n.serialize(serializer),
            ExtraTax::Empty => serializer.serialize_str(""),
        }
    }
}

impl<'de> Deserialize<'de> for ExtraTax {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ExtraTaxVisitor;

        impl<'de> de::Visitor<'de> for ExtraTaxVisitor {
            type Value = ExtraTax;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a percentage string, an empty string or a number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ExtraTax, E> {
                if v.is_empty() {
                    Ok(ExtraTax::Empty)
                } else {
                    Ok(ExtraTax::Percent(v.to_string()))
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ExtraTax, E> {
                Ok(ExtraTax::Amount(v.into()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ExtraTax, E> {
                Ok(ExtraTax::Amount(v.into()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<ExtraTax, E> {
                serde_json::Number::from_f64(v)
                    .map(ExtraTax::Amount)
                    .ok_or_else(|| E::custom("extraTax must be a finite number"))
            }

            fn visit_unit<E: de::Error>(self) -> Result<ExtraTax, E> {
                Ok(ExtraTax::Empty)
            }

            fn visit_none<E: de::Error>(self) -> Result<ExtraTax, E> {
                Ok(ExtraTax::Empty)
            }
        }

        deserializer.deserialize_any(ExtraTaxVisitor)
    }
}

/// `uoM` is optional on the wire and travels as `""` when absent.
mod blank_as_none {
    use super::UnitOfMeasure;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<UnitOfMeasure>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.map(|u| u.as_str()).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<UnitOfMeasure>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        if raw.is_empty() {
            return Ok(None);
        }
        UnitOfMeasure::parse(&raw).map(Some).ok_or_else(|| {
            de::Error::custom(format!(
                "unknown unit of measure `{}`, expected one of: {}",
                raw,
                UnitOfMeasure::accepted()
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLineItem {
    pub hs_code: String,
    #[serde(default)]
    pub product_description: String,
    pub rate: String,
    #[serde(rename = "uoM", default, with = "blank_as_none")]
    pub uom: Option<UnitOfMeasure>,
    pub quantity: f64,
    pub total_values: f64,
    #[serde(rename = "valueSalesExcludingST")]
    pub value_sales_excluding_st: f64,
    pub fixed_notified_value_or_retail_price: f64,
    pub sales_tax_applicable: f64,
    pub sales_tax_withheld_at_source: f64,
    pub further_tax: f64,
    pub fed_payable: f64,
    pub discount: f64,
    #[serde(default)]
    pub extra_tax: ExtraTax,
    #[serde(default)]
    pub sro_schedule_no: String,
    #[serde(default)]
    pub sale_type: String,
    #[serde(default)]
    pub sro_item_serial_no: String,
}

impl InvoiceLineItem {
    /// Blank line item as presented to a user composing an invoice.
    pub fn template() -> Self {
        Self {
            hs_code: "0000.0000".to_string(),
            product_description: String::new(),
            rate: "0%".to_string(),
            uom: None,
            quantity: 0.0,
            total_values: 0.0,
            value_sales_excluding_st: 0.0,
            fixed_notified_value_or_retail_price: 0.0,
            sales_tax_applicable: 0.0,
            sales_tax_withheld_at_source: 0.0,
            further_tax: 0.0,
            fed_payable: 0.0,
            discount: 0.0,
            extra_tax: ExtraTax::Percent("0%".to_string()),
            sro_schedule_no: String::new(),
            sale_type: String::new(),
            sro_item_serial_no: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub invoice_type: InvoiceType,
    pub invoice_date: NaiveDate,
    #[serde(rename = "sellerNTNCNIC")]
    pub seller_ntn_cnic: String,
    #[serde(rename = "buyerNTNCNIC")]
    pub buyer_ntn_cnic: String,
    pub seller_business_name: String,
    pub buyer_business_name: String,
    pub seller_address: String,
    pub buyer_address: String,
    pub seller_province: Province,
    pub buyer_province: Province,
    pub buyer_registration_type: BuyerRegistrationType,
    #[serde(default)]
    pub invoice_ref_no: String,
    pub scenario_id: String,
    pub items: Vec<InvoiceLineItem>,
}

impl Invoice {
    /// Sum of every line's `totalValues`. Derived on demand, never stored.
    pub fn total_amount(&self) -> f64 {
        self.items.iter().map(|item| item.total_values).sum()
    }

    /// Default draft shape. Party details are left blank for the user to
    /// fill in, so a template by itself does not pass validation.
    pub fn template(today: NaiveDate) -> Self {
        Self {
            invoice_type: InvoiceType::SaleInvoice,
            invoice_date: today,
            seller_ntn_cnic: String::new(),
            buyer_ntn_cnic: String::new(),
            seller_business_name: String::new(),
            buyer_business_name: String::new(),
            seller_address: String::new(),
            buyer_address: String::new(),
            seller_province: Province::Punjab,
            buyer_province: Province::Punjab,
            buyer_registration_type: BuyerRegistrationType::Registered,
            invoice_ref_no: String::new(),
            scenario_id: "SN001".to_string(),
            items: vec![InvoiceLineItem::template()],
        }
    }
}

/// An invoice as persisted: server-assigned identity, lifecycle state and
/// store-owned timestamps around the client-authored fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub invoice: Invoice,
    pub status: InvoiceStatus,
    #[serde(rename = "submittedAt", default)]
    pub submitted_at: Option<mongodb::bson::DateTime>,
    #[serde(
        rename = "createdAt",
        with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime"
    )]
    pub created_at: DateTime<Utc>,
    #[serde(
        rename = "updatedAt",
        with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime"
    )]
    pub updated_at: DateTime<Utc>,
}

impl InvoiceRecord {
    /// A freshly created record is already `submitted`.
    pub fn new(invoice: Invoice, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invoice,
            status: InvoiceStatus::Submitted,
            submitted_at: Some(mongodb::bson::DateTime::from_chrono(now)),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at.map(|dt| dt.to_chrono())
    }

    pub fn total_amount(&self) -> f64 {
        self.invoice.total_amount()
    }
}
