pub mod invoice;

pub use invoice::{
    BuyerRegistrationType, ExtraTax, Invoice, InvoiceLineItem, InvoiceRecord, InvoiceStatus,
    InvoiceType, Province, UnitOfMeasure,
};
