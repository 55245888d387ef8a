use serde_json::{json, Value};

pub fn invoice_json() -> Value {
    json!({
        "invoiceType": "Sale Invoice",
        "invoiceDate": "2024-01-15",
        "sellerNTNCNIC": "1234567",
        "buyerNTNCNIC": "7654321",
        "sellerBusinessName": "Acme Traders",
        "buyerBusinessName": "Buyer Co",
        "sellerAddress": "Lahore",
        "buyerAddress": "Karachi",
        "sellerProvince": "PUNJAB",
        "buyerProvince": "SINDH",
        "buyerRegistrationType": "Registered",
        "scenarioId": "SN001",
        "items": [{
            "hsCode": "0101.2100",
            "productDescription": "Horses",
            "rate": "17%",
            "uoM": "NO",
            "quantity": 2,
            "totalValues": 1170,
            "valueSalesExcludingST": 1000,
            "fixedNotifiedValueOrRetailPrice": 0,
            "salesTaxApplicable": 170,
            "salesTaxWithheldAtSource": 0,
            "furtherTax": 0,
            "fedPayable": 0,
            "discount": 0,
            "extraTax": ""
        }]
    })
}
