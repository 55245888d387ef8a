mod common;

use common::{sample_invoice, TestApp};
use serde_json::{json, Value};

async fn json_body(response: reqwest::Response) -> Value {
    response.json().await.expect("Failed to parse JSON")
}

#[tokio::test]
async fn create_stores_normalized_invoice() {
    let app = TestApp::spawn_with(false).await;

    let mut invoice = sample_invoice();
    invoice["sellerNTNCNIC"] = json!("123-4567");
    invoice["invoiceDate"] = json!("2024/01/15");
    invoice["items"][0]["rate"] = json!("17.50%");

    let response = app.create_invoice(&invoice).await;
    assert_eq!(response.status().as_u16(), 201);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert!(data["id"].is_string());
    assert_eq!(data["status"], "submitted");
    assert_eq!(data["sellerNTNCNIC"], "1234567");
    assert_eq!(data["invoiceDate"], "2024-01-15");
    assert_eq!(data["items"][0]["rate"], "17.5%");
    assert_eq!(data["totalAmount"], json!(1170.0));
    assert!(data["submittedAt"].is_string());
    assert_eq!(body["authority"]["step"], "skipped");
}

#[tokio::test]
async fn create_rejects_invalid_invoice_with_field_errors() {
    let app = TestApp::spawn_with(false).await;

    let mut invoice = sample_invoice();
    invoice["items"] = json!([]);
    invoice["scenarioId"] = json!("X1");

    let response = app.create_invoice(&invoice).await;
    assert_eq!(response.status().as_u16(), 400);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Validation failed");
    let errors: Vec<String> = serde_json::from_value(body["errors"].clone()).unwrap();
    assert!(errors
        .iter()
        .any(|e| e == "items: At least one item is required"));
    assert!(errors.iter().any(|e| e.starts_with("scenarioId:")));

    let list = json_body(app.list_invoices("").await).await;
    assert_eq!(list["pagination"]["total"], 0);
}

#[tokio::test]
async fn requests_without_caller_are_unauthorized() {
    let app = TestApp::spawn_with(false).await;

    let response = app
        .client
        .get(format!("{}/invoices", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 401);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Missing X-User-ID header");
}

#[tokio::test]
async fn get_returns_stored_invoice_or_404() {
    let app = TestApp::spawn_with(false).await;
    let created = app.seed_invoice(&sample_invoice()).await;
    let id = created["data"]["id"].as_str().unwrap();

    let response = app.get_invoice(id).await;
    assert_eq!(response.status().as_u16(), 200);
    let body = json_body(response).await;
    assert_eq!(body["data"]["id"], id);
    assert_eq!(body["data"]["buyerBusinessName"], "Globex Retail");

    let response = app.get_invoice("missing-id").await;
    assert_eq!(response.status().as_u16(), 404);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Invoice not found");
}

#[tokio::test]
async fn update_merges_patch_and_revalidates() {
    let app = TestApp::spawn_with(false).await;
    let created = app.seed_invoice(&sample_invoice()).await;
    let id = created["data"]["id"].as_str().unwrap();

    let response = app
        .update_invoice(
            id,
            &json!({ "buyerBusinessName": "  Initech  ", "status": "approved" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Invoice updated successfully");
    assert_eq!(body["data"]["buyerBusinessName"], "Initech");
    // Status is not writable through an edit.
    assert_eq!(body["data"]["status"], "submitted");

    let response = app
        .update_invoice(id, &json!({ "buyerNTNCNIC": "12" }))
        .await;
    assert_eq!(response.status().as_u16(), 400);
    let body = json_body(response).await;
    assert!(body["errors"][0]
        .as_str()
        .unwrap()
        .starts_with("buyerNTNCNIC:"));
}

#[tokio::test]
async fn status_follows_lifecycle() {
    let app = TestApp::spawn_with(false).await;
    let created = app.seed_invoice(&sample_invoice()).await;
    let id = created["data"]["id"].as_str().unwrap();

    let response = app.set_status(id, "draft").await;
    assert_eq!(response.status().as_u16(), 409);

    let response = app.set_status(id, "archived").await;
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(json_body(response).await["message"], "Invalid status value");

    let response = app.set_status(id, "rejected").await;
    assert_eq!(response.status().as_u16(), 200);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "rejected");

    // Decided invoices are read-only.
    let response = app
        .update_invoice(id, &json!({ "buyerBusinessName": "Late edit" }))
        .await;
    assert_eq!(response.status().as_u16(), 409);

    let response = app.set_status(id, "approved").await;
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn status_update_requires_a_value() {
    let app = TestApp::spawn_with(false).await;
    let created = app.seed_invoice(&sample_invoice()).await;
    let id = created["data"]["id"].as_str().unwrap();

    let response = app
        .client
        .patch(format!("{}/invoices/{}/status", app.address, id))
        .header("X-User-ID", common::TEST_USER_ID)
        .json(&json!({}))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn mistyped_bodies_are_rejected_in_the_error_envelope() {
    let app = TestApp::spawn_with(false).await;
    let created = app.seed_invoice(&sample_invoice()).await;
    let id = created["data"]["id"].as_str().unwrap();

    let response = app
        .client
        .patch(format!("{}/invoices/{}/status", app.address, id))
        .header("X-User-ID", common::TEST_USER_ID)
        .json(&json!({ "status": 5 }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 400);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().starts_with("Invalid request body"));

    let response = app
        .client
        .post(format!("{}/invoices", app.address))
        .header("X-User-ID", common::TEST_USER_ID)
        .header("Content-Type", "application/json")
        .body("{\"invoiceType\": ")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(json_body(response).await["success"], false);

    let response = app
        .client
        .put(format!("{}/invoices/{}", app.address, id))
        .header("X-User-ID", common::TEST_USER_ID)
        .body("not json")
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(json_body(response).await["success"], false);
}

#[tokio::test]
async fn delete_removes_invoice_unless_approved() {
    let app = TestApp::spawn_with(false).await;

    let first = app.seed_invoice(&sample_invoice()).await;
    let first_id = first["data"]["id"].as_str().unwrap();
    let response = app.delete_invoice(first_id).await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        json_body(response).await["message"],
        "Invoice deleted successfully"
    );
    assert_eq!(app.get_invoice(first_id).await.status().as_u16(), 404);
    assert_eq!(app.delete_invoice(first_id).await.status().as_u16(), 404);

    let second = app.seed_invoice(&sample_invoice()).await;
    let second_id = second["data"]["id"].as_str().unwrap();
    assert_eq!(app.set_status(second_id, "approved").await.status().as_u16(), 200);
    assert_eq!(app.delete_invoice(second_id).await.status().as_u16(), 409);
}

#[tokio::test]
async fn list_paginates_newest_first() {
    let app = TestApp::spawn_with(false).await;

    let mut ids = Vec::new();
    for n in 0..3 {
        let mut invoice = sample_invoice();
        invoice["invoiceRefNo"] = json!(format!("REF-{}", n));
        let created = app.seed_invoice(&invoice).await;
        ids.push(created["data"]["id"].as_str().unwrap().to_string());
    }

    let response = app.list_invoices("page=1&limit=2").await;
    assert_eq!(response.status().as_u16(), 200);
    let body = json_body(response).await;
    assert_eq!(body["pagination"], json!({ "page": 1, "limit": 2, "total": 3, "pages": 2 }));
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["id"], ids[2].as_str());

    let body = json_body(app.list_invoices("page=2&limit=2").await).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["id"], ids[0].as_str());

    let response = app.list_invoices("limit=0").await;
    assert_eq!(response.status().as_u16(), 400);

    let response = app.list_invoices("page=18446744073709551615").await;
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(json_body(response).await["success"], false);

    let response = app.list_invoices("page=1000000&limit=100").await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(json_body(response).await["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn list_filters_by_status_party_dates_and_search() {
    let app = TestApp::spawn_with(false).await;

    let mut january = sample_invoice();
    january["buyerBusinessName"] = json!("Northwind Foods");
    let january = app.seed_invoice(&january).await;
    let january_id = january["data"]["id"].as_str().unwrap();

    let mut march = sample_invoice();
    march["invoiceDate"] = json!("2024-03-02");
    march["buyerNTNCNIC"] = json!("99887766");
    app.seed_invoice(&march).await;

    app.set_status(january_id, "approved").await;

    let body = json_body(app.list_invoices("status=approved").await).await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["data"][0]["id"], january_id);

    let body = json_body(app.list_invoices("buyerNTNCNIC=99887766").await).await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["data"][0]["invoiceDate"], "2024-03-02");

    let body = json_body(
        app.list_invoices("startDate=2024-02-01&endDate=2024-12-31")
            .await,
    )
    .await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["data"][0]["invoiceDate"], "2024-03-02");

    let body = json_body(app.list_invoices("search=northwind").await).await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["data"][0]["id"], january_id);

    let response = app.list_invoices("status=archived").await;
    assert_eq!(response.status().as_u16(), 400);
}
