#![allow(dead_code)]

use einvoice_service::config::{
    AuthorityConfig, AuthorityEnvironment, EinvoiceConfig, MongoConfig, RetryConfig,
    StoreBackend,
};
use einvoice_service::services::metrics::init_metrics;
use einvoice_service::startup::Application;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use wiremock::MockServer;

pub const TEST_USER_ID: &str = "test_user_123";
pub const VALIDATE_PATH: &str = "/validateinvoicedata_sb";
pub const SUBMIT_PATH: &str = "/postinvoicedata_sb";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub authority: MockServer,
    pub client: Client,
}

impl TestApp {
    /// Spawns the service on a random port with an in-memory store and the
    /// authority pointed at a mock server.
    pub async fn spawn() -> Self {
        Self::spawn_with(true).await
    }

    pub async fn spawn_with(authority_enabled: bool) -> Self {
        let _ = init_metrics();

        let authority = MockServer::start().await;

        let config = EinvoiceConfig {
            common: CoreConfig {
                port: 0,
                log_level: "debug".to_string(),
            },
            store: StoreBackend::Memory,
            mongodb: MongoConfig {
                uri: String::new(),
                database: "einvoice_test".to_string(),
            },
            authority: AuthorityConfig {
                enabled: authority_enabled,
                environment: AuthorityEnvironment::Sandbox,
                base_url: authority.uri(),
                timeout_secs: 5,
                access_token: None,
            },
            retry: RetryConfig {
                max_attempts: 3,
                backoff_ms: 1,
            },
            otlp_endpoint: None,
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            authority,
            client,
        }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("X-User-ID", TEST_USER_ID)
    }

    pub async fn create_invoice(&self, body: &Value) -> Response {
        self.authed(self.client.post(format!("{}/invoices", self.address)))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_invoice(&self, id: &str) -> Response {
        self.authed(self.client.get(format!("{}/invoices/{}", self.address, id)))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn list_invoices(&self, query: &str) -> Response {
        self.authed(self.client.get(format!("{}/invoices?{}", self.address, query)))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn update_invoice(&self, id: &str, body: &Value) -> Response {
        self.authed(self.client.put(format!("{}/invoices/{}", self.address, id)))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn set_status(&self, id: &str, status: &str) -> Response {
        self.authed(
            self.client
                .patch(format!("{}/invoices/{}/status", self.address, id)),
        )
        .json(&json!({ "status": status }))
        .send()
        .await
        .expect("Failed to execute request")
    }

    pub async fn delete_invoice(&self, id: &str) -> Response {
        self.authed(self.client.delete(format!("{}/invoices/{}", self.address, id)))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn resubmit(&self, id: &str) -> Response {
        self.authed(
            self.client
                .post(format!("{}/invoices/{}/submit", self.address, id)),
        )
        .send()
        .await
        .expect("Failed to execute request")
    }

    /// Creates an invoice and returns the response body.
    pub async fn seed_invoice(&self, body: &Value) -> Value {
        let response = self.create_invoice(body).await;
        assert_eq!(response.status().as_u16(), 201);
        response.json().await.expect("Failed to parse JSON")
    }
}

/// A complete invoice as a client would send it.
pub fn sample_invoice() -> Value {
    json!({
        "invoiceType": "Sale Invoice",
        "invoiceDate": "2024-01-15",
        "sellerNTNCNIC": "1234567",
        "sellerBusinessName": "Acme Traders",
        "sellerProvince": "PUNJAB",
        "sellerAddress": "12 Mall Road, Lahore",
        "buyerNTNCNIC": "7654321",
        "buyerBusinessName": "Globex Retail",
        "buyerProvince": "SINDH",
        "buyerAddress": "44 Shahrah-e-Faisal, Karachi",
        "buyerRegistrationType": "Registered",
        "scenarioId": "SN001",
        "items": [{
            "hsCode": "0101.2100",
            "productDescription": "Office chairs",
            "rate": "17%",
            "uoM": "NO",
            "quantity": 10,
            "totalValues": 1170,
            "valueSalesExcludingST": 1000,
            "fixedNotifiedValueOrRetailPrice": 0,
            "salesTaxApplicable": 170,
            "salesTaxWithheldAtSource": 0,
            "extraTax": "",
            "furtherTax": 0,
            "sroScheduleNo": "",
            "fedPayable": 0,
            "discount": 0,
            "saleType": "Goods at standard rate (default)",
            "sroItemSerialNo": ""
        }]
    })
}
