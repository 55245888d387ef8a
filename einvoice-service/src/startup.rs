use crate::config::{EinvoiceConfig, StoreBackend};
use crate::handlers;
use crate::services::{
    FbrClient, InvoiceRepository, InvoiceStore, MemoryInvoiceStore, MongoDb, MongoInvoiceStore,
    RetryPolicy, SubmissionOrchestrator,
};
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware,
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: EinvoiceConfig,
    pub orchestrator: SubmissionOrchestrator,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: EinvoiceConfig) -> Result<Self, AppError> {
        let store = build_store(&config).await?;

        let authority = FbrClient::new(config.authority.clone()).map_err(|e| {
            tracing::error!("Failed to build authority client: {}", e);
            AppError::ConfigError(e)
        })?;
        tracing::info!(
            enabled = config.authority.enabled,
            environment = ?config.authority.environment,
            "Authority client configured"
        );

        let orchestrator = SubmissionOrchestrator::new(
            InvoiceRepository::new(store),
            Arc::new(authority),
            RetryPolicy::from(&config.retry),
        );

        let state = AppState {
            config: config.clone(),
            orchestrator,
        };

        let app = router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn build_store(config: &EinvoiceConfig) -> Result<Arc<dyn InvoiceStore>, AppError> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory invoice store; data is lost on restart");
            Ok(Arc::new(MemoryInvoiceStore::new()))
        }
        StoreBackend::Mongo => {
            let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database).await?;
            db.initialize_indexes().await.map_err(|e| {
                tracing::error!("Failed to initialize database indexes: {}", e);
                e
            })?;
            Ok(Arc::new(MongoInvoiceStore::new(db)))
        }
    }
}

pub fn router(state: AppState) -> Router {
    let invoices = Router::new()
        .route(
            "/invoices",
            post(handlers::create_invoice).get(handlers::list_invoices),
        )
        .route(
            "/invoices/:id",
            get(handlers::get_invoice)
                .put(handlers::update_invoice)
                .delete(handlers::delete_invoice),
        )
        .route("/invoices/:id/status", patch(handlers::update_invoice_status))
        .route("/invoices/:id/submit", post(handlers::resubmit_invoice));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(invoices)
        .route_layer(middleware::from_fn(metrics_middleware))
        .layer(
            // The caller extractor fills `user_id` once the header is read.
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
