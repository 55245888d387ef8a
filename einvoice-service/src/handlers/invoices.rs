use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{
    ApiResponse, AuthorityReport, InvoiceResponse, ListInvoicesParams, Pagination,
    StatusUpdateRequest,
};
use crate::middleware::{AuthorityToken, CallerId};
use crate::services::OrchestrationResult;
use crate::startup::AppState;

/// Unwraps a JSON body, answering malformed or mistyped bodies with the
/// standard 400 envelope instead of axum's plain-text rejection.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        AppError::BadRequest(anyhow::anyhow!(
            "Invalid request body: {}",
            rejection.body_text()
        ))
    })
}

#[tracing::instrument(skip(state, token, body))]
pub async fn create_invoice(
    State(state): State<AppState>,
    caller: CallerId,
    token: AuthorityToken,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let body = json_body(body)?;
    match state
        .orchestrator
        .submit_invoice(body, token.credential())
        .await
    {
        OrchestrationResult::ValidationFailed(errors) => {
            Err(AppError::InvalidFields(errors.messages()))
        }
        OrchestrationResult::NetworkFailure { attempts, error } => {
            Err(AppError::ServiceUnavailable(format!(
                "Invoice store unreachable after {} attempts: {}",
                attempts, error
            )))
        }
        OrchestrationResult::StoreFailed(error) => {
            Err(AppError::DatabaseError(anyhow::Error::new(error)))
        }
        OrchestrationResult::Processed { record, authority } => {
            let message = if authority.is_completed() {
                "Invoice created and accepted by the tax authority"
            } else {
                "Invoice created successfully"
            };
            let response = ApiResponse::data(InvoiceResponse::from(record))
                .with_message(message)
                .with_authority(AuthorityReport::from(&authority));
            Ok((StatusCode::CREATED, Json(response)))
        }
    }
}

pub async fn list_invoices(
    State(state): State<AppState>,
    _caller: CallerId,
    Query(params): Query<ListInvoicesParams>,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;
    let (filter, page) = params.into_query()?;

    let page = state.orchestrator.repository().list(&filter, page).await?;
    let pagination = Pagination::from(&page);
    let invoices: Vec<InvoiceResponse> = page.items.into_iter().map(InvoiceResponse::from).collect();

    Ok(Json(ApiResponse::data(invoices).with_pagination(pagination)))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    _caller: CallerId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.orchestrator.repository().get_by_id(&id).await?;
    Ok(Json(ApiResponse::data(InvoiceResponse::from(record))))
}

#[tracing::instrument(skip(state, patch))]
pub async fn update_invoice(
    State(state): State<AppState>,
    caller: CallerId,
    Path(id): Path<String>,
    patch: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let patch = json_body(patch)?;
    let record = state.orchestrator.repository().update(&id, &patch).await?;
    Ok(Json(
        ApiResponse::data(InvoiceResponse::from(record))
            .with_message("Invoice updated successfully"),
    ))
}

#[tracing::instrument(skip(state, request))]
pub async fn update_invoice_status(
    State(state): State<AppState>,
    caller: CallerId,
    Path(id): Path<String>,
    request: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let request = json_body(request)?;
    request.validate()?;
    let record = state
        .orchestrator
        .repository()
        .set_status(&id, &request.status)
        .await?;
    Ok(Json(
        ApiResponse::data(InvoiceResponse::from(record))
            .with_message("Invoice status updated successfully"),
    ))
}

#[tracing::instrument(skip(state))]
pub async fn delete_invoice(
    State(state): State<AppState>,
    caller: CallerId,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.orchestrator.repository().delete(&id).await?;
    Ok(Json(ApiResponse::message("Invoice deleted successfully")))
}

/// Runs the authority workflow again for a stored invoice.
#[tracing::instrument(skip(state, token))]
pub async fn resubmit_invoice(
    State(state): State<AppState>,
    caller: CallerId,
    token: AuthorityToken,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (record, authority) = state
        .orchestrator
        .resubmit(&id, token.credential())
        .await?;
    let message = if authority.is_completed() {
        "Invoice accepted by the tax authority"
    } else {
        "Invoice resubmission did not complete"
    };
    Ok(Json(
        ApiResponse::data(InvoiceResponse::from(record))
            .with_message(message)
            .with_authority(AuthorityReport::from(&authority)),
    ))
}
