use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use service_core::error::AppError;
use validator::Validate;

use crate::models::{Invoice, InvoiceRecord, InvoiceStatus};
use crate::services::normalize::to_canonical_date;
use crate::services::{AuthorityError, AuthorityOutcome, InvoiceFilter, Page, PageRequest};

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListInvoicesParams {
    #[validate(range(min = 1, max = 1000000, message = "page must be between 1 and 1000000"))]
    pub page: Option<u64>,
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<u64>,
    pub status: Option<String>,
    #[serde(rename = "sellerNTNCNIC")]
    pub seller_ntn_cnic: Option<String>,
    #[serde(rename = "buyerNTNCNIC")]
    pub buyer_ntn_cnic: Option<String>,
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    pub search: Option<String>,
}

impl ListInvoicesParams {
    pub fn into_query(self) -> Result<(InvoiceFilter, PageRequest), AppError> {
        let status = match non_blank(self.status) {
            Some(raw) => Some(
                InvoiceStatus::parse(&raw)
                    .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Invalid status value")))?,
            ),
            None => None,
        };

        let filter = InvoiceFilter {
            status,
            seller_ntn_cnic: non_blank(self.seller_ntn_cnic),
            buyer_ntn_cnic: non_blank(self.buyer_ntn_cnic),
            start_date: parse_date("startDate", self.start_date)?,
            end_date: parse_date("endDate", self.end_date)?,
            search: non_blank(self.search),
        };
        let page = PageRequest::new(
            self.page.unwrap_or(1),
            self.limit.unwrap_or(PageRequest::DEFAULT_LIMIT),
        );
        Ok((filter, page))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_date(name: &str, value: Option<String>) -> Result<Option<NaiveDate>, AppError> {
    let Some(raw) = non_blank(value) else {
        return Ok(None);
    };
    let canonical = to_canonical_date(&Value::String(raw));
    NaiveDate::parse_from_str(&canonical, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid {} value", name)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusUpdateRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Status is required"))]
    pub status: String,
}

/// Read projection of a stored invoice. `totalAmount` is derived here.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    pub id: String,
    #[serde(flatten)]
    pub invoice: Invoice,
    pub total_amount: f64,
    pub status: InvoiceStatus,
    pub submitted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<InvoiceRecord> for InvoiceResponse {
    fn from(record: InvoiceRecord) -> Self {
        Self {
            total_amount: record.total_amount(),
            submitted_at: record.submitted_at().map(|t| t.to_rfc3339()),
            id: record.id,
            status: record.status,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
            invoice: record.invoice,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

impl<T> From<&Page<T>> for Pagination {
    fn from(page: &Page<T>) -> Self {
        Self {
            page: page.page,
            limit: page.limit,
            total: page.total,
            pages: page.pages(),
        }
    }
}

/// Result of the authority leg as shown to the caller.
#[derive(Debug, Serialize)]
pub struct AuthorityReport {
    pub ok: bool,
    /// `validation` or `submission` on failure, `completed` or `skipped`
    /// otherwise.
    pub step: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&AuthorityOutcome> for AuthorityReport {
    fn from(outcome: &AuthorityOutcome) -> Self {
        match outcome {
            AuthorityOutcome::Completed {
                validation,
                submission,
            } => Self {
                ok: true,
                step: "completed",
                kind: None,
                error: None,
                details: Some(json!({ "validation": validation, "submission": submission })),
            },
            AuthorityOutcome::Failed { step, error } => Self {
                ok: false,
                step: step.as_str(),
                kind: Some(error.kind()),
                error: Some(error.to_string()),
                details: match error {
                    AuthorityError::RemoteError { status, body } => {
                        Some(json!({ "status": status, "body": body }))
                    }
                    other => other.details(),
                },
            },
            AuthorityOutcome::Skipped => Self {
                ok: false,
                step: "skipped",
                kind: None,
                error: None,
                details: None,
            },
        }
    }
}

/// Success envelope shared by the invoice endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<AuthorityReport>,
}

impl<T> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            pagination: None,
            authority: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn with_authority(mut self, authority: AuthorityReport) -> Self {
        self.authority = Some(authority);
        self
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            pagination: None,
            authority: None,
        }
    }
}
