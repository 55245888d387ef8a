use chrono::Utc;
use serde_json::Value;
use service_core::error::AppError;
use std::sync::Arc;
use thiserror::Error;

use super::normalize::{canonicalize_input, normalize_invoice};
use super::store::{InvoiceFilter, InvoiceStore, Page, PageRequest, StoreError};
use super::validation::{validate_invoice, FieldErrors};
use crate::models::{Invoice, InvoiceRecord, InvoiceStatus};

/// Keys a client may send but never overwrite.
const SERVER_OWNED_FIELDS: &[&str] = &[
    "id",
    "_id",
    "status",
    "submittedAt",
    "createdAt",
    "updatedAt",
    "totalAmount",
];

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Invoice not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Invalid status value")]
    InvalidStatus(String),

    #[error("Invoice cannot move from {from} to {to}")]
    InvalidTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("Invoice is {status} and can no longer be {action}")]
    Locked {
        status: InvoiceStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => AppError::NotFound(anyhow::anyhow!("Invoice not found")),
            RepositoryError::Validation(errors) => AppError::InvalidFields(errors.messages()),
            RepositoryError::InvalidStatus(_) => {
                AppError::BadRequest(anyhow::anyhow!("Invalid status value"))
            }
            err @ (RepositoryError::InvalidTransition { .. } | RepositoryError::Locked { .. }) => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            RepositoryError::Store(StoreError::Unavailable(msg)) => {
                AppError::ServiceUnavailable(msg)
            }
            RepositoryError::Store(err @ (StoreError::Backend(_) | StoreError::Duplicate(_))) => {
                AppError::DatabaseError(anyhow::Error::new(err))
            }
        }
    }
}

/// Lifecycle rules over an [`InvoiceStore`].
#[derive(Clone)]
pub struct InvoiceRepository {
    store: Arc<dyn InvoiceStore>,
}

impl InvoiceRepository {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    /// Persists a new record in `submitted` state.
    pub async fn create(&self, invoice: Invoice) -> Result<InvoiceRecord, RepositoryError> {
        let record = InvoiceRecord::new(invoice, Utc::now());
        self.insert(&record).await?;
        Ok(record)
    }

    /// Stores an already built record. Retrying with the same record never
    /// yields two invoices.
    pub async fn insert(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
        self.store.insert(record).await?;
        tracing::info!(invoice_id = %record.id, status = %record.status, "Invoice persisted");
        Ok(())
    }

    pub async fn list(
        &self,
        filter: &InvoiceFilter,
        page: PageRequest,
    ) -> Result<Page<InvoiceRecord>, RepositoryError> {
        Ok(self.store.list(filter, page).await?)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<InvoiceRecord, RepositoryError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    /// Merges `patch` over the stored invoice and re-validates the result.
    /// Nothing is written unless the merged invoice is valid.
    pub async fn update(&self, id: &str, patch: &Value) -> Result<InvoiceRecord, RepositoryError> {
        let mut record = self.get_by_id(id).await?;
        if !record.status.allows_edit() {
            return Err(RepositoryError::Locked {
                status: record.status,
                action: "updated",
            });
        }

        let Some(patch) = patch.as_object() else {
            let mut errors = FieldErrors::new();
            errors.add("invoice", "Invoice must be an object");
            return Err(RepositoryError::Validation(errors));
        };

        let mut merged = serde_json::to_value(&record.invoice)
            .map_err(|e| StoreError::Backend(format!("failed to encode invoice: {}", e)))?;
        if let Some(target) = merged.as_object_mut() {
            for (key, value) in patch {
                if !SERVER_OWNED_FIELDS.contains(&key.as_str()) {
                    target.insert(key.clone(), value.clone());
                }
            }
        }

        canonicalize_input(&mut merged);
        let invoice = validate_invoice(&merged).map_err(RepositoryError::Validation)?;
        record.invoice = normalize_invoice(invoice);
        record.updated_at = Utc::now();

        if !self.store.replace(&record).await? {
            return Err(RepositoryError::NotFound);
        }
        tracing::info!(invoice_id = %id, "Invoice updated");
        Ok(record)
    }

    /// Status change from an untrusted string.
    pub async fn set_status(&self, id: &str, status: &str) -> Result<InvoiceRecord, RepositoryError> {
        let next = InvoiceStatus::parse(status.trim())
            .ok_or_else(|| RepositoryError::InvalidStatus(status.to_string()))?;
        self.transition(id, next).await
    }

    /// Moves a record along the lifecycle. Requesting the current state
    /// returns the record unchanged without writing.
    pub async fn transition(
        &self,
        id: &str,
        next: InvoiceStatus,
    ) -> Result<InvoiceRecord, RepositoryError> {
        let mut record = self.get_by_id(id).await?;
        let current = record.status;

        if current == next {
            return Ok(record);
        }
        if !current.can_transition_to(next) {
            return Err(RepositoryError::InvalidTransition {
                from: current,
                to: next,
            });
        }

        let now = Utc::now();
        if next == InvoiceStatus::Submitted {
            record.submitted_at = Some(mongodb::bson::DateTime::from_chrono(now));
        }
        record.status = next;
        record.updated_at = now;

        if !self.store.replace(&record).await? {
            return Err(RepositoryError::NotFound);
        }
        tracing::info!(invoice_id = %id, from = %current, to = %next, "Invoice status changed");
        Ok(record)
    }

    pub async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let record = self.get_by_id(id).await?;
        if !record.status.allows_delete() {
            return Err(RepositoryError::Locked {
                status: record.status,
                action: "deleted",
            });
        }
        if !self.store.delete(id).await? {
            return Err(RepositoryError::NotFound);
        }
        tracing::info!(invoice_id = %id, "Invoice deleted");
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }
}
