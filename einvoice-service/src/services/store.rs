use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{InvoiceRecord, InvoiceStatus};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached. Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A record with the same id already exists.
    #[error("duplicate invoice id {0}")]
    Duplicate(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Any subset of these narrows a listing; `None` means unconstrained.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub seller_ntn_cnic: Option<String>,
    pub buyer_ntn_cnic: Option<String>,
    /// Inclusive bounds on `invoiceDate`.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Case-insensitive substring over party names, identifiers and
    /// the reference number.
    pub search: Option<String>,
}

impl InvoiceFilter {
    pub fn matches(&self, record: &InvoiceRecord) -> bool {
        let invoice = &record.invoice;
        if self.status.is_some_and(|status| status != record.status) {
            return false;
        }
        if self
            .seller_ntn_cnic
            .as_deref()
            .is_some_and(|ntn| ntn != invoice.seller_ntn_cnic)
        {
            return false;
        }
        if self
            .buyer_ntn_cnic
            .as_deref()
            .is_some_and(|ntn| ntn != invoice.buyer_ntn_cnic)
        {
            return false;
        }
        if self.start_date.is_some_and(|start| invoice.invoice_date < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| invoice.invoice_date > end) {
            return false;
        }
        match self.search.as_deref() {
            Some(term) => {
                let term = term.to_lowercase();
                Self::search_fields(record)
                    .iter()
                    .any(|field| field.to_lowercase().contains(&term))
            }
            None => true,
        }
    }

    pub(crate) fn search_fields(record: &InvoiceRecord) -> [&str; 5] {
        [
            record.invoice.seller_business_name.as_str(),
            record.invoice.buyer_business_name.as_str(),
            record.invoice.seller_ntn_cnic.as_str(),
            record.invoice.buyer_ntn_cnic.as_str(),
            record.invoice.invoice_ref_no.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u64 = 10;
    pub const MAX_LIMIT: u64 = 100;
    pub const MAX_PAGE: u64 = 1_000_000;

    /// Clamps to page >= 1 and 1..=MAX_LIMIT.
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    pub fn pages(&self) -> u64 {
        self.total.div_ceil(self.limit.max(1))
    }
}

/// Persistence seam for invoice records. Each call is atomic per record;
/// concurrent replaces of the same record are last-write-wins.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn insert(&self, record: &InvoiceRecord) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<InvoiceRecord>, StoreError>;

    /// Newest-created first.
    async fn list(
        &self,
        filter: &InvoiceFilter,
        page: PageRequest,
    ) -> Result<Page<InvoiceRecord>, StoreError>;

    /// Returns false when no record has this id.
    async fn replace(&self, record: &InvoiceRecord) -> Result<bool, StoreError>;

    /// Returns false when no record has this id.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process store for local runs and tests.
#[derive(Default)]
pub struct MemoryInvoiceStore {
    records: RwLock<Vec<InvoiceRecord>>,
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn insert(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<InvoiceRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn list(
        &self,
        filter: &InvoiceFilter,
        page: PageRequest,
    ) -> Result<Page<InvoiceRecord>, StoreError> {
        let records = self.records.read().await;
        // Later inserts win ties on created_at.
        let mut matching: Vec<&InvoiceRecord> =
            records.iter().rev().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.skip() as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn replace(&self, record: &InvoiceRecord) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
