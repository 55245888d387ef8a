use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

use super::store::{InvoiceFilter, InvoiceStore, Page, PageRequest, StoreError};
use crate::models::InvoiceRecord;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for einvoice-service");

        let index = |keys: Document, name: &str| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(name.to_string()).build())
                .build()
        };

        let indexes = [
            index(doc! { "invoiceDate": -1 }, "invoice_date_desc"),
            index(doc! { "sellerNTNCNIC": 1 }, "seller_ntn_lookup"),
            index(doc! { "buyerNTNCNIC": 1 }, "buyer_ntn_lookup"),
            index(doc! { "status": 1 }, "status_lookup"),
            index(doc! { "createdAt": -1 }, "created_at_desc"),
        ];

        self.invoices()
            .create_indexes(indexes, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create indexes on invoices collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created indexes on invoices collection");

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), mongodb::error::Error> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                e
            })?;
        Ok(())
    }

    pub fn invoices(&self) -> Collection<InvoiceRecord> {
        self.db.collection("invoices")
    }
}

/// Server code for a unique index violation (E11000).
const DUPLICATE_KEY: i32 = 11000;

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        match err.kind.as_ref() {
            ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. } => StoreError::Unavailable(err.to_string()),
            ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
                StoreError::Duplicate(write.message.clone())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Query document for a listing filter.
pub fn filter_document(filter: &InvoiceFilter) -> Document {
    let mut query = Document::new();

    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    if let Some(ntn) = &filter.seller_ntn_cnic {
        query.insert("sellerNTNCNIC", ntn.as_str());
    }
    if let Some(ntn) = &filter.buyer_ntn_cnic {
        query.insert("buyerNTNCNIC", ntn.as_str());
    }

    // invoiceDate is stored as YYYY-MM-DD, so string order is date order.
    let mut date_range = Document::new();
    if let Some(start) = filter.start_date {
        date_range.insert("$gte", start.format("%Y-%m-%d").to_string());
    }
    if let Some(end) = filter.end_date {
        date_range.insert("$lte", end.format("%Y-%m-%d").to_string());
    }
    if !date_range.is_empty() {
        query.insert("invoiceDate", date_range);
    }

    if let Some(term) = filter.search.as_deref().filter(|t| !t.is_empty()) {
        let pattern = regex::escape(term);
        let clauses: Vec<Bson> = [
            "sellerBusinessName",
            "buyerBusinessName",
            "sellerNTNCNIC",
            "buyerNTNCNIC",
            "invoiceRefNo",
        ]
        .iter()
        .map(|field| {
            let mut clause = Document::new();
            clause.insert(*field, doc! { "$regex": pattern.as_str(), "$options": "i" });
            Bson::Document(clause)
        })
        .collect();
        query.insert("$or", clauses);
    }

    query
}

#[derive(Clone)]
pub struct MongoInvoiceStore {
    db: MongoDb,
}

impl MongoInvoiceStore {
    pub fn new(db: MongoDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl InvoiceStore for MongoInvoiceStore {
    async fn insert(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
        self.db.invoices().insert_one(record, None).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<InvoiceRecord>, StoreError> {
        let record = self.db.invoices().find_one(doc! { "_id": id }, None).await?;
        Ok(record)
    }

    async fn list(
        &self,
        filter: &InvoiceFilter,
        page: PageRequest,
    ) -> Result<Page<InvoiceRecord>, StoreError> {
        let collection = self.db.invoices();
        let query = filter_document(filter);

        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .skip(page.skip())
            .limit(page.limit as i64)
            .build();

        let mut cursor = collection.find(query.clone(), options).await?;
        let mut items = Vec::new();
        while let Some(record) = cursor.try_next().await? {
            items.push(record);
        }

        let total = collection.count_documents(query, None).await?;

        Ok(Page {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn replace(&self, record: &InvoiceRecord) -> Result<bool, StoreError> {
        let result = self
            .db
            .invoices()
            .replace_one(doc! { "_id": record.id.as_str() }, record, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.db.invoices().delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.health_check().await?;
        Ok(())
    }
}
