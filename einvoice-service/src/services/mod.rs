pub mod authority;
pub mod database;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod repository;
pub mod store;
pub mod validation;

pub use authority::{AuthorityError, AuthorityGateway, Credential, FbrClient, SubmissionStep};
pub use database::{MongoDb, MongoInvoiceStore};
pub use orchestrator::{
    AuthorityOutcome, OrchestrationResult, RetryPolicy, Sleeper, SubmissionOrchestrator,
    TokioSleeper,
};
pub use repository::{InvoiceRepository, RepositoryError};
pub use store::{InvoiceFilter, InvoiceStore, MemoryInvoiceStore, Page, PageRequest, StoreError};
pub use validation::{validate_invoice, FieldErrors};
