//! Submission pipeline: validate, normalize, persist, then run the
//! authority's validate-then-submit workflow and settle the stored status.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::authority::{AuthorityError, AuthorityGateway, Credential, SubmissionStep};
use super::metrics::{record_authority_call, record_retry, record_submission};
use super::normalize::{canonicalize_input, normalize_invoice};
use super::repository::{InvoiceRepository, RepositoryError};
use super::store::StoreError;
use super::validation::{validate_invoice, FieldErrors};
use crate::config::RetryConfig;
use crate::models::{InvoiceRecord, InvoiceStatus};

/// Linear backoff: the wait after failed attempt N is N units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.backoff_ms))
    }
}

/// Time source for backoff waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: u32,
}

/// Runs `f` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are spent.
pub async fn retry_with<F, Fut, T, E>(
    policy: RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &'static str,
    is_transient: fn(&E) -> bool,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(operation, attempt, "Call succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if !is_transient(&error) {
                    warn!(operation, attempt, error = %error, "Call failed with non-retryable error");
                    return Err(RetryError {
                        error,
                        attempts: attempt,
                    });
                }

                if attempt >= policy.max_attempts {
                    warn!(operation, attempt, error = %error, "Call failed after max attempts");
                    return Err(RetryError {
                        error,
                        attempts: attempt,
                    });
                }

                let backoff = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    error = %error,
                    backoff_ms = backoff.as_millis() as u64,
                    "Call failed, retrying after backoff"
                );
                record_retry(operation);

                sleeper.sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug)]
pub enum AuthorityOutcome {
    Completed { validation: Value, submission: Value },
    Failed { step: SubmissionStep, error: AuthorityError },
    /// The gateway is switched off.
    Skipped,
}

impl AuthorityOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AuthorityOutcome::Completed { .. })
    }
}

#[derive(Debug)]
pub enum OrchestrationResult {
    /// Nothing was persisted.
    ValidationFailed(FieldErrors),
    /// The store stayed unreachable for every attempt.
    NetworkFailure { attempts: u32, error: StoreError },
    StoreFailed(StoreError),
    /// Stored. The external leg may still have failed; see `authority`.
    Processed {
        record: InvoiceRecord,
        authority: AuthorityOutcome,
    },
}

#[derive(Clone)]
pub struct SubmissionOrchestrator {
    repository: InvoiceRepository,
    authority: Arc<dyn AuthorityGateway>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl SubmissionOrchestrator {
    pub fn new(
        repository: InvoiceRepository,
        authority: Arc<dyn AuthorityGateway>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            authority,
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn repository(&self) -> &InvoiceRepository {
        &self.repository
    }

    #[tracing::instrument(skip(self, raw, credential))]
    pub async fn submit_invoice(
        &self,
        raw: Value,
        credential: Option<&Credential>,
    ) -> OrchestrationResult {
        let mut input = raw;
        canonicalize_input(&mut input);

        let invoice = match validate_invoice(&input) {
            Ok(invoice) => invoice,
            Err(errors) => {
                info!(error_count = errors.len(), "Invoice failed validation");
                record_submission("validation_failed");
                return OrchestrationResult::ValidationFailed(errors);
            }
        };
        let record = InvoiceRecord::new(normalize_invoice(invoice), Utc::now());

        let repository = &self.repository;
        let stored = &record;
        let mut retried = false;
        let persisted = retry_with(
            self.policy,
            self.sleeper.as_ref(),
            "invoice_create",
            StoreError::is_transient,
            || {
                let is_retry = std::mem::replace(&mut retried, true);
                async move {
                    match repository.insert(stored).await {
                        // An earlier attempt committed before its connection failed.
                        Err(StoreError::Duplicate(_)) if is_retry => {
                            info!(invoice_id = %stored.id, "Insert already committed by an earlier attempt");
                            Ok(())
                        }
                        other => other,
                    }
                }
            },
        )
        .await;

        match persisted {
            Ok(()) => {}
            Err(RetryError { error, attempts }) if error.is_transient() => {
                record_submission("network_failure");
                return OrchestrationResult::NetworkFailure { attempts, error };
            }
            Err(RetryError { error, .. }) => {
                record_submission("store_failed");
                return OrchestrationResult::StoreFailed(error);
            }
        }

        let authority = self.run_authority(&record, credential).await;
        let record = self.settle(record, &authority).await;

        record_submission(match &authority {
            AuthorityOutcome::Completed { .. } => "approved",
            AuthorityOutcome::Failed { .. } => "authority_failed",
            AuthorityOutcome::Skipped => "stored",
        });

        OrchestrationResult::Processed { record, authority }
    }

    /// Repeats the external leg for a stored invoice. Drafts are moved to
    /// `submitted` first; decided invoices are refused.
    #[tracing::instrument(skip(self, credential))]
    pub async fn resubmit(
        &self,
        id: &str,
        credential: Option<&Credential>,
    ) -> Result<(InvoiceRecord, AuthorityOutcome), RepositoryError> {
        let mut record = self.repository.get_by_id(id).await?;
        if record.status.is_terminal() {
            return Err(RepositoryError::Locked {
                status: record.status,
                action: "resubmitted",
            });
        }
        if record.status == InvoiceStatus::Draft {
            record = self
                .repository
                .transition(id, InvoiceStatus::Submitted)
                .await?;
        }

        let authority = self.run_authority(&record, credential).await;
        let record = self.settle(record, &authority).await;
        Ok((record, authority))
    }

    async fn run_authority(
        &self,
        record: &InvoiceRecord,
        credential: Option<&Credential>,
    ) -> AuthorityOutcome {
        if !self.authority.is_enabled() {
            info!(invoice_id = %record.id, "Authority submission disabled, skipping");
            return AuthorityOutcome::Skipped;
        }

        let payload = match serde_json::to_value(&record.invoice) {
            Ok(payload) => payload,
            Err(e) => {
                return AuthorityOutcome::Failed {
                    step: SubmissionStep::Validation,
                    error: AuthorityError::RemoteError {
                        status: 0,
                        body: format!("failed to encode invoice: {}", e),
                    },
                }
            }
        };

        let authority = self.authority.as_ref();
        let validation = retry_with(
            self.policy,
            self.sleeper.as_ref(),
            "authority_validate",
            AuthorityError::is_transient,
            || authority.validate(&payload, credential),
        )
        .await;

        let validation = match validation {
            Ok(response) => {
                record_authority_call("validation", "ok");
                response
            }
            Err(RetryError { error, attempts }) => {
                warn!(invoice_id = %record.id, attempts, kind = error.kind(), "Authority validation failed");
                record_authority_call("validation", error.kind());
                return AuthorityOutcome::Failed {
                    step: SubmissionStep::Validation,
                    error,
                };
            }
        };

        // Submitting is not idempotent, so it gets exactly one attempt.
        match authority.submit(&payload, credential).await {
            Ok(submission) => {
                record_authority_call("submission", "ok");
                AuthorityOutcome::Completed {
                    validation,
                    submission,
                }
            }
            Err(error) => {
                warn!(invoice_id = %record.id, kind = error.kind(), "Authority submission failed");
                record_authority_call("submission", error.kind());
                AuthorityOutcome::Failed {
                    step: SubmissionStep::Submission,
                    error,
                }
            }
        }
    }

    /// Approves the record after a completed workflow. Anything else leaves
    /// it as stored.
    async fn settle(&self, record: InvoiceRecord, outcome: &AuthorityOutcome) -> InvoiceRecord {
        if !outcome.is_completed() {
            return record;
        }
        match self
            .repository
            .transition(&record.id, InvoiceStatus::Approved)
            .await
        {
            Ok(approved) => approved,
            Err(e) => {
                tracing::error!(invoice_id = %record.id, error = %e, "Failed to record authority approval");
                record
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::invoice_json;
    use crate::services::store::{
        InvoiceFilter, InvoiceStore, MemoryInvoiceStore, Page, PageRequest,
    };
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const UNIT: Duration = Duration::from_millis(10);

    #[derive(Default)]
    struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    /// Memory store whose first `failures` inserts report the store as down.
    struct FlakyStore {
        inner: MemoryInvoiceStore,
        failures: AtomicU32,
        commit_before_failing: bool,
    }

    impl FlakyStore {
        fn failing(failures: u32) -> Self {
            Self {
                inner: MemoryInvoiceStore::new(),
                failures: AtomicU32::new(failures),
                commit_before_failing: false,
            }
        }

        /// Writes land, but the acknowledgement is lost.
        fn committing_then_failing(failures: u32) -> Self {
            Self {
                commit_before_failing: true,
                ..Self::failing(failures)
            }
        }
    }

    #[async_trait]
    impl InvoiceStore for FlakyStore {
        async fn insert(&self, record: &InvoiceRecord) -> Result<(), StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                if self.commit_before_failing {
                    self.inner.insert(record).await?;
                }
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            self.inner.insert(record).await
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<InvoiceRecord>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn list(
            &self,
            filter: &InvoiceFilter,
            page: PageRequest,
        ) -> Result<Page<InvoiceRecord>, StoreError> {
            self.inner.list(filter, page).await
        }

        async fn replace(&self, record: &InvoiceRecord) -> Result<bool, StoreError> {
            self.inner.replace(record).await
        }

        async fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Scripted authority. Unscripted calls succeed.
    #[derive(Default)]
    struct FakeAuthority {
        disabled: bool,
        validate_results: Mutex<VecDeque<Result<Value, AuthorityError>>>,
        submit_results: Mutex<VecDeque<Result<Value, AuthorityError>>>,
        validate_calls: AtomicUsize,
        submit_calls: AtomicUsize,
    }

    impl FakeAuthority {
        fn on_validate(self, result: Result<Value, AuthorityError>) -> Self {
            self.validate_results.lock().unwrap().push_back(result);
            self
        }

        fn on_submit(self, result: Result<Value, AuthorityError>) -> Self {
            self.submit_results.lock().unwrap().push_back(result);
            self
        }
    }

    #[async_trait]
    impl AuthorityGateway for FakeAuthority {
        fn is_enabled(&self) -> bool {
            !self.disabled
        }

        async fn validate(
            &self,
            _payload: &Value,
            _credential: Option<&Credential>,
        ) -> Result<Value, AuthorityError> {
            self.validate_calls.fetch_add(1, Ordering::SeqCst);
            self.validate_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({ "validationResponse": { "statusCode": "00" } })))
        }

        async fn submit(
            &self,
            _payload: &Value,
            _credential: Option<&Credential>,
        ) -> Result<Value, AuthorityError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            self.submit_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({ "invoiceNumber": "FBR-1" })))
        }
    }

    struct Harness {
        orchestrator: SubmissionOrchestrator,
        store: Arc<dyn InvoiceStore>,
        authority: Arc<FakeAuthority>,
        sleeper: Arc<RecordingSleeper>,
    }

    fn harness(store: Arc<dyn InvoiceStore>, authority: FakeAuthority) -> Harness {
        let authority = Arc::new(authority);
        let sleeper = Arc::new(RecordingSleeper::default());
        let orchestrator = SubmissionOrchestrator::new(
            InvoiceRepository::new(store.clone()),
            authority.clone(),
            RetryPolicy::new(3, UNIT),
        )
        .with_sleeper(sleeper.clone());
        Harness {
            orchestrator,
            store,
            authority,
            sleeper,
        }
    }

    fn remote_error() -> AuthorityError {
        AuthorityError::RemoteError {
            status: 503,
            body: "busy".into(),
        }
    }

    async fn stored_count(store: &Arc<dyn InvoiceStore>) -> u64 {
        store
            .list(&InvoiceFilter::default(), PageRequest::default())
            .await
            .unwrap()
            .total
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(RetryPolicy::new(0, UNIT).max_attempts, 1);
    }

    #[tokio::test]
    async fn empty_items_fail_validation_and_persist_nothing() {
        let h = harness(Arc::new(MemoryInvoiceStore::new()), FakeAuthority::default());
        let mut input = invoice_json();
        input["items"] = json!([]);

        match h.orchestrator.submit_invoice(input, None).await {
            OrchestrationResult::ValidationFailed(errors) => {
                assert_eq!(errors.get("items"), Some("At least one item is required"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(stored_count(&h.store).await, 0);
        assert_eq!(h.authority.validate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn three_transport_failures_report_network_failure() {
        let h = harness(Arc::new(FlakyStore::failing(3)), FakeAuthority::default());

        match h.orchestrator.submit_invoice(invoice_json(), None).await {
            OrchestrationResult::NetworkFailure { attempts, error } => {
                assert_eq!(attempts, 3);
                assert!(error.is_transient());
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(*h.sleeper.waits.lock().unwrap(), vec![UNIT, UNIT * 2]);
        assert_eq!(stored_count(&h.store).await, 0);
    }

    #[tokio::test]
    async fn transient_store_failure_recovers_within_budget() {
        let h = harness(Arc::new(FlakyStore::failing(2)), FakeAuthority::default());

        let result = h.orchestrator.submit_invoice(invoice_json(), None).await;
        assert!(matches!(result, OrchestrationResult::Processed { .. }));
        assert_eq!(*h.sleeper.waits.lock().unwrap(), vec![UNIT, UNIT * 2]);
        assert_eq!(stored_count(&h.store).await, 1);
    }

    #[tokio::test]
    async fn insert_committed_before_a_lost_ack_is_not_a_failure() {
        let h = harness(
            Arc::new(FlakyStore::committing_then_failing(1)),
            FakeAuthority::default(),
        );

        let OrchestrationResult::Processed { record, .. } =
            h.orchestrator.submit_invoice(invoice_json(), None).await
        else {
            panic!("expected a processed invoice");
        };
        assert_eq!(*h.sleeper.waits.lock().unwrap(), vec![UNIT]);
        assert_eq!(stored_count(&h.store).await, 1);
        assert_eq!(record.status, InvoiceStatus::Approved);
    }

    #[tokio::test]
    async fn reinserting_a_stored_invoice_is_a_permanent_duplicate() {
        let h = harness(Arc::new(MemoryInvoiceStore::new()), FakeAuthority::default());
        let OrchestrationResult::Processed { record, .. } =
            h.orchestrator.submit_invoice(invoice_json(), None).await
        else {
            panic!("expected a processed invoice");
        };

        let err = h.store.insert(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn completed_workflow_approves_the_record() {
        let h = harness(Arc::new(MemoryInvoiceStore::new()), FakeAuthority::default());

        let OrchestrationResult::Processed { record, authority } =
            h.orchestrator.submit_invoice(invoice_json(), None).await
        else {
            panic!("expected a processed invoice");
        };
        assert!(authority.is_completed());
        assert_eq!(record.status, InvoiceStatus::Approved);
        assert!(record.submitted_at.is_some());

        let stored = h.store.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Approved);
    }

    #[tokio::test]
    async fn submit_conflict_keeps_record_submitted() {
        let authority = FakeAuthority::default().on_submit(Err(AuthorityError::Conflict {
            details: json!({ "error": "duplicate" }),
        }));
        let h = harness(Arc::new(MemoryInvoiceStore::new()), authority);

        let OrchestrationResult::Processed { record, authority } =
            h.orchestrator.submit_invoice(invoice_json(), None).await
        else {
            panic!("expected a processed invoice");
        };
        match authority {
            AuthorityOutcome::Failed { step, error } => {
                assert_eq!(step, SubmissionStep::Submission);
                assert!(matches!(error, AuthorityError::Conflict { .. }));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let stored = h.store.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Submitted);
        assert_eq!(h.authority.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_validation_errors_are_retried() {
        let authority = FakeAuthority::default()
            .on_validate(Err(remote_error()))
            .on_validate(Err(remote_error()));
        let h = harness(Arc::new(MemoryInvoiceStore::new()), authority);

        let result = h.orchestrator.submit_invoice(invoice_json(), None).await;
        let OrchestrationResult::Processed { authority, .. } = result else {
            panic!("expected a processed invoice");
        };
        assert!(authority.is_completed());
        assert_eq!(h.authority.validate_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.authority.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn authentication_failure_is_not_retried() {
        let authority = FakeAuthority::default().on_validate(Err(
            AuthorityError::AuthenticationFailed {
                details: Value::Null,
            },
        ));
        let h = harness(Arc::new(MemoryInvoiceStore::new()), authority);

        let OrchestrationResult::Processed { authority, .. } =
            h.orchestrator.submit_invoice(invoice_json(), None).await
        else {
            panic!("expected a processed invoice");
        };
        assert!(matches!(
            authority,
            AuthorityOutcome::Failed {
                step: SubmissionStep::Validation,
                error: AuthorityError::AuthenticationFailed { .. }
            }
        ));
        assert_eq!(h.authority.validate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.authority.submit_calls.load(Ordering::SeqCst), 0);
        assert!(h.sleeper.waits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_authority_is_skipped() {
        let authority = FakeAuthority {
            disabled: true,
            ..Default::default()
        };
        let h = harness(Arc::new(MemoryInvoiceStore::new()), authority);

        let OrchestrationResult::Processed { record, authority } =
            h.orchestrator.submit_invoice(invoice_json(), None).await
        else {
            panic!("expected a processed invoice");
        };
        assert!(matches!(authority, AuthorityOutcome::Skipped));
        assert_eq!(record.status, InvoiceStatus::Submitted);
        assert_eq!(h.authority.validate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resubmit_retries_the_external_leg_only() {
        let authority = FakeAuthority::default().on_submit(Err(remote_error()));
        let h = harness(Arc::new(MemoryInvoiceStore::new()), authority);

        let OrchestrationResult::Processed { record, .. } =
            h.orchestrator.submit_invoice(invoice_json(), None).await
        else {
            panic!("expected a processed invoice");
        };
        assert_eq!(record.status, InvoiceStatus::Submitted);

        let (resubmitted, outcome) = h.orchestrator.resubmit(&record.id, None).await.unwrap();
        assert!(outcome.is_completed());
        assert_eq!(resubmitted.status, InvoiceStatus::Approved);
        assert_eq!(stored_count(&h.store).await, 1);

        assert!(matches!(
            h.orchestrator.resubmit(&record.id, None).await,
            Err(RepositoryError::Locked { .. })
        ));
    }
}
