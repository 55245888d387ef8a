//! Tax authority client.
//!
//! Two endpoints, validate and submit, both taking the normalized invoice as
//! JSON. Each call is a single attempt; retry policy lives in the
//! orchestrator. Every failure, transport included, comes back as a typed
//! [`AuthorityError`].

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::config::AuthorityConfig;

const USER_AGENT: &str = concat!("einvoice-service/", env!("CARGO_PKG_VERSION"));

/// Bearer token for the authority. Never printed.
#[derive(Clone)]
pub struct Credential(Secret<String>);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }

    fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<Secret<String>> for Credential {
    fn from(secret: Secret<String>) -> Self {
        Self(secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStep {
    Validation,
    Submission,
}

impl SubmissionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStep::Validation => "validation",
            SubmissionStep::Submission => "submission",
        }
    }
}

impl fmt::Display for SubmissionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthorityError {
    #[error("Authentication failed. Please check your access token.")]
    AuthenticationFailed { details: Value },

    /// Carries the authority's own field complaints.
    #[error("Invalid invoice data.")]
    InvalidPayload { details: Value },

    #[error("Invoice already exists or conflicts with existing data.")]
    Conflict { details: Value },

    /// `status` is 0 when no HTTP response was received.
    #[error("Authority request failed (status {status}): {body}")]
    RemoteError { status: u16, body: String },
}

impl AuthorityError {
    /// Only unclassified remote failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthorityError::RemoteError { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthorityError::AuthenticationFailed { .. } => "authentication_failed",
            AuthorityError::InvalidPayload { .. } => "invalid_payload",
            AuthorityError::Conflict { .. } => "conflict",
            AuthorityError::RemoteError { .. } => "remote_error",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            AuthorityError::AuthenticationFailed { details }
            | AuthorityError::InvalidPayload { details }
            | AuthorityError::Conflict { details } => Some(details.clone()),
            AuthorityError::RemoteError { .. } => None,
        }
    }
}

#[async_trait]
pub trait AuthorityGateway: Send + Sync {
    /// A disabled gateway is never called.
    fn is_enabled(&self) -> bool;

    async fn validate(
        &self,
        payload: &Value,
        credential: Option<&Credential>,
    ) -> Result<Value, AuthorityError>;

    async fn submit(
        &self,
        payload: &Value,
        credential: Option<&Credential>,
    ) -> Result<Value, AuthorityError>;
}

/// Maps an authority response to a result.
///
/// A 2xx response still fails when the body says so, either with
/// `success: false` or a `validationResponse.statusCode` other than `"00"`.
pub fn classify(step: SubmissionStep, status: StatusCode, body: &str) -> Result<Value, AuthorityError> {
    let details = serde_json::from_str::<Value>(body).unwrap_or_else(|_| {
        if body.is_empty() {
            Value::Null
        } else {
            Value::String(body.to_string())
        }
    });

    if status.is_success() {
        let rejected_flag = details.get("success").and_then(Value::as_bool) == Some(false);
        let rejected_code = details
            .pointer("/validationResponse/statusCode")
            .and_then(Value::as_str)
            .is_some_and(|code| code != "00");
        if rejected_flag || rejected_code {
            return Err(AuthorityError::InvalidPayload { details });
        }
        return Ok(details);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(AuthorityError::AuthenticationFailed { details }),
        StatusCode::BAD_REQUEST => Err(AuthorityError::InvalidPayload { details }),
        StatusCode::CONFLICT if step == SubmissionStep::Submission => {
            Err(AuthorityError::Conflict { details })
        }
        _ => Err(AuthorityError::RemoteError {
            status: status.as_u16(),
            body: body.to_string(),
        }),
    }
}

#[derive(Clone)]
pub struct FbrClient {
    client: Client,
    config: AuthorityConfig,
}

impl FbrClient {
    pub fn new(config: AuthorityConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, config })
    }

    async fn call(
        &self,
        step: SubmissionStep,
        url: &str,
        payload: &Value,
        credential: Option<&Credential>,
    ) -> Result<Value, AuthorityError> {
        let fallback = self.config.access_token.clone().map(Credential::from);
        let credential = credential.or(fallback.as_ref());

        let mut request = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .json(payload);
        if let Some(credential) = credential {
            request = request.bearer_auth(credential.expose());
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(step = %step, error = %e, "Authority request failed before a response");
            AuthorityError::RemoteError {
                status: 0,
                body: e.to_string(),
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AuthorityError::RemoteError {
            status: status.as_u16(),
            body: e.to_string(),
        })?;

        tracing::debug!(step = %step, status = %status, "Authority response received");

        let result = classify(step, status, &body);
        match &result {
            Ok(_) => tracing::info!(step = %step, "Authority accepted invoice"),
            Err(e) => tracing::warn!(step = %step, kind = e.kind(), error = %e, "Authority rejected invoice"),
        }
        result
    }
}

#[async_trait]
impl AuthorityGateway for FbrClient {
    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn validate(
        &self,
        payload: &Value,
        credential: Option<&Credential>,
    ) -> Result<Value, AuthorityError> {
        self.call(
            SubmissionStep::Validation,
            &self.config.validate_url(),
            payload,
            credential,
        )
        .await
    }

    async fn submit(
        &self,
        payload: &Value,
        credential: Option<&Credential>,
    ) -> Result<Value, AuthorityError> {
        self.call(
            SubmissionStep::Submission,
            &self.config.submit_url(),
            payload,
            credential,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_needs_no_failure_marker() {
        let body = json!({ "validationResponse": { "statusCode": "00", "status": "Valid" } });
        let result = classify(SubmissionStep::Validation, StatusCode::OK, &body.to_string());
        assert_eq!(result.unwrap(), body);
    }

    #[test]
    fn ok_status_with_failure_marker_is_invalid_payload() {
        let body = json!({ "validationResponse": { "statusCode": "01", "error": "Invalid HS code" } });
        let err = classify(SubmissionStep::Validation, StatusCode::OK, &body.to_string()).unwrap_err();
        assert!(matches!(err, AuthorityError::InvalidPayload { ref details } if *details == body));

        let err = classify(SubmissionStep::Submission, StatusCode::OK, r#"{"success":false}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_payload");
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        let unauthorized = classify(SubmissionStep::Validation, StatusCode::UNAUTHORIZED, "");
        assert!(matches!(
            unauthorized,
            Err(AuthorityError::AuthenticationFailed { details: Value::Null })
        ));

        let bad = classify(
            SubmissionStep::Validation,
            StatusCode::BAD_REQUEST,
            r#"{"errors":["hsCode"]}"#,
        )
        .unwrap_err();
        assert_eq!(bad.details(), Some(json!({ "errors": ["hsCode"] })));

        let server = classify(SubmissionStep::Submission, StatusCode::BAD_GATEWAY, "upstream")
            .unwrap_err();
        assert!(matches!(
            server,
            AuthorityError::RemoteError { status: 502, ref body } if body == "upstream"
        ));
        assert!(server.is_transient());
    }

    #[test]
    fn conflict_is_only_recognised_on_submit() {
        let submit = classify(SubmissionStep::Submission, StatusCode::CONFLICT, "dup").unwrap_err();
        assert_eq!(submit.kind(), "conflict");
        assert!(!submit.is_transient());

        let validate = classify(SubmissionStep::Validation, StatusCode::CONFLICT, "dup").unwrap_err();
        assert_eq!(validate.kind(), "remote_error");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("super-secret");
        assert!(!format!("{:?}", credential).contains("super-secret"));
    }
}
