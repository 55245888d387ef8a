use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

use crate::services::Credential;

pub const AUTHORITY_TOKEN_HEADER: &str = "X-FBR-Token";

/// Caller-supplied bearer token for the tax authority, if any. Absent
/// tokens fall back to the configured one inside the client.
#[derive(Debug, Clone)]
pub struct AuthorityToken(pub Option<Credential>);

impl AuthorityToken {
    pub fn credential(&self) -> Option<&Credential> {
        self.0.as_ref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthorityToken
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORITY_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().trim_start_matches("Bearer ").trim())
            .filter(|v| !v.is_empty())
            .map(Credential::new);

        Ok(AuthorityToken(token))
    }
}
