//! Authenticated principal extraction.
//!
//! Flow Overview: read the session token (bearer header first, then cookie),
//! hash it, and resolve it against the identity provider's session table.
//! Missing, unknown and expired sessions all resolve to `None`.

use axum::http::{
    header::{AUTHORIZATION, COOKIE},
    HeaderMap,
};
use std::sync::Arc;

use super::clock::Clock;
use super::error::AccessError;
use super::storage::{bounded, SessionStore, StoreError};
use super::utils::hash_session_token;

pub const SESSION_COOKIE_NAME: &str = "tourgate_session";

/// Authenticated user context derived from the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: uuid::Uuid,
    pub email: String,
}

pub struct SessionResolver {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    timeout: std::time::Duration,
}

impl SessionResolver {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    /// Resolve the request's session, if any.
    ///
    /// # Errors
    /// Returns `StoreError` when the session store cannot be reached.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Option<Principal>, StoreError> {
        let Some(token) = extract_session_token(headers) else {
            return Ok(None);
        };
        // Only the hash is stored; never compare raw tokens against the database.
        let token_hash = hash_session_token(&token);
        let record = bounded(
            self.timeout,
            "lookup_session",
            self.store.lookup_session(&token_hash, self.clock.now()),
        )
        .await?;
        Ok(record.map(|record| Principal {
            user_id: record.user_id,
            email: record.email,
        }))
    }

    /// Resolve a session or fail with `Unauthenticated`.
    ///
    /// # Errors
    /// `AccessError::Unauthenticated` without a live session,
    /// `AccessError::UpstreamUnavailable` when the store fails.
    pub async fn require(&self, headers: &HeaderMap) -> Result<Principal, AccessError> {
        self.resolve(headers)
            .await?
            .ok_or(AccessError::Unauthenticated)
    }
}

impl std::fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResolver")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub(super) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let Some((key, val)) = pair.trim().split_once('=') else {
            continue;
        };
        let (key, val) = (key.trim(), val.trim());
        if key == SESSION_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
