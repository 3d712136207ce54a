//! Two-factor enrollment status.
//!
//! Two lookups with different trust levels:
//! - `check_by_email` runs before authentication (login form decides whether to
//!   ask for a second factor). Unknown accounts and accounts without two-factor
//!   produce the same `{enabled: false}` body.
//! - `status_for_self` runs after authentication and only ever reads the
//!   session's own account. Backup codes are reported as a count.
//!
//! Residual risk: the unknown-account path skips the MFA read, so response
//! timing can still hint at account existence.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::error::AccessError;
use super::principal::Principal;
use super::state::AuthState;
use super::storage::{bounded, AccountStore, StoreError};
use super::types::{MfaCheckRequest, MfaCheckResponse, MfaStatusResponse};
use super::utils::{normalize_email, valid_email};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MfaCheck {
    pub enabled: bool,
    /// Present only when two-factor is enabled, so disabled and unknown match.
    pub user_id: Option<Uuid>,
}

impl MfaCheck {
    const DISABLED: Self = Self {
        enabled: false,
        user_id: None,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MfaSelfStatus {
    pub enabled: bool,
    pub backup_codes_remaining: usize,
}

pub struct MfaStatusService {
    accounts: Arc<dyn AccountStore>,
    timeout: std::time::Duration,
}

impl MfaStatusService {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountStore>, timeout: std::time::Duration) -> Self {
        Self { accounts, timeout }
    }

    /// Pre-authentication status lookup by email.
    ///
    /// # Errors
    /// Returns `StoreError` only when the datastore fails; unknown accounts are not errors.
    pub async fn check_by_email(&self, email: &str) -> Result<MfaCheck, StoreError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Ok(MfaCheck::DISABLED);
        }

        let Some(user_id) = bounded(
            self.timeout,
            "find_user_by_email",
            self.accounts.find_user_by_email(&email),
        )
        .await?
        else {
            return Ok(MfaCheck::DISABLED);
        };

        let state = bounded(
            self.timeout,
            "load_mfa_state",
            self.accounts.load_mfa_state(user_id),
        )
        .await?;

        if state.is_some_and(|state| state.enabled) {
            Ok(MfaCheck {
                enabled: true,
                user_id: Some(user_id),
            })
        } else {
            Ok(MfaCheck::DISABLED)
        }
    }

    /// Post-authentication status for the session's own account.
    ///
    /// # Errors
    /// Returns `StoreError` when the datastore fails.
    pub async fn status_for_self(&self, principal: &Principal) -> Result<MfaSelfStatus, StoreError> {
        let state = bounded(
            self.timeout,
            "load_mfa_state",
            self.accounts.load_mfa_state(principal.user_id),
        )
        .await?
        .unwrap_or_default();

        Ok(MfaSelfStatus {
            enabled: state.enabled,
            backup_codes_remaining: state
                .backup_codes
                .iter()
                .filter(|code| !code.trim().is_empty())
                .count(),
        })
    }
}

impl std::fmt::Debug for MfaStatusService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MfaStatusService")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Report whether an account needs a second factor before login.
#[utoipa::path(
    post,
    path = "/v1/auth/mfa/check",
    request_body = MfaCheckRequest,
    responses(
        (status = 200, description = "Two-factor status; unknown accounts report disabled", body = MfaCheckResponse),
        (status = 400, description = "Missing payload", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn mfa_check(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<MfaCheckRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match auth_state.mfa().check_by_email(&request.email).await {
        Ok(check) => (
            StatusCode::OK,
            Json(MfaCheckResponse {
                enabled: check.enabled,
                user_id: check.user_id.map(|id| id.to_string()),
            }),
        )
            .into_response(),
        Err(err) => AccessError::from(err).into_response(),
    }
}

/// Two-factor status of the signed-in caller.
#[utoipa::path(
    get,
    path = "/v1/auth/mfa/status",
    responses(
        (status = 200, description = "Two-factor status of the session's account", body = MfaStatusResponse),
        (status = 401, description = "No active session", body = String)
    ),
    tag = "auth"
)]
pub async fn mfa_status(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match auth_state.sessions().require(&headers).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match auth_state.mfa().status_for_self(&principal).await {
        Ok(status) => (
            StatusCode::OK,
            Json(MfaStatusResponse {
                enabled: status.enabled,
                backup_codes_remaining: status.backup_codes_remaining,
            }),
        )
            .into_response(),
        Err(err) => AccessError::from(err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::storage::{MemoryStore, MfaRecord};

    const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

    fn codes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("backup-{i}")).collect()
    }

    #[tokio::test]
    async fn enabled_account_reports_user_id() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let user_id = store.add_user("guide@example.com", None);
        store.set_mfa(
            user_id,
            MfaRecord {
                enabled: true,
                backup_codes: codes(3),
            },
        );
        let service = MfaStatusService::new(store, TIMEOUT);

        let check = service.check_by_email(" Guide@Example.com ").await?;
        assert_eq!(
            check,
            MfaCheck {
                enabled: true,
                user_id: Some(user_id)
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_and_disabled_are_indistinguishable() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let disabled = store.add_user("off@example.com", None);
        store.set_mfa(
            disabled,
            MfaRecord {
                enabled: false,
                backup_codes: Vec::new(),
            },
        );
        store.add_user("never@example.com", None);
        let service = MfaStatusService::new(store, TIMEOUT);

        let off = service.check_by_email("off@example.com").await?;
        let never = service.check_by_email("never@example.com").await?;
        let unknown = service.check_by_email("ghost@example.com").await?;
        let garbage = service.check_by_email("not an email").await?;
        assert_eq!(off, MfaCheck::DISABLED);
        assert_eq!(never, MfaCheck::DISABLED);
        assert_eq!(unknown, MfaCheck::DISABLED);
        assert_eq!(garbage, MfaCheck::DISABLED);
        Ok(())
    }

    #[tokio::test]
    async fn self_status_counts_backup_codes() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let user_id = store.add_user("me@example.com", None);
        let mut backup_codes = codes(5);
        backup_codes.push(String::new());
        store.set_mfa(
            user_id,
            MfaRecord {
                enabled: true,
                backup_codes,
            },
        );
        let service = MfaStatusService::new(store, TIMEOUT);

        let status = service
            .status_for_self(&Principal {
                user_id,
                email: "me@example.com".to_string(),
            })
            .await?;
        assert_eq!(
            status,
            MfaSelfStatus {
                enabled: true,
                backup_codes_remaining: 5
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn self_status_without_record_is_disabled() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let user_id = store.add_user("me@example.com", None);
        let service = MfaStatusService::new(store, TIMEOUT);
        let status = service
            .status_for_self(&Principal {
                user_id,
                email: "me@example.com".to_string(),
            })
            .await?;
        assert_eq!(
            status,
            MfaSelfStatus {
                enabled: false,
                backup_codes_remaining: 0
            }
        );
        Ok(())
    }
}
