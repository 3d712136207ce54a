//! Password-recovery binding.
//!
//! The recovery token is the ambient session itself: the side channel (reset
//! mail link) signs the caller in with a short-lived session, and this check
//! binds that session to the email the reset form claims. A present session is
//! not enough; the emails must match after case and whitespace folding.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::warn;

use super::error::AccessError;
use super::principal::Principal;
use super::state::AuthState;
use super::types::{RecoveryUser, RecoveryVerifyRequest, RecoveryVerifyResponse};
use super::utils::normalize_email;

const NO_SESSION_MESSAGE: &str = "recovery session missing or expired";
const MISMATCH_MESSAGE: &str = "recovery session does not match this account";

#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryBinding;

impl RecoveryBinding {
    /// True only when a session exists and its email equals `claimed_email`.
    #[must_use]
    pub fn validate(principal: Option<&Principal>, claimed_email: &str) -> bool {
        let Some(principal) = principal else {
            return false;
        };
        let claimed = normalize_email(claimed_email);
        !claimed.is_empty() && normalize_email(&principal.email) == claimed
    }
}

/// Confirm the recovery session belongs to the account being reset.
#[utoipa::path(
    post,
    path = "/v1/auth/recovery/verify",
    request_body = RecoveryVerifyRequest,
    responses(
        (status = 200, description = "Binding result; failures carry isValid=false", body = RecoveryVerifyResponse),
        (status = 400, description = "Missing payload", body = String),
        (status = 429, description = "Rate limited", body = String),
        (status = 500, description = "Session store unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn recovery_verify(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RecoveryVerifyRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let principal = match auth_state.sessions().resolve(&headers).await {
        Ok(principal) => principal,
        Err(err) => return AccessError::from(err).into_response(),
    };

    let response = match principal {
        Some(principal) if RecoveryBinding::validate(Some(&principal), &request.email) => {
            RecoveryVerifyResponse {
                is_valid: true,
                user: Some(RecoveryUser {
                    id: principal.user_id.to_string(),
                    email: principal.email,
                }),
                error: None,
            }
        }
        Some(principal) => {
            warn!(user_id = %principal.user_id, "recovery session bound to a different email");
            RecoveryVerifyResponse {
                is_valid: false,
                user: None,
                error: Some(MISMATCH_MESSAGE.to_string()),
            }
        }
        None => RecoveryVerifyResponse {
            is_valid: false,
            user: None,
            error: Some(NO_SESSION_MESSAGE.to_string()),
        },
    };

    (StatusCode::OK, Json(response)).into_response()
}
