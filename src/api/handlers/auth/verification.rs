//! Email code endpoints.

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use tracing::{error, info};

use super::error::AccessError;
use super::ledger::{ConsumeError, INVALID_CODE_MESSAGE};
use super::state::AuthState;
use super::types::{SendCodeRequest, VerifyCodeRequest, VerifyCodeResponse};
use super::utils::{normalize_email, valid_email};

/// Consume a one-time email code.
///
/// Wrong, expired, reused and race-lost codes all answer with the same
/// `isValid=false` body.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-code",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Verification result", body = VerifyCodeResponse),
        (status = 400, description = "Missing payload", body = String),
        (status = 429, description = "Rate limited", body = String),
        (status = 500, description = "Datastore unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_code(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyCodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    match auth_state.ledger().consume(&request.email, &request.code).await {
        Ok(consumed) => {
            info!(code_id = %consumed.id, "verification code consumed");
            (
                StatusCode::OK,
                Json(VerifyCodeResponse {
                    is_valid: true,
                    email: Some(consumed.email),
                    error: None,
                }),
            )
                .into_response()
        }
        Err(ConsumeError::Invalid) => (
            StatusCode::OK,
            Json(VerifyCodeResponse {
                is_valid: false,
                email: None,
                error: Some(INVALID_CODE_MESSAGE.to_string()),
            }),
        )
            .into_response(),
        Err(ConsumeError::Store(err)) => AccessError::from(err).into_response(),
    }
}

/// Issue a code and hand it to the notifier (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/send-code",
    request_body = SendCodeRequest,
    responses(
        (status = 204, description = "Request accepted"),
        (status = 400, description = "Missing payload", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn send_code(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SendCodeRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return StatusCode::NO_CONTENT.into_response();
    }

    match auth_state.ledger().issue(&email).await {
        Ok(issued) => {
            if let Err(err) = auth_state.notifier().deliver(&issued) {
                error!("Failed to deliver verification code: {err:#}");
            }
        }
        Err(err) => error!("Failed to issue verification code: {err:#}"),
    }

    StatusCode::NO_CONTENT.into_response()
}
