//! Request gates: per-identity rate limiting and the admin role gate.
//!
//! All three are `axum::middleware::from_fn` layers that read the shared
//! `Arc<AuthState>` from request extensions, so the `Extension` layer must sit
//! outside them.

use axum::{
    body::Body,
    extract::{ConnectInfo, OriginalUri, Request},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, warn};

use super::error::AccessError;
use super::principal::Principal;
use super::role_gate::{AccessDecision, Role, ADMIN_ROLES};
use super::state::AuthState;
use super::utils::rate_limit_identity;
use crate::cli::telemetry;

pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Inserted into request extensions once the admin gate lets a caller through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminContext {
    pub principal: Principal,
    pub role: Role,
}

fn auth_state(request: &Request<Body>) -> Option<Arc<AuthState>> {
    request.extensions().get::<Arc<AuthState>>().cloned()
}

fn missing_state() -> Response {
    error!("Auth state missing from request extensions");
    (StatusCode::INTERNAL_SERVER_ERROR, "Service temporarily unavailable").into_response()
}

/// Whole seconds until `reset_at`, rounded up.
fn seconds_until(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((reset_at - now).num_milliseconds()).map_or(0, |ms| ms.div_ceil(1000))
}

/// Count the request against the caller's bucket before any handler work.
pub async fn rate_limit(request: Request<Body>, next: Next) -> Response {
    let Some(auth_state) = auth_state(&request) else {
        return missing_state();
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = rate_limit_identity(request.headers(), peer);
    let outcome = auth_state
        .rate_limiter()
        .check_policy(&identity, auth_state.config().rate_limit());

    telemetry::record_rate_limit(&identity, outcome.allowed.then_some(outcome.remaining));
    if !outcome.allowed {
        warn!(identity = %identity, path = %request.uri().path(), "rate limited");
        return AccessError::RateLimited {
            retry_after_seconds: seconds_until(outcome.window_reset_at, auth_state.clock().now()),
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
        HeaderValue::from(outcome.remaining),
    );
    headers.insert(
        HeaderName::from_static(RATE_LIMIT_RESET_HEADER),
        HeaderValue::from(outcome.window_reset_at.timestamp()),
    );
    response
}

async fn admin_decision(
    auth_state: &AuthState,
    headers: &HeaderMap,
) -> Result<AccessDecision, AccessError> {
    let principal = auth_state.sessions().resolve(headers).await?;
    let decision = auth_state
        .role_gate()
        .authorize(principal.as_ref(), ADMIN_ROLES)
        .await;
    match &decision {
        AccessDecision::Allow { principal, role } => {
            telemetry::record_access("allow", Some(principal.user_id), Some(role.as_str()));
        }
        AccessDecision::DenyUnauthenticated => {
            telemetry::record_access("deny_unauthenticated", None, None);
        }
        AccessDecision::DenyForbidden => {
            let user_id = principal.as_ref().map(|principal| principal.user_id);
            telemetry::record_access("deny_forbidden", user_id, None);
        }
    }
    Ok(decision)
}

/// API boundary: 401 without a session, 403 without an admin role.
pub async fn require_admin_api(mut request: Request<Body>, next: Next) -> Response {
    let Some(auth_state) = auth_state(&request) else {
        return missing_state();
    };

    let decision = admin_decision(&auth_state, request.headers()).await;
    match decision {
        Ok(AccessDecision::Allow { principal, role }) => {
            request
                .extensions_mut()
                .insert(AdminContext { principal, role });
            next.run(request).await
        }
        Ok(AccessDecision::DenyUnauthenticated) => AccessError::Unauthenticated.into_response(),
        Ok(AccessDecision::DenyForbidden) => AccessError::Forbidden.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Page boundary: redirect to login (keeping the target in `next`) or to the
/// landing page. A denied caller never sees any part of the admin page.
pub async fn require_admin_page(mut request: Request<Body>, next: Next) -> Response {
    let Some(auth_state) = auth_state(&request) else {
        return missing_state();
    };
    let config = auth_state.config();

    let decision = admin_decision(&auth_state, request.headers()).await;
    match decision {
        Ok(AccessDecision::Allow { principal, role }) => {
            request
                .extensions_mut()
                .insert(AdminContext { principal, role });
            next.run(request).await
        }
        Ok(AccessDecision::DenyUnauthenticated) => {
            let target = request
                .extensions()
                .get::<OriginalUri>()
                .map_or_else(|| request.uri().clone(), |OriginalUri(uri)| uri.clone());
            let target = target
                .path_and_query()
                .map_or_else(|| target.path().to_string(), ToString::to_string);
            Redirect::to(&login_redirect(config.login_path(), &target)).into_response()
        }
        Ok(AccessDecision::DenyForbidden) => Redirect::to(config.landing_path()).into_response(),
        Err(err) => {
            error!("Admin page gate failed closed: {err:#}");
            Redirect::to(config.landing_path()).into_response()
        }
    }
}

fn login_redirect(login_path: &str, target: &str) -> String {
    let next: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!("{login_path}?next={next}")
}
