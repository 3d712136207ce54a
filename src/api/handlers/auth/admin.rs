//! Admin-scoped handlers. Both sit behind the admin gate and read the
//! `AdminContext` it inserts.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{Html, IntoResponse},
    Json,
};

use super::guard::AdminContext;
use super::types::AdminWhoamiResponse;

/// Identity and role of the admitted admin.
#[utoipa::path(
    get,
    path = "/v1/admin/whoami",
    responses(
        (status = 200, description = "Admitted admin", body = AdminWhoamiResponse),
        (status = 401, description = "No active session", body = String),
        (status = 403, description = "Role is not an admin role", body = String)
    ),
    tag = "admin"
)]
pub async fn whoami(admin: Option<Extension<AdminContext>>) -> impl IntoResponse {
    // Without the gate's context this route was wired without the gate.
    let Some(Extension(admin)) = admin else {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };

    (
        StatusCode::OK,
        Json(AdminWhoamiResponse {
            user_id: admin.principal.user_id.to_string(),
            email: admin.principal.email,
            role: admin.role.to_string(),
        }),
    )
        .into_response()
}

/// Landing page of the admin console. Content pages are served by the
/// frontend; this shell only exists once the page gate has admitted the caller.
pub async fn console(admin: Option<Extension<AdminContext>>) -> impl IntoResponse {
    let Some(Extension(admin)) = admin else {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };

    Html(format!(
        "<!doctype html><html><head><title>Tourgate admin</title></head>\
         <body><p>Signed in with role {}</p></body></html>",
        admin.role
    ))
    .into_response()
}
