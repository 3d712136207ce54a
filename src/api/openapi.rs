use super::handlers::{auth, health};
use axum::middleware;
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Every `/v1/*` route goes through the rate limiter; `/v1/admin/*` routes
/// additionally go through the admin API gate. Page routes (`/admin`) are wired
/// in `api::app` behind the same limiter and are not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let admin = OpenApiRouter::new()
        .routes(routes!(auth::admin::whoami))
        .layer(middleware::from_fn(auth::guard::require_admin_api));

    let v1 = OpenApiRouter::new()
        .routes(routes!(auth::verification::verify_code))
        .routes(routes!(auth::verification::send_code))
        .routes(routes!(auth::recovery::recovery_verify))
        .routes(routes!(auth::mfa::mfa_check))
        .routes(routes!(auth::mfa::mfa_status))
        .merge(admin)
        .layer(middleware::from_fn(auth::guard::rate_limit));

    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .merge(v1)
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).tags(Some(tags())).build()
}

fn tags() -> Vec<Tag> {
    [
        ("health", "Build metadata and datastore reachability"),
        ("auth", "One-time codes, recovery binding and two-factor status"),
        ("admin", "Routes behind the admin role gate"),
    ]
    .into_iter()
    .map(|(name, description)| {
        let mut tag = Tag::new(name);
        tag.description = Some(description.to_string());
        tag
    })
    .collect()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => (
            non_empty(author[..start].trim()),
            non_empty(author[start + 1..].trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}
