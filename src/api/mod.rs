use crate::api::handlers::auth::{
    self, spawn_sweeper, storage::PgStore, AuthConfig, AuthState, FixedWindowRateLimiter,
    LogCodeNotifier, RateLimiter, SystemClock,
};
use crate::cli::telemetry;
use anyhow::{anyhow, Context, Result};
use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER},
        HeaderName, HeaderValue, Method,
    },
    middleware,
    routing::get,
    Extension, Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::info;
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Full application router: documented API, gated admin pages and shared state.
///
/// Admin pages are rate limited before the page gate touches the datastore.
///
/// Transport layers (tracing, request ids, CORS) are added by [`new`] so tests
/// can drive this router directly.
pub fn app(auth_state: Arc<AuthState>) -> Router {
    let (api, _openapi) = router().split_for_parts();

    let pages = Router::new()
        .route("/admin", get(auth::admin::console))
        .route("/admin/*path", get(auth::admin::console))
        .route_layer(middleware::from_fn(auth::guard::require_admin_page))
        .route_layer(middleware::from_fn(auth::guard::rate_limit));

    api.merge(pages).layer(Extension(auth_state))
}

/// Runtime knobs that are not part of `AuthConfig`.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub port: u16,
    pub dsn: SecretString,
    pub sweep_every: Duration,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(options: ServerOptions, auth_config: AuthConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(auth_config.datastore_timeout())
        .test_before_acquire(true)
        .connect(options.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let clock = Arc::new(SystemClock);
    let rate_limiter: Arc<dyn RateLimiter> = Arc::new(FixedWindowRateLimiter::new(clock.clone()));
    let sweeper = spawn_sweeper(rate_limiter.clone(), options.sweep_every);

    let frontend_origin = frontend_origin(auth_config.frontend_base_url())?;
    let auth_state = Arc::new(AuthState::new(
        auth_config,
        clock,
        rate_limiter,
        Arc::new(PgStore::new(pool)),
        Arc::new(LogCodeNotifier),
    ));

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .expose_headers([
            RETRY_AFTER,
            HeaderName::from_static(auth::guard::RATE_LIMIT_REMAINING_HEADER),
            HeaderName::from_static(auth::guard::RATE_LIMIT_RESET_HEADER),
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true);

    let app = app(auth_state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(telemetry::request_span)
                    .on_response(telemetry::record_response),
            )
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{}", options.port)).await?;

    info!("Listening on [::]:{}", options.port);

    // Peer addresses feed the rate limiter's identity key.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    sweeper.abort();

    Ok(())
}

/// Reduce the frontend base URL to the `scheme://host[:port]` CORS origin.
///
/// # Errors
/// Returns an error when the URL does not parse or has no host.
pub fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
