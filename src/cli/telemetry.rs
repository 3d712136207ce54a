//! Logging, OTLP trace export and the per-request span.
//!
//! Every request runs inside one `http.request` span opened by [`request_span`].
//! The rate limiter and the admin gates record onto that span, so a single
//! trace shows the caller bucket, the gate outcome and the final status.

use anyhow::{anyhow, bail, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{Request, Response},
};
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, sync::OnceLock, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, field::Empty, info_span, Level, Span};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};
use ulid::Ulid;
use url::Url;

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

const REQUEST_ID_HEADER: &str = "x-request-id";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
}

/// Where and how spans are exported. Only gRPC is supported.
#[derive(Debug)]
struct OtlpSettings {
    endpoint: String,
    tls_domain: Option<String>,
    metadata: MetadataMap,
    instance_id: String,
}

impl OtlpSettings {
    /// `None` unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(endpoint) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") else {
            return Ok(None);
        };
        if let Some(protocol) = lookup("OTEL_EXPORTER_OTLP_PROTOCOL") {
            if protocol != "grpc" {
                debug!("OTEL_EXPORTER_OTLP_PROTOCOL='{protocol}' ignored, exporting over grpc");
            }
        }

        let endpoint = if endpoint.contains("://") {
            endpoint
        } else {
            format!("https://{}", endpoint.trim_end_matches('/'))
        };
        let parsed = Url::parse(&endpoint)
            .with_context(|| format!("invalid OTLP endpoint: {endpoint}"))?;
        let tls_domain = (parsed.scheme() == "https")
            .then(|| parsed.host_str().map(str::to_string))
            .flatten();

        let metadata = lookup("OTEL_EXPORTER_OTLP_HEADERS")
            .map(|headers| parse_metadata(&headers))
            .transpose()?
            .unwrap_or_default();

        Ok(Some(Self {
            endpoint,
            tls_domain,
            metadata,
            instance_id: lookup("OTEL_SERVICE_INSTANCE_ID")
                .unwrap_or_else(|| Ulid::new().to_string()),
        }))
    }
}

/// `key=value,key=value` into ASCII gRPC metadata. Empty segments are skipped.
fn parse_metadata(headers: &str) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::new();
    for pair in headers.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("OTLP header `{pair}` has no `=`"))?;
        let key = key.trim().to_ascii_lowercase();
        if key.ends_with("-bin") {
            bail!("binary OTLP header `{key}` is not supported");
        }
        let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
            .map_err(|err| anyhow!("invalid OTLP header name `{key}`: {err}"))?;
        let value: MetadataValue<Ascii> = value
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid OTLP header value for `{key}`: {err}"))?;
        metadata.insert(name, value);
    }
    Ok(metadata)
}

fn resource(instance_id: &str) -> Resource {
    Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("service.instance.id", instance_id.to_string()),
            KeyValue::new("vcs.revision", crate::GIT_COMMIT_HASH),
        ])
        .build()
}

fn init_tracer(settings: OtlpSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);
    if let Some(domain) = settings.tls_domain {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain)
                .with_native_roots(),
        );
    }
    if !settings.metadata.is_empty() {
        builder = builder.with_metadata(settings.metadata);
    }
    let exporter = builder.build().context("failed to build OTLP exporter")?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource(&settings.instance_id))
        .build();
    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

fn filter(level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

fn fmt_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => fmt::layer().with_target(false).pretty().boxed(),
        // Flat lines for log shippers; the request span rides along on every event.
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    }
}

/// Install the global subscriber. Spans are exported when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// # Errors
///
/// Returns an error if the OTLP settings are invalid or a subscriber is
/// already installed.
pub fn init(settings: &LogSettings) -> Result<()> {
    let otel_layer = match OtlpSettings::from_lookup(|key| var(key).ok())? {
        Some(otlp) => Some(tracing_opentelemetry::layer().with_tracer(init_tracer(otlp)?)),
        None => None,
    };

    let subscriber = Registry::default()
        .with(fmt_layer(settings.format))
        .with(otel_layer)
        .with(filter(settings.level)?);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush and stop the exporter. No-op when tracing was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        if let Err(err) = provider.shutdown() {
            eprintln!("tracer provider shutdown failed: {err}");
        }
    }
}

fn route(request: &Request<Body>) -> &str {
    request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str)
}

fn request_id(request: &Request<Body>) -> &str {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
}

/// Root span for one request, named `METHOD /route` for the trace backend.
///
/// The access fields start empty and are filled in by the gates.
pub fn request_span(request: &Request<Body>) -> Span {
    let route = route(request);
    info_span!(
        "http.request",
        otel.name = %format_args!("{} {route}", request.method()),
        otel.kind = "server",
        otel.status_code = Empty,
        http.request.method = %request.method(),
        http.route = route,
        http.response.status_code = Empty,
        request_id = request_id(request),
        rate_limit.identity = Empty,
        rate_limit.remaining = Empty,
        access.decision = Empty,
        enduser.id = Empty,
        enduser.role = Empty,
    )
}

/// `TraceLayer::on_response` hook: status on the span, 5xx marks it failed.
pub fn record_response(response: &Response<Body>, latency: Duration, span: &Span) {
    let status = response.status();
    span.record("http.response.status_code", status.as_u16());
    if status.is_server_error() {
        span.record("otel.status_code", "ERROR");
    }
    debug!(
        status = status.as_u16(),
        latency_ms = latency.as_millis(),
        "response"
    );
}

/// Record the caller bucket and what was left in it.
pub fn record_rate_limit(identity: &str, remaining: Option<u32>) {
    let span = Span::current();
    span.record("rate_limit.identity", identity);
    match remaining {
        Some(remaining) => span.record("rate_limit.remaining", remaining),
        None => span.record("access.decision", "rate_limited"),
    };
}

/// Record an admin gate outcome and, when known, who asked.
pub fn record_access(decision: &'static str, user_id: Option<uuid::Uuid>, role: Option<&str>) {
    let span = Span::current();
    span.record("access.decision", decision);
    if let Some(user_id) = user_id {
        span.record("enduser.id", tracing::field::display(user_id));
    }
    if let Some(role) = role {
        span.record("enduser.role", role);
    }
}
