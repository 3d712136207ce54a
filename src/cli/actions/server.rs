use crate::api::{self, handlers::auth::AuthConfig};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub frontend_base_url: String,
    pub login_path: String,
    pub landing_path: String,
    pub rate_limit_window_ms: i64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_sweep_seconds: u64,
    pub code_ttl_seconds: i64,
    pub datastore_timeout_ms: u64,
}

impl Args {
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.frontend_base_url.clone())
            .with_rate_limit(self.rate_limit_window_ms, self.rate_limit_max_requests)
            .with_code_ttl_seconds(self.code_ttl_seconds)
            .with_datastore_timeout_ms(self.datastore_timeout_ms)
            .with_login_path(self.login_path.clone())
            .with_landing_path(self.landing_path.clone())
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let auth_config = args.auth_config();
    api::new(
        api::ServerOptions {
            port: args.port,
            dsn: args.dsn,
            sweep_every: Duration::from_secs(args.rate_limit_sweep_seconds),
        },
        auth_config,
    )
    .await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(args.dsn.expose_secret())),
        ("frontend_base_url", args.frontend_base_url.clone()),
        ("login_path", args.login_path.clone()),
        ("landing_path", args.landing_path.clone()),
        (
            "rate_limit",
            format!(
                "{} per {}ms, sweep every {}s",
                args.rate_limit_max_requests,
                args.rate_limit_window_ms,
                args.rate_limit_sweep_seconds
            ),
        ),
        ("code_ttl_seconds", args.code_ttl_seconds.to_string()),
        ("datastore_timeout_ms", args.datastore_timeout_ms.to_string()),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "tourgate {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}
