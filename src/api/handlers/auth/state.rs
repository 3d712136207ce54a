//! Auth state and configuration.

use chrono::Duration;
use std::sync::Arc;

use super::{
    clock::Clock,
    ledger::{CodeNotifier, VerificationCodeLedger},
    mfa::MfaStatusService,
    principal::SessionResolver,
    rate_limit::{RateLimitPolicy, RateLimiter},
    role_gate::RoleGate,
    storage::Datastore,
};

const DEFAULT_RATE_LIMIT_WINDOW_MS: i64 = 60_000;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 30;
const DEFAULT_CODE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_DATASTORE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_LOGIN_PATH: &str = "/login";
const DEFAULT_LANDING_PATH: &str = "/";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    rate_limit: RateLimitPolicy,
    code_ttl: Duration,
    datastore_timeout: std::time::Duration,
    login_path: String,
    landing_path: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            rate_limit: RateLimitPolicy::new(
                Duration::milliseconds(DEFAULT_RATE_LIMIT_WINDOW_MS),
                DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            ),
            code_ttl: Duration::seconds(DEFAULT_CODE_TTL_SECONDS),
            datastore_timeout: std::time::Duration::from_millis(DEFAULT_DATASTORE_TIMEOUT_MS),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
        }
    }

    #[must_use]
    pub fn with_rate_limit(mut self, window_ms: i64, max_requests: u32) -> Self {
        self.rate_limit = RateLimitPolicy::new(Duration::milliseconds(window_ms), max_requests);
        self
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl = Duration::try_seconds(seconds).unwrap_or(Duration::MAX);
        self
    }

    #[must_use]
    pub fn with_datastore_timeout_ms(mut self, millis: u64) -> Self {
        self.datastore_timeout = std::time::Duration::from_millis(millis);
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: String) -> Self {
        self.login_path = path;
        self
    }

    #[must_use]
    pub fn with_landing_path(mut self, path: String) -> Self {
        self.landing_path = path;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn rate_limit(&self) -> RateLimitPolicy {
        self.rate_limit
    }

    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    #[must_use]
    pub fn datastore_timeout(&self) -> std::time::Duration {
        self.datastore_timeout
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn landing_path(&self) -> &str {
        &self.landing_path
    }
}

pub struct AuthState {
    config: AuthConfig,
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<dyn RateLimiter>,
    datastore: Arc<dyn Datastore>,
    ledger: VerificationCodeLedger,
    sessions: SessionResolver,
    mfa: MfaStatusService,
    role_gate: RoleGate,
    notifier: Arc<dyn CodeNotifier>,
}

impl AuthState {
    pub fn new<S>(
        config: AuthConfig,
        clock: Arc<dyn Clock>,
        rate_limiter: Arc<dyn RateLimiter>,
        store: Arc<S>,
        notifier: Arc<dyn CodeNotifier>,
    ) -> Self
    where
        S: Datastore + 'static,
    {
        let timeout = config.datastore_timeout();
        Self {
            ledger: VerificationCodeLedger::new(
                store.clone(),
                clock.clone(),
                config.code_ttl(),
                timeout,
            ),
            sessions: SessionResolver::new(store.clone(), clock.clone(), timeout),
            mfa: MfaStatusService::new(store.clone(), timeout),
            role_gate: RoleGate::new(store.clone(), timeout),
            datastore: store,
            config,
            clock,
            rate_limiter,
            notifier,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn datastore(&self) -> &dyn Datastore {
        self.datastore.as_ref()
    }

    #[must_use]
    pub fn ledger(&self) -> &VerificationCodeLedger {
        &self.ledger
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionResolver {
        &self.sessions
    }

    #[must_use]
    pub fn mfa(&self) -> &MfaStatusService {
        &self.mfa
    }

    #[must_use]
    pub fn role_gate(&self) -> &RoleGate {
        &self.role_gate
    }

    #[must_use]
    pub fn notifier(&self) -> &dyn CodeNotifier {
        self.notifier.as_ref()
    }
}
