//! Access control and one-time credential checks.
//!
//! Request path: rate limit (every `/v1/*` route) -> admin gate (admin-scoped
//! routes only) -> handler -> ledger / recovery binding / MFA status.
//!
//! ## Failure policy
//!
//! Predicate failures (wrong or reused code, recovery email mismatch, unknown
//! account) answer 200 with a boolean envelope so callers cannot tell the cases
//! apart. Only datastore failures become hard errors, and those surface as a
//! generic 500 with the detail kept in the log.
//!
//! ## Rate limiting
//!
//! Fixed window per caller identity (peer address, then `X-Forwarded-For`,
//! then `X-Real-IP`, then a shared `unknown` bucket). State is per process.

pub(crate) mod admin;
pub mod clock;
mod error;
pub mod guard;
pub mod ledger;
pub(crate) mod mfa;
pub mod principal;
pub mod rate_limit;
pub(crate) mod recovery;
pub mod role_gate;
mod state;
pub mod storage;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AccessError;
pub use ledger::{CodeNotifier, ConsumeError, LogCodeNotifier, VerificationCodeLedger};
pub use mfa::{MfaCheck, MfaSelfStatus, MfaStatusService};
pub use principal::{Principal, SessionResolver};
pub use rate_limit::{
    spawn_sweeper, FixedWindowRateLimiter, NoopRateLimiter, RateLimitOutcome, RateLimitPolicy,
    RateLimiter,
};
pub use recovery::RecoveryBinding;
pub use role_gate::{AccessDecision, Role, RoleGate, ADMIN_ROLES};
pub use state::{AuthConfig, AuthState};
pub use utils::rate_limit_identity;
