//! One-time email code lifecycle.
//!
//! Flow Overview:
//! 1) `issue` stores a fresh six-digit code for an email; older rows stay.
//! 2) `consume` triggers the store's expired-code cleanup (best effort), then
//!    claims the newest unused, unexpired row matching the code in one
//!    conditional write.
//! 3) Any miss, including a lost race against a concurrent consumer, is the
//!    same `ConsumeError::Invalid`.
//!
//! The ledger never deletes rows itself; it only flags consumption.

use anyhow::{Context, Result};
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::storage::{bounded, ConsumedCode, NewVerificationCode, StoreError, VerificationCodeStore};
use super::utils::{generate_numeric_code, normalize_email};

/// The only message callers ever see for a failed consumption.
pub const INVALID_CODE_MESSAGE: &str = "code incorrect or expired";

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("code incorrect or expired")]
    Invalid,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A code handed to the notifier. The value is never logged.
#[derive(Debug)]
pub struct IssuedCode {
    pub email: String,
    pub code: SecretString,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Delivery abstraction for issued codes (mail, SMS, queue).
pub trait CodeNotifier: Send + Sync {
    /// Deliver the code or return an error; the issuing endpoint stays opaque either way.
    fn deliver(&self, issued: &IssuedCode) -> Result<()>;
}

/// Local dev notifier that records the delivery without the code value.
#[derive(Clone, Debug)]
pub struct LogCodeNotifier;

impl CodeNotifier for LogCodeNotifier {
    fn deliver(&self, issued: &IssuedCode) -> Result<()> {
        info!(
            to_email = %issued.email,
            expires_at = %issued.expires_at,
            "verification code delivery stub"
        );
        Ok(())
    }
}

pub struct VerificationCodeLedger {
    store: Arc<dyn VerificationCodeStore>,
    clock: Arc<dyn Clock>,
    code_ttl: Duration,
    timeout: std::time::Duration,
}

impl VerificationCodeLedger {
    #[must_use]
    pub fn new(
        store: Arc<dyn VerificationCodeStore>,
        clock: Arc<dyn Clock>,
        code_ttl: Duration,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            code_ttl,
            timeout,
        }
    }

    /// Create and store a new code for `email`.
    ///
    /// # Errors
    /// Returns an error if the expiry overflows or the store write fails.
    pub async fn issue(&self, email: &str) -> Result<IssuedCode> {
        let email = normalize_email(email);
        let code = generate_numeric_code();
        let created_at = self.clock.now();
        let expires_at = created_at
            .checked_add_signed(self.code_ttl)
            .context("verification code expiry is out of range")?;

        bounded(
            self.timeout,
            "insert_code",
            self.store.insert_code(NewVerificationCode {
                email: email.clone(),
                code: code.clone(),
                created_at,
                expires_at,
            }),
        )
        .await?;

        Ok(IssuedCode {
            email,
            code: SecretString::from(code),
            expires_at,
        })
    }

    /// Claim the newest live code matching `email` and `code`.
    ///
    /// # Errors
    /// `ConsumeError::Invalid` for every predicate failure; `ConsumeError::Store`
    /// only when the datastore could not answer.
    pub async fn consume(&self, email: &str, code: &str) -> Result<ConsumedCode, ConsumeError> {
        let email = normalize_email(email);
        let code = code.trim();
        if email.is_empty() || code.is_empty() {
            return Err(ConsumeError::Invalid);
        }

        let now = self.clock.now();
        match bounded(self.timeout, "purge_expired", self.store.purge_expired(now)).await {
            Ok(removed) => debug!(removed, "expired verification codes purged"),
            Err(err) => warn!("Verification code cleanup failed: {err:#}"),
        }

        bounded(
            self.timeout,
            "consume_latest",
            self.store.consume_latest(&email, code, now),
        )
        .await?
        .ok_or(ConsumeError::Invalid)
    }
}

impl std::fmt::Debug for VerificationCodeLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationCodeLedger")
            .field("code_ttl", &self.code_ttl)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Reveal the code value for delivery. Kept separate so call sites are greppable.
#[must_use]
pub fn expose_code(issued: &IssuedCode) -> &str {
    issued.code.expose_secret()
}
