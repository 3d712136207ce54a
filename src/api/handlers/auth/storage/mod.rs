//! Datastore seam for the access layer.
//!
//! The durable store is an external collaborator. Components only see the
//! traits below; `PgStore` talks to Postgres and `MemoryStore` keeps everything
//! in process for tests and local runs. Every call goes through [`bounded`], so
//! a hung backend surfaces as `StoreError::Timeout` instead of blocking a request.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("datastore call `{operation}` timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A code row as written by the issuing flow.
#[derive(Clone, Debug)]
pub struct NewVerificationCode {
    pub email: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The row that a successful consumption flipped to `used`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumedCode {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MfaRecord {
    pub enabled: bool,
    pub backup_codes: Vec<String>,
}

#[async_trait]
pub trait VerificationCodeStore: Send + Sync {
    async fn insert_code(&self, code: NewVerificationCode) -> anyhow::Result<()>;

    /// Ask the store to delete codes that expired before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    /// Flip the newest unused, unexpired row matching `email` and `code` to used.
    ///
    /// Must be a single conditional write: the row is only claimed if it is still
    /// unused at write time. `None` covers both "no match" and "lost the race".
    async fn consume_latest(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<ConsumedCode>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<Uuid>>;

    /// Raw role name stored for the user, if any.
    async fn lookup_role(&self, user_id: Uuid) -> anyhow::Result<Option<String>>;

    async fn load_mfa_state(&self, user_id: Uuid) -> anyhow::Result<Option<MfaRecord>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn lookup_session(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<SessionRecord>>;
}

#[async_trait]
pub trait Datastore: VerificationCodeStore + AccountStore + SessionStore {
    async fn ping(&self) -> anyhow::Result<()>;
}

/// Await a store call with an upper bound on latency.
///
/// # Errors
/// Returns `StoreError::Timeout` when the call does not finish in time and
/// `StoreError::Backend` when the store itself fails.
pub async fn bounded<T, F>(
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, StoreError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => Ok(result.with_context(|| format!("datastore call `{operation}` failed"))?),
        Err(_) => Err(StoreError::Timeout { operation, timeout }),
    }
}
