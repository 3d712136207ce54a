//! In-process datastore used by tests and local runs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use super::{
    AccountStore, ConsumedCode, Datastore, MfaRecord, NewVerificationCode, SessionRecord,
    SessionStore, VerificationCodeStore,
};
use crate::api::handlers::auth::utils::hash_session_token;

#[derive(Clone, Debug)]
struct CodeRow {
    id: Uuid,
    email: String,
    code: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    used: bool,
}

#[derive(Clone, Debug)]
struct UserRow {
    email: String,
    role: Option<String>,
}

#[derive(Clone, Debug)]
struct SessionRow {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    codes: Mutex<Vec<CodeRow>>,
    users: Mutex<HashMap<Uuid, UserRow>>,
    sessions: Mutex<HashMap<Vec<u8>, SessionRow>>,
    mfa: Mutex<HashMap<Uuid, MfaRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account. `role` is stored verbatim, unknown names included.
    pub fn add_user(&self, email: &str, role: Option<&str>) -> Uuid {
        let user_id = Uuid::new_v4();
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                user_id,
                UserRow {
                    email: email.trim().to_lowercase(),
                    role: role.map(str::to_string),
                },
            );
        user_id
    }

    /// Register a session for `user_id` reachable with the raw `token`.
    pub fn add_session(&self, user_id: Uuid, token: &str, expires_at: DateTime<Utc>) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                hash_session_token(token),
                SessionRow {
                    user_id,
                    expires_at,
                },
            );
    }

    pub fn set_mfa(&self, user_id: Uuid, record: MfaRecord) {
        self.mfa
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, record);
    }

    /// Number of stored code rows, used or not.
    #[must_use]
    pub fn code_count(&self) -> usize {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Most recently stored code value for `email`.
    #[must_use]
    pub fn latest_code(&self, email: &str) -> Option<String> {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|row| row.email == email)
            .max_by_key(|row| row.created_at)
            .map(|row| row.code.clone())
    }
}

#[async_trait]
impl VerificationCodeStore for MemoryStore {
    async fn insert_code(&self, code: NewVerificationCode) -> Result<()> {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CodeRow {
                id: Uuid::new_v4(),
                email: code.email,
                code: code.code,
                created_at: code.created_at,
                expires_at: code.expires_at,
                used: false,
            });
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut codes = self.codes.lock().unwrap_or_else(PoisonError::into_inner);
        let before = codes.len();
        codes.retain(|row| row.expires_at > now);
        Ok((before - codes.len()) as u64)
    }

    async fn consume_latest(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ConsumedCode>> {
        // Lookup and claim happen under one lock, which is what makes this conditional.
        let mut codes = self.codes.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(row) = codes
            .iter_mut()
            .filter(|row| {
                row.email == email && row.code == code && !row.used && row.expires_at > now
            })
            .max_by_key(|row| row.created_at)
        else {
            return Ok(None);
        };
        row.used = true;
        Ok(Some(ConsumedCode {
            id: row.id,
            email: row.email.clone(),
            created_at: row.created_at,
            expires_at: row.expires_at,
        }))
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<Uuid>> {
        Ok(self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, user)| user.email == email)
            .map(|(id, _)| *id))
    }

    async fn lookup_role(&self, user_id: Uuid) -> Result<Option<String>> {
        Ok(self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .and_then(|user| user.role.clone()))
    }

    async fn load_mfa_state(&self, user_id: Uuid) -> Result<Option<MfaRecord>> {
        Ok(self
            .mfa
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn lookup_session(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let session = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token_hash)
            .filter(|session| session.expires_at > now)
            .cloned();
        let Some(session) = session else {
            return Ok(None);
        };
        Ok(self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session.user_id)
            .map(|user| SessionRecord {
                user_id: session.user_id,
                email: user.email.clone(),
            }))
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
