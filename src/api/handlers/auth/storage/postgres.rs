//! Postgres-backed store. Schema lives in `sql/schema.sql`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Row};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{
    AccountStore, ConsumedCode, Datastore, MfaRecord, NewVerificationCode, SessionRecord,
    SessionStore, VerificationCodeStore,
};

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_span(operation: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation
    )
}

#[async_trait]
impl VerificationCodeStore for PgStore {
    async fn insert_code(&self, code: NewVerificationCode) -> Result<()> {
        let query = r"
            INSERT INTO verification_codes (email, code, created_at, expires_at, used)
            VALUES ($1, $2, $3, $4, FALSE)
        ";
        sqlx::query(query)
            .bind(&code.email)
            .bind(&code.code)
            .bind(code.created_at)
            .bind(code.expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT"))
            .await
            .context("failed to insert verification code")?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        // The cleanup itself belongs to the database; this only triggers it.
        let query = "SELECT cleanup_expired_verification_codes($1) AS removed";
        let row = sqlx::query(query)
            .bind(now)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to purge expired verification codes")?;
        let removed: i64 = row
            .try_get("removed")
            .context("failed to decode purged verification code count")?;
        u64::try_from(removed).context("purged verification code count is negative")
    }

    async fn consume_latest(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ConsumedCode>> {
        // One statement: the outer `used = FALSE` is re-checked after any row lock
        // wait, so a concurrent consumer that committed first makes this one miss.
        let query = r"
            UPDATE verification_codes
            SET used = TRUE,
                used_at = $3
            WHERE id = (
                SELECT id
                FROM verification_codes
                WHERE email = $1
                  AND code = $2
                  AND used = FALSE
                  AND expires_at > $3
                ORDER BY created_at DESC
                LIMIT 1
            )
              AND used = FALSE
              AND expires_at > $3
            RETURNING id, email, created_at, expires_at
        ";
        let row = sqlx::query(query)
            .bind(email)
            .bind(code)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE"))
            .await
            .context("failed to consume verification code")?;

        Ok(row.map(|row| ConsumedCode {
            id: row.get("id"),
            email: row.get("email"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }))
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<Uuid>> {
        let query = "SELECT id FROM users WHERE email = $1 LIMIT 1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to lookup user by email")?;
        Ok(row.map(|row| row.get("id")))
    }

    async fn lookup_role(&self, user_id: Uuid) -> Result<Option<String>> {
        let query = "SELECT role FROM users WHERE id = $1 LIMIT 1";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to lookup user role")?;
        Ok(row.and_then(|row| row.get::<Option<String>, _>("role")))
    }

    async fn load_mfa_state(&self, user_id: Uuid) -> Result<Option<MfaRecord>> {
        let query = r"
            SELECT enabled, backup_codes
            FROM user_mfa
            WHERE user_id = $1
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to load MFA state")?;
        Ok(row.map(|row| MfaRecord {
            enabled: row.get("enabled"),
            backup_codes: row
                .get::<Option<Vec<String>>, _>("backup_codes")
                .unwrap_or_default(),
        }))
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn lookup_session(
        &self,
        token_hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT s.user_id, u.email
            FROM user_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.session_hash = $1
              AND s.expires_at > $2
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT"))
            .await
            .context("failed to lookup session")?;
        Ok(row.map(|row| SessionRecord {
            user_id: row.get("user_id"),
            email: row.get("email"),
        }))
    }
}

#[async_trait]
impl Datastore for PgStore {
    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await
            .context("failed to acquire database connection")?;
        conn.ping()
            .instrument(info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await
            .context("failed to ping database")?;
        Ok(())
    }
}
