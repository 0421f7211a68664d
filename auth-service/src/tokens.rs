use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

/// Account fields the session flows need alongside a consumed token.
#[derive(Debug, Clone, FromRow)]
pub struct TokenAccount {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub full_name: String,
    pub role: String,
    pub tenant_id: Option<Uuid>,
    pub email_verified: bool,
    pub status: String,
}

/// Long-lived opaque bearer secrets, persisted server-side and rotated on
/// every use. Stored as SHA-256 digests; the plaintext only transits to the
/// client once.
pub struct RefreshTokenStore {
    pool: PgPool,
    ttl_days: i64,
}

impl RefreshTokenStore {
    pub fn new(pool: PgPool, ttl_days: i64) -> Self {
        Self { pool, ttl_days }
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; 64];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn digest(token: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hasher.finalize().to_vec()
    }

    pub async fn issue(&self, user_id: Uuid) -> Result<(String, DateTime<Utc>)> {
        let token = Self::generate_token();
        let now = Utc::now();
        let expires_at = now + Duration::days(self.ttl_days);

        sqlx::query(
            "INSERT INTO auth_refresh_tokens (id, user_id, token_hash, issued_at, expires_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(Self::digest(&token))
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|err| anyhow!("Failed to persist refresh token: {err}"))?;

        Ok((token, expires_at))
    }

    /// Atomically consumes a refresh token: the row is locked and deleted in
    /// one transaction so two concurrent callers presenting the same token
    /// cannot both win. Returns the owning account, or None for unknown,
    /// expired, or already-consumed tokens.
    pub async fn consume(&self, token: &str) -> Result<Option<TokenAccount>> {
        if token.trim().is_empty() {
            return Ok(None);
        }

        let hash = Self::digest(token);
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT r.id, r.expires_at,
                    u.id AS user_id, u.email, u.full_name, u.role, u.tenant_id,
                    u.email_verified, u.status
             FROM auth_refresh_tokens r
             JOIN users u ON u.id = r.user_id
             WHERE r.token_hash = $1
             FOR UPDATE OF r",
        )
        .bind(&hash)
        .fetch_optional(&mut tx)
        .await?;

        let account = if let Some(row) = row {
            let token_id: Uuid = row.try_get("id")?;
            let expires_at: DateTime<Utc> = row.try_get("expires_at")?;

            // Single-use: delete regardless of expiry.
            sqlx::query("DELETE FROM auth_refresh_tokens WHERE id = $1")
                .bind(token_id)
                .execute(&mut tx)
                .await?;

            if expires_at <= Utc::now() {
                None
            } else {
                Some(TokenAccount {
                    user_id: row.try_get("user_id")?,
                    email: row.try_get("email")?,
                    full_name: row.try_get("full_name")?,
                    role: row.try_get("role")?,
                    tenant_id: row.try_get("tenant_id")?,
                    email_verified: row.try_get("email_verified")?,
                    status: row.try_get("status")?,
                })
            }
        } else {
            None
        };

        tx.commit().await?;
        Ok(account)
    }

    /// Deletes a single token without issuing a replacement (logout).
    pub async fn delete(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM auth_refresh_tokens WHERE token_hash = $1")
            .bind(Self::digest(token))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes every refresh token for a principal. Run on password reset.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM auth_refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationPurpose {
    EmailVerification,
    PasswordReset,
}

impl VerificationPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationPurpose::EmailVerification => "email_verification",
            VerificationPurpose::PasswordReset => "password_reset",
        }
    }

    pub fn expiry_hours(&self) -> i64 {
        match self {
            VerificationPurpose::EmailVerification => 24,
            VerificationPurpose::PasswordReset => 1,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email_verification" => Some(Self::EmailVerification),
            "password_reset" => Some(Self::PasswordReset),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum VerificationOutcome {
    Valid {
        token_id: Uuid,
        account: TokenAccount,
    },
    NotFound,
    Expired,
    AlreadyUsed,
}

impl VerificationOutcome {
    pub fn rejection_message(&self) -> Option<&'static str> {
        match self {
            VerificationOutcome::Valid { .. } => None,
            VerificationOutcome::NotFound => Some("Invalid token"),
            VerificationOutcome::Expired => Some("Token has expired"),
            VerificationOutcome::AlreadyUsed => Some("Token has already been used"),
        }
    }
}

/// Single-use, purpose-scoped tokens for email verification and password
/// reset. Issuing supersedes all prior unused tokens of the same purpose;
/// rows are stamped used rather than deleted (audit trail).
pub struct VerificationTokenManager {
    pool: PgPool,
}

impl VerificationTokenManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn digest(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Supersede-then-insert is intentionally two statements; a concurrent
    /// double issue briefly leaves two usable tokens, each still single-use.
    pub async fn issue(&self, user_id: Uuid, purpose: VerificationPurpose) -> Result<String> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE user_verification_tokens
             SET used_at = $1
             WHERE user_id = $2 AND purpose = $3 AND used_at IS NULL",
        )
        .bind(now)
        .bind(user_id)
        .bind(purpose.as_str())
        .execute(&self.pool)
        .await?;

        let token = Self::generate_token();
        let expires_at = now + Duration::hours(purpose.expiry_hours());

        sqlx::query(
            "INSERT INTO user_verification_tokens
                 (id, user_id, token_hash, purpose, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(Self::digest(&token))
        .bind(purpose.as_str())
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|err| anyhow!("Failed to persist verification token: {err}"))?;

        Ok(token)
    }

    /// Validation does not consume: the caller marks the token used inside
    /// the same transaction as the side effect so a failed side effect does
    /// not burn the token.
    pub async fn validate(
        &self,
        token: &str,
        purpose: VerificationPurpose,
    ) -> Result<VerificationOutcome> {
        let row = sqlx::query(
            "SELECT t.id, t.expires_at, t.used_at,
                    u.id AS user_id, u.email, u.full_name, u.role, u.tenant_id,
                    u.email_verified, u.status
             FROM user_verification_tokens t
             JOIN users u ON u.id = t.user_id
             WHERE t.token_hash = $1 AND t.purpose = $2
             ORDER BY t.created_at DESC
             LIMIT 1",
        )
        .bind(Self::digest(token))
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(VerificationOutcome::NotFound);
        };

        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        if expires_at <= Utc::now() {
            return Ok(VerificationOutcome::Expired);
        }

        let used_at: Option<DateTime<Utc>> = row.try_get("used_at")?;
        if used_at.is_some() {
            return Ok(VerificationOutcome::AlreadyUsed);
        }

        Ok(VerificationOutcome::Valid {
            token_id: row.try_get("id")?,
            account: TokenAccount {
                user_id: row.try_get("user_id")?,
                email: row.try_get("email")?,
                full_name: row.try_get("full_name")?,
                role: row.try_get("role")?,
                tenant_id: row.try_get("tenant_id")?,
                email_verified: row.try_get("email_verified")?,
                status: row.try_get("status")?,
            },
        })
    }

    pub async fn mark_used(
        tx: &mut Transaction<'_, Postgres>,
        token_id: Uuid,
    ) -> Result<()> {
        sqlx::query("UPDATE user_verification_tokens SET used_at = NOW() WHERE id = $1")
            .bind(token_id)
            .execute(tx)
            .await?;
        Ok(())
    }
}
