use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::claims::{AccessClaims, QrClaims};
use crate::config::TokenConfig;
use crate::error::AuthResult;
use crate::roles::ROLE_GUEST;

/// Subject of a freshly issued access token.
pub struct AccessSubject {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: String,
    pub tenant_id: Option<Uuid>,
}

/// Table binding embedded into a QR token at generation time.
pub struct QrSubject {
    pub tenant_id: Uuid,
    pub table_id: Uuid,
    pub table_number: String,
    pub table_capacity: i32,
    pub tenant_name: String,
    pub tenant_image: Option<String>,
    pub zone_name: Option<String>,
}

/// Creates and verifies the compact signed tokens shared by the access and
/// QR table-token families. Stateless: validity is signature plus expiry;
/// the QR guard layers its own server-side checks on top.
#[derive(Clone)]
pub struct TokenCodec {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

#[derive(Serialize)]
struct SignedAccessRepr<'a> {
    sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant: Option<String>,
    exp: i64,
    iat: i64,
}

#[derive(Serialize)]
struct SignedQrRepr<'a> {
    /// Random per-issuance id. Timestamps are second-granular, so without
    /// it two regenerations in the same second would produce identical
    /// bytes and the overwritten code would keep working.
    jti: String,
    role: &'static str,
    tenant_id: String,
    table_id: String,
    table_number: &'a str,
    table_capacity: i32,
    tenant_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    zone_name: Option<&'a str>,
    exp: i64,
    iat: i64,
}

impl TokenCodec {
    pub fn new(config: TokenConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(self.config.access_ttl_minutes)
    }

    pub fn sign_access(&self, subject: &AccessSubject) -> AuthResult<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + self.access_ttl();

        let claims = SignedAccessRepr {
            sub: subject.user_id.to_string(),
            email: subject.email.as_deref(),
            role: &subject.role,
            tenant: subject.tenant_id.map(|id| id.to_string()),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok((token, expires_at))
    }

    pub fn sign_qr(&self, subject: &QrSubject) -> AuthResult<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + Duration::days(self.config.qr_ttl_days);

        let claims = SignedQrRepr {
            jti: Uuid::new_v4().to_string(),
            role: ROLE_GUEST,
            tenant_id: subject.tenant_id.to_string(),
            table_id: subject.table_id.to_string(),
            table_number: &subject.table_number,
            table_capacity: subject.table_capacity,
            tenant_name: &subject.tenant_name,
            tenant_image: subject.tenant_image.as_deref(),
            zone_name: subject.zone_name.as_deref(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok((token, expires_at))
    }

    pub fn verify_access(&self, token: &str) -> AuthResult<AccessClaims> {
        let value = self.verify(token)?;
        let claims = AccessClaims::try_from(value)?;
        debug!(subject = %claims.subject, role = %claims.role, "verified access token");
        Ok(claims)
    }

    pub fn verify_qr(&self, token: &str) -> AuthResult<QrClaims> {
        let value = self.verify(token)?;
        QrClaims::try_from(value)
    }

    fn verify(&self, token: &str) -> AuthResult<Value> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.leeway_seconds;
        validation.validate_aud = false;

        let data = decode::<Value>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}
