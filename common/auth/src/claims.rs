use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::roles::ROLE_GUEST;

/// Application-focused representation of a verified access token.
#[derive(Debug, Clone, Serialize)]
pub struct AccessClaims {
    pub subject: Uuid,
    pub email: Option<String>,
    pub role: String,
    /// Fixed home tenant. None for platform admins and owners, whose tenant
    /// scope is resolved per request.
    pub tenant_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
}

impl AccessClaims {
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

#[derive(Debug, Deserialize)]
struct AccessClaimsRepr {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    role: String,
    #[serde(default)]
    tenant: Option<String>,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
}

impl TryFrom<AccessClaimsRepr> for AccessClaims {
    type Error = AuthError;

    fn try_from(value: AccessClaimsRepr) -> AuthResult<Self> {
        let subject = Uuid::parse_str(&value.sub)
            .map_err(|_| AuthError::InvalidClaim("sub", value.sub.clone()))?;

        let tenant_id = match &value.tenant {
            Some(raw) => Some(
                Uuid::parse_str(raw)
                    .map_err(|_| AuthError::InvalidClaim("tenant", raw.clone()))?,
            ),
            None => None,
        };

        let expires_at = parse_timestamp("exp", value.exp)?;
        let issued_at = value
            .iat
            .map(|iat| parse_timestamp("iat", iat))
            .transpose()?;

        Ok(Self {
            subject,
            email: value.email,
            role: value.role,
            tenant_id,
            expires_at,
            issued_at,
        })
    }
}

impl TryFrom<serde_json::Value> for AccessClaims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: AccessClaimsRepr =
            serde_json::from_value(value).map_err(|err| AuthError::InvalidJson(err.to_string()))?;
        AccessClaims::try_from(repr)
    }
}

/// Verified QR table-token claims. The token is bound to one (tenant, table)
/// pair and carries enough denormalized context for the guest menu page.
#[derive(Debug, Clone, Serialize)]
pub struct QrClaims {
    pub role: String,
    pub tenant_id: Uuid,
    pub table_id: Uuid,
    pub table_number: String,
    pub table_capacity: i32,
    pub tenant_name: String,
    pub tenant_image: Option<String>,
    pub zone_name: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
}

impl QrClaims {
    /// A QR token must declare the guest role and a table binding; anything
    /// else is some other token presented in the QR slot.
    pub fn is_guest_table_token(&self) -> bool {
        self.role == ROLE_GUEST
    }
}

#[derive(Debug, Deserialize)]
struct QrClaimsRepr {
    #[serde(default)]
    role: Option<String>,
    tenant_id: String,
    table_id: String,
    table_number: String,
    #[serde(default)]
    table_capacity: i32,
    #[serde(default)]
    tenant_name: String,
    #[serde(default)]
    tenant_image: Option<String>,
    #[serde(default)]
    zone_name: Option<String>,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
}

impl TryFrom<QrClaimsRepr> for QrClaims {
    type Error = AuthError;

    fn try_from(value: QrClaimsRepr) -> AuthResult<Self> {
        let tenant_id = Uuid::parse_str(&value.tenant_id)
            .map_err(|_| AuthError::InvalidClaim("tenant_id", value.tenant_id.clone()))?;
        let table_id = Uuid::parse_str(&value.table_id)
            .map_err(|_| AuthError::InvalidClaim("table_id", value.table_id.clone()))?;

        let expires_at = parse_timestamp("exp", value.exp)?;
        let issued_at = value
            .iat
            .map(|iat| parse_timestamp("iat", iat))
            .transpose()?;

        Ok(Self {
            role: value.role.unwrap_or_default(),
            tenant_id,
            table_id,
            table_number: value.table_number,
            table_capacity: value.table_capacity,
            tenant_name: value.tenant_name,
            tenant_image: value.tenant_image,
            zone_name: value.zone_name,
            expires_at,
            issued_at,
        })
    }
}

impl TryFrom<serde_json::Value> for QrClaims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: QrClaimsRepr =
            serde_json::from_value(value).map_err(|err| AuthError::InvalidJson(err.to_string()))?;
        QrClaims::try_from(repr)
    }
}

fn parse_timestamp(field: &'static str, value: i64) -> AuthResult<DateTime<Utc>> {
    Utc.timestamp_opt(value, 0)
        .single()
        .ok_or_else(|| AuthError::InvalidClaim(field, value.to_string()))
}
