use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
    Json,
};
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use common_auth::{extractors::parse_bearer, is_staff_role, AccessClaims, AuthError, TokenCodec};

use crate::error::ApiError;
use crate::table_handlers::fetch_table_qr_row;

/// Header customers use to present a scanned table token alongside their
/// own bearer token.
pub const QR_TOKEN_HEADER: &str = "x-qr-token";

/// What downstream ordering logic learns about the scanned table. Identity
/// fields come from the live table row; display fields ride in the token.
#[derive(Debug, Clone, Serialize)]
pub struct TableContext {
    pub table_id: Uuid,
    pub table_number: String,
    pub table_capacity: i32,
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub tenant_image: Option<String>,
    pub zone_name: Option<String>,
}

/// Admission decision for table-scoped guest routes. Staff pass through
/// without a table context; everyone else must present a currently valid
/// QR token that still matches the table's stored code.
#[derive(Debug, Serialize)]
pub struct QrGate {
    pub context: Option<TableContext>,
}

#[async_trait]
impl<S> FromRequestParts<S> for QrGate
where
    PgPool: FromRef<S>,
    Arc<TokenCodec>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let codec = Arc::<TokenCodec>::from_ref(state);
        let pool = PgPool::from_ref(state);

        let bearer = match parts.headers.get(header::AUTHORIZATION) {
            Some(value) => Some(parse_bearer(value)?),
            None => None,
        };

        // A valid staff access token bypasses the table check entirely.
        let access = bearer.as_deref().and_then(|t| codec.verify_access(t).ok());
        if let Some(claims) = &access {
            if is_staff_role(&claims.role) {
                return Ok(QrGate { context: None });
            }
        }

        let Some(token) = select_qr_token(access.as_ref(), &parts.headers, bearer.as_deref())
        else {
            return Err(ApiError::forbidden(
                "QR_REQUIRED",
                "QR code scan required. Please scan the code on your table.",
            ));
        };

        let claims = match codec.verify_qr(&token) {
            Ok(claims) => claims,
            Err(AuthError::TokenExpired) => {
                return Err(ApiError::unauthorized(
                    "QR_TOKEN_EXPIRED",
                    "QR code has expired. Please ask the staff for a new one.",
                ))
            }
            Err(err) => {
                warn!(error = %err, "QR token rejected");
                return Err(ApiError::unauthorized("QR_TOKEN_INVALID", "Invalid QR token"));
            }
        };

        if !claims.is_guest_table_token() {
            return Err(ApiError::unauthorized("QR_TOKEN_INVALID", "Invalid QR token"));
        }

        let table = fetch_table_qr_row(&pool, claims.table_id, claims.tenant_id).await?;
        let Some(table) = table else {
            return Err(ApiError::forbidden("TABLE_NOT_FOUND", "Table not found"));
        };
        if !table.is_active {
            return Err(ApiError::forbidden(
                "TABLE_INACTIVE",
                "Table is not available",
            ));
        }

        // Regenerating a table's QR invalidates every previously printed
        // code, so the presented token must match byte for byte.
        if table.qr_code_token.as_deref() != Some(token.as_str()) {
            return Err(ApiError::forbidden(
                "QR_OUTDATED",
                "This QR code is outdated. Please scan the current code on the table.",
            ));
        }

        Ok(QrGate {
            context: Some(TableContext {
                table_id: table.table_id,
                table_number: table.table_number,
                table_capacity: table.capacity,
                tenant_id: table.tenant_id,
                tenant_name: claims.tenant_name,
                tenant_image: claims.tenant_image,
                zone_name: claims.zone_name,
            }),
        })
    }
}

/// Picks which request slot carries the QR token. Signed-in customers send
/// it in the x-qr-token header next to their own bearer; anonymous guests
/// present the QR token itself as the bearer.
fn select_qr_token(
    access: Option<&AccessClaims>,
    headers: &HeaderMap,
    bearer: Option<&str>,
) -> Option<String> {
    let header_token = headers
        .get(QR_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    match access {
        // An authenticated caller's bearer is their own access token, so
        // the table token can only arrive in the header.
        Some(_) => header_token,
        None => header_token.or_else(|| bearer.map(str::to_string)),
    }
}

pub async fn guest_table_context(gate: QrGate) -> Json<QrGate> {
    Json(gate)
}
