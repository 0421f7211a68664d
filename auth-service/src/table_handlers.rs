use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{info, warn};
use uuid::Uuid;

use common_auth::{
    ensure_role, resolve_tenant, AuthContext, AuthError, QrSubject, ROLE_OWNER,
    ROLE_PLATFORM_ADMIN, ROLE_TENANT_ADMIN,
};

use crate::error::ApiError;
use crate::tenancy::ensure_tenant_owner;
use crate::AppState;

const QR_ADMIN_ROLES: &[&str] = &[ROLE_PLATFORM_ADMIN, ROLE_OWNER, ROLE_TENANT_ADMIN];

/// A table QR older than this should be reprinted.
const QR_STALE_AFTER_DAYS: i64 = 90;

#[derive(Debug, FromRow)]
pub(crate) struct TableQrRow {
    pub table_id: Uuid,
    pub table_number: String,
    pub capacity: i32,
    pub is_active: bool,
    pub qr_code_token: Option<String>,
    pub qr_code_url: Option<String>,
    pub ordering_url: Option<String>,
    pub qr_generated_at: Option<DateTime<Utc>>,
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub tenant_slug: String,
    pub tenant_image: Option<String>,
    pub zone_name: Option<String>,
}

pub(crate) async fn fetch_table_qr_row(
    pool: &sqlx::PgPool,
    table_id: Uuid,
    tenant_id: Uuid,
) -> Result<Option<TableQrRow>, ApiError> {
    let row = sqlx::query_as::<_, TableQrRow>(
        "SELECT t.id AS table_id, t.table_number, t.capacity, t.is_active,
                t.qr_code_token, t.qr_code_url, t.ordering_url, t.qr_generated_at,
                tn.id AS tenant_id, tn.name AS tenant_name, tn.slug AS tenant_slug,
                tn.image_url AS tenant_image, z.name AS zone_name
         FROM tables t
         JOIN tenants tn ON tn.id = t.tenant_id
         LEFT JOIN zones z ON z.id = t.zone_id
         WHERE t.id = $1 AND t.tenant_id = $2",
    )
    .bind(table_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[derive(Deserialize, Default)]
pub struct GenerateQrRequest {
    #[serde(default)]
    pub force_regenerate: bool,
}

#[derive(Debug, Serialize)]
pub struct QrCodeResponse {
    pub message: String,
    pub table_id: Uuid,
    pub table_number: String,
    pub qr_code_url: Option<String>,
    pub ordering_url: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
}

/// Issues (or reissues) the long-lived table token and the printable QR
/// artifacts. An existing code is kept unless force_regenerate is set;
/// regeneration invalidates every previously printed code for the table.
pub async fn generate_table_qr(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthContext,
    Path(table_id): Path<Uuid>,
    body: Option<Json<GenerateQrRequest>>,
) -> Result<Json<QrCodeResponse>, ApiError> {
    ensure_role(&auth.claims, QR_ADMIN_ROLES)?;
    let tenant_id = resolve_tenant(&headers, &auth.claims)?;
    ensure_tenant_owner(&state.db, &auth.claims, tenant_id).await?;

    let request = body.map(|Json(r)| r).unwrap_or_default();

    let table = fetch_table_qr_row(&state.db, table_id, tenant_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("TABLE_NOT_FOUND", "Table not found or access denied")
        })?;

    if table.qr_code_token.is_some() && !request.force_regenerate {
        return Ok(Json(QrCodeResponse {
            message: "QR code already exists".to_string(),
            table_id: table.table_id,
            table_number: table.table_number,
            qr_code_url: table.qr_code_url,
            ordering_url: table.ordering_url,
            generated_at: table.qr_generated_at,
        }));
    }

    let subject = QrSubject {
        tenant_id: table.tenant_id,
        table_id: table.table_id,
        table_number: table.table_number.clone(),
        table_capacity: table.capacity,
        tenant_name: table.tenant_name.clone(),
        tenant_image: table.tenant_image.clone(),
        zone_name: table.zone_name.clone(),
    };
    let (token, _expires_at) = state.codec.sign_qr(&subject)?;

    let ordering_url = format!(
        "{}/{}/menu?table={}&token={token}",
        state.config.order_url, table.tenant_slug, table.table_id
    );
    let qr_code_url = format!(
        "{}?size=200x200&data={}",
        state.config.qr_image_api_url,
        urlencoding::encode(&ordering_url)
    );
    let generated_at = Utc::now();

    sqlx::query(
        "UPDATE tables
         SET qr_code_token = $1, ordering_url = $2, qr_code_url = $3, qr_generated_at = $4
         WHERE id = $5",
    )
    .bind(&token)
    .bind(&ordering_url)
    .bind(&qr_code_url)
    .bind(generated_at)
    .bind(table.table_id)
    .execute(&state.db)
    .await?;

    info!(table_id = %table.table_id, tenant_id = %tenant_id, "table QR generated");

    Ok(Json(QrCodeResponse {
        message: "QR code generated successfully".to_string(),
        table_id: table.table_id,
        table_number: table.table_number,
        qr_code_url: Some(qr_code_url),
        ordering_url: Some(ordering_url),
        generated_at: Some(generated_at),
    }))
}

#[derive(Serialize, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum QrStatus {
    Missing,
    Outdated,
    Ready,
}

#[derive(Serialize)]
pub struct QrStatusResponse {
    pub table_id: Uuid,
    pub table_number: String,
    pub status: QrStatus,
    pub qr_code_url: Option<String>,
    pub ordering_url: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
}

pub async fn get_table_qr(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthContext,
    Path(table_id): Path<Uuid>,
) -> Result<Json<QrStatusResponse>, ApiError> {
    ensure_role(&auth.claims, QR_ADMIN_ROLES)?;
    let tenant_id = resolve_tenant(&headers, &auth.claims)?;
    ensure_tenant_owner(&state.db, &auth.claims, tenant_id).await?;

    let table = fetch_table_qr_row(&state.db, table_id, tenant_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("TABLE_NOT_FOUND", "Table not found or access denied")
        })?;

    let status = qr_status(table.qr_code_token.as_deref(), table.qr_generated_at, Utc::now());

    Ok(Json(QrStatusResponse {
        table_id: table.table_id,
        table_number: table.table_number,
        status,
        qr_code_url: table.qr_code_url,
        ordering_url: table.ordering_url,
        generated_at: table.qr_generated_at,
    }))
}

fn qr_status(
    token: Option<&str>,
    generated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> QrStatus {
    match (token, generated_at) {
        (None, _) => QrStatus::Missing,
        (Some(_), Some(at)) if now - at > Duration::days(QR_STALE_AFTER_DAYS) => {
            QrStatus::Outdated
        }
        (Some(_), _) => QrStatus::Ready,
    }
}

#[derive(Deserialize)]
pub struct VerifyQrRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct TableSummary {
    pub id: Uuid,
    pub number: String,
    pub capacity: i32,
    pub zone_name: Option<String>,
    pub tenant_name: String,
}

#[derive(Serialize)]
pub struct VerifyQrResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TableSummary>,
}

impl VerifyQrResponse {
    fn rejected(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error),
            message: message.into(),
            table: None,
        }
    }
}

/// Public diagnostic endpoint behind the "scan this code" landing page.
/// Always 200; the body says whether the scanned token is still usable.
pub async fn verify_table_token(
    State(state): State<AppState>,
    Json(request): Json<VerifyQrRequest>,
) -> Result<Json<VerifyQrResponse>, ApiError> {
    let claims = match state.codec.verify_qr(&request.token) {
        Ok(claims) => claims,
        Err(AuthError::TokenExpired) => {
            return Ok(Json(VerifyQrResponse::rejected(
                "TOKEN_EXPIRED",
                "QR code has expired. Please ask the staff for a new one.",
            )))
        }
        Err(err) => {
            warn!(error = %err, "QR verify failed");
            return Ok(Json(VerifyQrResponse::rejected(
                "TOKEN_INVALID",
                "Invalid QR code",
            )));
        }
    };

    let table = fetch_table_qr_row(&state.db, claims.table_id, claims.tenant_id).await?;
    let Some(table) = table else {
        return Ok(Json(VerifyQrResponse::rejected(
            "TABLE_NOT_FOUND",
            "Table not found",
        )));
    };

    if !table.is_active {
        return Ok(Json(VerifyQrResponse::rejected(
            "TABLE_INACTIVE",
            "Table is not available",
        )));
    }

    if table.qr_code_token.as_deref() != Some(request.token.as_str()) {
        return Ok(Json(VerifyQrResponse::rejected(
            "TOKEN_OUTDATED",
            "This QR code is outdated. Please scan the current code on the table.",
        )));
    }

    Ok(Json(VerifyQrResponse {
        valid: true,
        error: None,
        message: "QR code is valid".to_string(),
        table: Some(TableSummary {
            id: table.table_id,
            number: table.table_number,
            capacity: table.capacity,
            zone_name: table.zone_name,
            tenant_name: table.tenant_name,
        }),
    }))
}
