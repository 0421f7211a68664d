use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{error, info};
use uuid::Uuid;

use common_auth::{
    ensure_role, resolve_tenant, AuthContext, ROLE_KITCHEN, ROLE_OWNER, ROLE_PLATFORM_ADMIN,
    ROLE_TENANT_ADMIN, ROLE_WAITER,
};

use crate::error::ApiError;
use crate::notifications::verification_email;
use crate::tenancy::ensure_tenant_owner;
use crate::tokens::{VerificationPurpose, VerificationTokenManager};
use crate::user_handlers::MessageResponse;
use crate::AppState;

const STAFF_ADMIN_ROLES: &[&str] = &[ROLE_PLATFORM_ADMIN, ROLE_OWNER, ROLE_TENANT_ADMIN];
const INVITABLE_ROLES: &[&str] = &[ROLE_TENANT_ADMIN, ROLE_WAITER, ROLE_KITCHEN];

#[derive(Deserialize)]
pub struct CreateStaffRequest {
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: String,
}

#[derive(Debug, Serialize, FromRow)]
pub struct StaffResponse {
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: String,
    pub role: String,
    pub tenant_id: Option<Uuid>,
    pub email_verified: bool,
}

/// Invites a staff member: the account is created without a password and an
/// email-verification link doubles as the invite. The invitee sets a
/// password through the reset flow once verified.
pub async fn create_staff(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthContext,
    Json(request): Json<CreateStaffRequest>,
) -> Result<(StatusCode, Json<StaffResponse>), ApiError> {
    ensure_role(&auth.claims, STAFF_ADMIN_ROLES)?;
    let tenant_id = resolve_tenant(&headers, &auth.claims)?;
    ensure_tenant_owner(&state.db, &auth.claims, tenant_id).await?;

    if !INVITABLE_ROLES.contains(&request.role.as_str()) {
        return Err(ApiError::bad_request(
            "INVALID_STAFF_ROLE",
            "Role must be one of tenant_admin, waiter, kitchen",
        ));
    }

    let email = request.email.trim().to_ascii_lowercase();
    let existing = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict(
            "EMAIL_EXISTS",
            "User with this email already exists",
        ));
    }

    let staff_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, email, full_name, phone, role, tenant_id, email_verified, status)
         VALUES ($1, $2, $3, $4, $5, $6, FALSE, 'active')",
    )
    .bind(staff_id)
    .bind(&email)
    .bind(request.full_name.trim())
    .bind(request.phone.as_deref())
    .bind(&request.role)
    .bind(tenant_id)
    .execute(&state.db)
    .await?;

    send_invite(&state, staff_id, &email, request.full_name.trim()).await?;

    info!(staff_id = %staff_id, tenant_id = %tenant_id, role = %request.role, "staff invited");

    Ok((
        StatusCode::CREATED,
        Json(StaffResponse {
            id: staff_id,
            email: Some(email),
            full_name: request.full_name.trim().to_string(),
            role: request.role,
            tenant_id: Some(tenant_id),
            email_verified: false,
        }),
    ))
}

pub async fn resend_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthContext,
    Path(staff_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    ensure_role(&auth.claims, STAFF_ADMIN_ROLES)?;
    let tenant_id = resolve_tenant(&headers, &auth.claims)?;
    ensure_tenant_owner(&state.db, &auth.claims, tenant_id).await?;

    let invitable: Vec<String> = INVITABLE_ROLES.iter().map(|r| r.to_string()).collect();
    let staff = sqlx::query_as::<_, StaffResponse>(
        "SELECT id, email, full_name, role, tenant_id, email_verified
         FROM users
         WHERE id = $1 AND tenant_id = $2 AND role = ANY($3)",
    )
    .bind(staff_id)
    .bind(tenant_id)
    .bind(&invitable)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("STAFF_NOT_FOUND", "Staff member not found"))?;

    if staff.email_verified {
        return Err(ApiError::conflict(
            "ALREADY_VERIFIED",
            "Staff member has already verified their email",
        ));
    }

    let Some(email) = staff.email.as_deref() else {
        return Err(ApiError::conflict(
            "NO_EMAIL",
            "Staff member has no email address on file",
        ));
    };

    send_invite(&state, staff.id, email, &staff.full_name).await?;
    info!(staff_id = %staff.id, tenant_id = %tenant_id, "invite resent");

    Ok(Json(MessageResponse {
        message: "Invitation email resent".to_string(),
    }))
}

async fn send_invite(
    state: &AppState,
    staff_id: Uuid,
    email: &str,
    full_name: &str,
) -> Result<(), ApiError> {
    let manager = VerificationTokenManager::new(state.db.clone());
    let token = manager
        .issue(staff_id, VerificationPurpose::EmailVerification)
        .await
        .map_err(|err| {
            error!(staff_id = %staff_id, error = ?err, "Failed to issue invite token");
            ApiError::internal("Unable to issue invitation")
        })?;

    state
        .mailer
        .send(verification_email(
            &state.config.email_from,
            &state.config.frontend_url,
            email,
            full_name,
            &token,
        ))
        .await
        .map_err(|err| {
            error!(staff_id = %staff_id, error = ?err, "Failed to send invite email");
            ApiError::internal("Unable to send invitation email")
        })
}
