use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{error, info, warn};
use uuid::Uuid;

use common_auth::{AuthContext, ROLE_CUSTOMER};

use crate::credentials::{hash_password, verify_password};
use crate::error::ApiError;
use crate::notifications::verification_email;
use crate::session_handlers::{issue_session, SessionUser};
use crate::tokens::{VerificationPurpose, VerificationTokenManager};
use crate::AppState;

#[derive(FromRow)]
pub(crate) struct AccountAuthRow {
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: String,
    pub role: String,
    pub tenant_id: Option<Uuid>,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub status: String,
}

impl AccountAuthRow {
    pub(crate) fn session_user(&self) -> SessionUser {
        SessionUser {
            id: self.id,
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            role: self.role.clone(),
            tenant_id: self.tenant_id,
        }
    }
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let email = request.email.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(ApiError::bad_request("EMPTY_EMAIL", "Email is required"));
    }

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

    let password_hash = hash_password(&request.password)?;
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, full_name, phone, role, email_verified, status)
         VALUES ($1, $2, $3, $4, $5, $6, FALSE, 'active')",
    )
    .bind(user_id)
    .bind(&email)
    .bind(&password_hash)
    .bind(request.full_name.trim())
    .bind(request.phone.as_deref())
    .bind(ROLE_CUSTOMER)
    .execute(&state.db)
    .await?;

    let verification = VerificationTokenManager::new(state.db.clone());
    let token = verification
        .issue(user_id, VerificationPurpose::EmailVerification)
        .await
        .map_err(|err| {
            error!(user_id = %user_id, error = ?err, "Failed to issue verification token");
            ApiError::internal("Unable to issue verification token")
        })?;

    // Verification mail is critical: without it the account is unusable.
    state
        .mailer
        .send(verification_email(
            &state.config.email_from,
            &state.config.frontend_url,
            &email,
            request.full_name.trim(),
            &token,
        ))
        .await
        .map_err(|err| {
            error!(user_id = %user_id, error = ?err, "Failed to send verification email");
            ApiError::internal("Unable to send verification email")
        })?;

    info!(user_id = %user_id, email = %email, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message:
                "User registered successfully. Please check your email to verify your account."
                    .to_string(),
        }),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let email = request.email.trim().to_ascii_lowercase();

    let account = sqlx::query_as::<_, AccountAuthRow>(
        "SELECT id, email, full_name, role, tenant_id, password_hash, email_verified, status
         FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await?;

    // Each failure is a distinct kind so the frontend can render precise
    // feedback. All are 401; the audit trail carries the detail.
    let Some(account) = account else {
        warn!(email = %email, "login failed: unknown email");
        return Err(ApiError::unauthorized(
            "UNKNOWN_EMAIL",
            "No account exists for this email",
        ));
    };

    if !account.email_verified {
        warn!(user_id = %account.id, "login failed: email not verified");
        return Err(ApiError::unauthorized(
            "EMAIL_UNVERIFIED",
            "Email not verified. Please check your inbox.",
        ));
    }

    let Some(password_hash) = account.password_hash.as_deref() else {
        warn!(user_id = %account.id, "login failed: no password set");
        return Err(ApiError::unauthorized(
            "PASSWORD_NOT_SET",
            "This account has no password. Sign in with your linked provider.",
        ));
    };

    if !verify_password(&request.password, password_hash) {
        warn!(user_id = %account.id, "login failed: wrong password");
        return Err(ApiError::unauthorized(
            "WRONG_PASSWORD",
            "Incorrect password",
        ));
    }

    if account.status != "active" {
        warn!(user_id = %account.id, status = %account.status, "login failed: inactive account");
        return Err(ApiError::unauthorized(
            "ACCOUNT_INACTIVE",
            "Account is inactive",
        ));
    }

    touch_last_login(&state, account.id).await;
    info!(user_id = %account.id, "user logged in");

    issue_session(&state, account.session_user()).await
}

#[derive(Deserialize)]
pub struct OauthProfile {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub external_id: String,
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

fn default_provider() -> String {
    "google".to_string()
}

/// Third-party login callback. The provider profile arrives already
/// validated by the OAuth edge. Deterministic and idempotent per
/// (provider, external_id): mapping hit, else link by email, else create a
/// pre-verified customer (the provider attested the address).
pub async fn oauth_callback(
    State(state): State<AppState>,
    Json(profile): Json<OauthProfile>,
) -> Result<Response, ApiError> {
    let email = profile.email.trim().to_ascii_lowercase();

    let linked = sqlx::query_as::<_, AccountAuthRow>(
        "SELECT u.id, u.email, u.full_name, u.role, u.tenant_id, u.password_hash,
                u.email_verified, u.status
         FROM user_oauth_providers p
         JOIN users u ON u.id = p.user_id
         WHERE p.provider = $1 AND p.provider_user_id = $2",
    )
    .bind(&profile.provider)
    .bind(&profile.external_id)
    .fetch_optional(&state.db)
    .await?;

    let account = match linked {
        Some(account) => account,
        None => {
            let by_email = sqlx::query_as::<_, AccountAuthRow>(
                "SELECT id, email, full_name, role, tenant_id, password_hash, email_verified, status
                 FROM users WHERE email = $1",
            )
            .bind(&email)
            .fetch_optional(&state.db)
            .await?;

            let account = match by_email {
                Some(account) => {
                    // The provider vouches for the address; an unverified
                    // local account becomes verified by the link.
                    if !account.email_verified {
                        sqlx::query("UPDATE users SET email_verified = TRUE WHERE id = $1")
                            .bind(account.id)
                            .execute(&state.db)
                            .await?;
                    }
                    account
                }
                None => {
                    let user_id = Uuid::new_v4();
                    sqlx::query(
                        "INSERT INTO users
                             (id, email, full_name, avatar_url, role, email_verified, status)
                         VALUES ($1, $2, $3, $4, $5, TRUE, 'active')",
                    )
                    .bind(user_id)
                    .bind(&email)
                    .bind(profile.full_name.trim())
                    .bind(profile.avatar_url.as_deref())
                    .bind(ROLE_CUSTOMER)
                    .execute(&state.db)
                    .await?;

                    AccountAuthRow {
                        id: user_id,
                        email: Some(email.clone()),
                        full_name: profile.full_name.trim().to_string(),
                        role: ROLE_CUSTOMER.to_string(),
                        tenant_id: None,
                        password_hash: None,
                        email_verified: true,
                        status: "active".to_string(),
                    }
                }
            };

            sqlx::query(
                "INSERT INTO user_oauth_providers (id, user_id, provider, provider_user_id)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (provider, provider_user_id) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(account.id)
            .bind(&profile.provider)
            .bind(&profile.external_id)
            .execute(&state.db)
            .await?;

            account
        }
    };

    if account.status != "active" {
        return Err(ApiError::unauthorized(
            "ACCOUNT_INACTIVE",
            "Account is inactive",
        ));
    }

    touch_last_login(&state, account.id).await;
    info!(user_id = %account.id, provider = %profile.provider, "oauth login");

    issue_session(&state, account.session_user()).await
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<SessionUser>, ApiError> {
    let account = sqlx::query_as::<_, AccountAuthRow>(
        "SELECT id, email, full_name, role, tenant_id, password_hash, email_verified, status
         FROM users WHERE id = $1",
    )
    .bind(auth.claims.subject)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("USER_NOT_FOUND", "User not found"))?;

    Ok(Json(account.session_user()))
}

async fn touch_last_login(state: &AppState, user_id: Uuid) {
    if let Err(err) = sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(user_id)
        .execute(&state.db)
        .await
    {
        warn!(user_id = %user_id, error = ?err, "Failed to stamp last login");
    }
}
