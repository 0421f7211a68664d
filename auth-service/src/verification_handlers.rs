use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::credentials::hash_password;
use crate::error::ApiError;
use crate::notifications::{password_reset_email, verification_email, welcome_email};
use crate::tokens::{
    RefreshTokenStore, TokenAccount, VerificationOutcome, VerificationPurpose,
    VerificationTokenManager,
};
use crate::user_handlers::MessageResponse;
use crate::AppState;

#[derive(Deserialize)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub token: String,
}

/// Confirms an email address. The token is only stamped used in the same
/// transaction that flips the verified bit, so a mid-flight failure leaves
/// the token replayable.
pub async fn verify_email(
    State(state): State<AppState>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = request.email.trim().to_ascii_lowercase();
    let manager = VerificationTokenManager::new(state.db.clone());

    let (token_id, account) =
        expect_valid(&request.token, VerificationPurpose::EmailVerification, &manager).await?;

    if account.email.as_deref() != Some(email.as_str()) {
        return Err(ApiError::bad_request(
            "TOKEN_EMAIL_MISMATCH",
            "Token does not belong to this email address",
        ));
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE users SET email_verified = TRUE WHERE id = $1")
        .bind(account.user_id)
        .execute(&mut tx)
        .await?;
    VerificationTokenManager::mark_used(&mut tx, token_id)
        .await
        .map_err(|err| {
            error!(error = ?err, "Failed to mark verification token used");
            ApiError::internal("Unable to verify email")
        })?;
    tx.commit().await?;

    info!(user_id = %account.user_id, "email verified");

    // Courtesy mail; verification already succeeded.
    if let Err(err) = state
        .mailer
        .send(welcome_email(&state.config.email_from, &email, &account.full_name))
        .await
    {
        warn!(user_id = %account.user_id, error = ?err, "Failed to send welcome email");
    }

    Ok(Json(MessageResponse {
        message: "Email verified successfully".to_string(),
    }))
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// The uniform answer for every password-reset request, known address or
/// not, so neither endpoint can be used to probe for registered accounts.
const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for this email, a password reset link has been sent.";

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = request.email.trim().to_ascii_lowercase();

    if let Some(account) = account_by_email(&state, &email).await? {
        send_password_reset(&state, &email, &account).await?;
    }

    Ok(Json(MessageResponse {
        message: RESET_REQUESTED_MESSAGE.to_string(),
    }))
}

async fn account_by_email(state: &AppState, email: &str) -> Result<Option<TokenAccount>, ApiError> {
    let account = sqlx::query_as::<_, TokenAccount>(
        "SELECT id AS user_id, email, full_name, role, tenant_id, email_verified, status
         FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(&state.db)
    .await?;
    Ok(account)
}

async fn send_password_reset(
    state: &AppState,
    email: &str,
    account: &TokenAccount,
) -> Result<(), ApiError> {
    let manager = VerificationTokenManager::new(state.db.clone());
    let token = manager
        .issue(account.user_id, VerificationPurpose::PasswordReset)
        .await
        .map_err(|err| {
            error!(user_id = %account.user_id, error = ?err, "Failed to issue reset token");
            ApiError::internal("Unable to process request")
        })?;

    state
        .mailer
        .send(password_reset_email(
            &state.config.email_from,
            &state.config.frontend_url,
            email,
            &account.full_name,
            &token,
        ))
        .await
        .map_err(|err| {
            error!(user_id = %account.user_id, error = ?err, "Failed to send reset email");
            ApiError::internal("Unable to send email")
        })?;

    info!(user_id = %account.user_id, "password reset email sent");
    Ok(())
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let manager = VerificationTokenManager::new(state.db.clone());
    let (token_id, account) =
        expect_valid(&request.token, VerificationPurpose::PasswordReset, &manager).await?;

    let password_hash = hash_password(&request.new_password)?;

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
        .bind(&password_hash)
        .bind(account.user_id)
        .execute(&mut tx)
        .await?;
    VerificationTokenManager::mark_used(&mut tx, token_id)
        .await
        .map_err(|err| {
            error!(error = ?err, "Failed to mark reset token used");
            ApiError::internal("Unable to reset password")
        })?;
    tx.commit().await?;

    // A credential change invalidates every open session.
    let store = RefreshTokenStore::new(state.db.clone(), state.config.refresh_ttl_days);
    match store.revoke_all(account.user_id).await {
        Ok(revoked) => {
            info!(user_id = %account.user_id, revoked, "password reset, sessions revoked")
        }
        Err(err) => {
            warn!(user_id = %account.user_id, error = ?err, "Failed to revoke refresh tokens")
        }
    }

    Ok(Json(MessageResponse {
        message: "Password reset successfully".to_string(),
    }))
}

#[derive(Deserialize)]
pub struct ResendEmailRequest {
    pub email: String,
    #[serde(rename = "type")]
    pub purpose: String,
}

/// Re-issues a verification or reset token on request. Verification resends
/// back a button shown only to signed-up users, so they are explicit about
/// unknown addresses; reset resends keep the forgot-password contract and
/// never say whether the address is registered.
pub async fn resend_email(
    State(state): State<AppState>,
    Json(request): Json<ResendEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let purpose = VerificationPurpose::parse(&request.purpose).ok_or_else(|| {
        ApiError::bad_request("UNSUPPORTED_EMAIL_TYPE", "Unsupported email type")
    })?;

    let email = request.email.trim().to_ascii_lowercase();
    let account = account_by_email(&state, &email).await?;

    if purpose == VerificationPurpose::PasswordReset {
        if let Some(account) = account {
            send_password_reset(&state, &email, &account).await?;
        }
        return Ok(Json(MessageResponse {
            message: RESET_REQUESTED_MESSAGE.to_string(),
        }));
    }

    let account =
        account.ok_or_else(|| ApiError::not_found("USER_NOT_FOUND", "User not found"))?;

    if account.email_verified {
        return Err(ApiError::conflict(
            "ALREADY_VERIFIED",
            "Email is already verified",
        ));
    }

    let manager = VerificationTokenManager::new(state.db.clone());
    let token = manager
        .issue(account.user_id, VerificationPurpose::EmailVerification)
        .await
        .map_err(|err| {
            error!(user_id = %account.user_id, error = ?err, "Failed to issue token");
            ApiError::internal("Unable to issue token")
        })?;

    state
        .mailer
        .send(verification_email(
            &state.config.email_from,
            &state.config.frontend_url,
            &email,
            &account.full_name,
            &token,
        ))
        .await
        .map_err(|err| {
            error!(user_id = %account.user_id, error = ?err, "Failed to send email");
            ApiError::internal("Unable to send email")
        })?;

    Ok(Json(MessageResponse {
        message: "Email sent successfully".to_string(),
    }))
}

async fn expect_valid(
    token: &str,
    purpose: VerificationPurpose,
    manager: &VerificationTokenManager,
) -> Result<(uuid::Uuid, TokenAccount), ApiError> {
    let outcome = manager.validate(token, purpose).await.map_err(|err| {
        error!(error = ?err, "Failed to validate verification token");
        ApiError::internal("Unable to validate token")
    })?;

    match outcome {
        VerificationOutcome::Valid { token_id, account } => Ok((token_id, account)),
        rejected => Err(ApiError::bad_request(
            "VERIFICATION_TOKEN",
            rejected
                .rejection_message()
                .unwrap_or("Invalid token"),
        )),
    }
}
