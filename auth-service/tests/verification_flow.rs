mod support;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use auth_service::error::ApiError;
use auth_service::tokens::RefreshTokenStore;
use auth_service::user_handlers::{login, signup, LoginRequest, SignupRequest};
use auth_service::verification_handlers::{
    forgot_password, resend_email, reset_password, verify_email, ForgotPasswordRequest,
    ResendEmailRequest, ResetPasswordRequest, VerifyEmailRequest,
};
use auth_service::AppState;
use axum::body::to_bytes;
use axum::response::IntoResponse;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::{from_slice, Value};
use sqlx::PgPool;
use support::{seed_user, test_app_state, RecordingMailer, TestDatabase};
use uuid::Uuid;

struct TestContext {
    state: AppState,
    pool: PgPool,
    db: TestDatabase,
    mailer: Arc<RecordingMailer>,
}

impl TestContext {
    async fn bootstrap() -> Result<Option<Self>> {
        let Some(db) = TestDatabase::setup().await? else {
            return Ok(None);
        };
        let pool = db.pool_clone();
        let mailer = Arc::new(RecordingMailer::default());
        let state = test_app_state(pool.clone(), mailer.clone());
        Ok(Some(Self {
            state,
            pool,
            db,
            mailer,
        }))
    }

    async fn teardown(self) -> Result<()> {
        self.db.teardown().await?;
        Ok(())
    }
}

async fn error_message(err: ApiError) -> Result<String> {
    let response = err.into_response();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let payload: Value = from_slice(&bytes)?;
    payload["message"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("error body missing message"))
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(feature = "integration"), ignore = "enable with --features integration (requires Postgres: embedded or external)")]
async fn signup_verify_then_login() -> Result<()> {
    let Some(ctx) = TestContext::bootstrap().await? else {
        return Ok(());
    };

    let email = format!("new-{}@example.com", Uuid::new_v4());
    let (status, _) = signup(
        State(ctx.state.clone()),
        Json(SignupRequest {
            email: email.clone(),
            password: "S3cure-enough!".to_string(),
            full_name: "New Customer".to_string(),
            phone: None,
        }),
    )
    .await
    .map_err(|err| anyhow!("signup failed: {}", err.code()))?;
    assert_eq!(status, StatusCode::CREATED);

    assert_eq!(ctx.mailer.sent_count(), 1);
    assert_eq!(ctx.mailer.last_recipient().as_deref(), Some(email.as_str()));
    let token = ctx.mailer.last_token().ok_or_else(|| anyhow!("no token in email"))?;

    // Unverified accounts cannot sign in yet.
    let err = login(
        State(ctx.state.clone()),
        Json(LoginRequest {
            email: email.clone(),
            password: "S3cure-enough!".to_string(),
        }),
    )
    .await
    .expect_err("unverified login should fail");
    assert_eq!(err.code(), "EMAIL_UNVERIFIED");

    // The token is bound to the address it was mailed to.
    let err = verify_email(
        State(ctx.state.clone()),
        Json(VerifyEmailRequest {
            email: "somebody-else@example.com".to_string(),
            token: token.clone(),
        }),
    )
    .await
    .expect_err("mismatched email should fail");
    assert_eq!(err.code(), "TOKEN_EMAIL_MISMATCH");

    verify_email(
        State(ctx.state.clone()),
        Json(VerifyEmailRequest {
            email: email.clone(),
            token: token.clone(),
        }),
    )
    .await
    .map_err(|err| anyhow!("verify failed: {}", err.code()))?;

    let verified: bool =
        sqlx::query_scalar("SELECT email_verified FROM users WHERE email = $1")
            .bind(&email)
            .fetch_one(&ctx.pool)
            .await?;
    assert!(verified);

    // Single-use: a second attempt reports the token as spent.
    let err = verify_email(
        State(ctx.state.clone()),
        Json(VerifyEmailRequest {
            email: email.clone(),
            token,
        }),
    )
    .await
    .expect_err("replayed token should fail");
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(err).await?, "Token has already been used");

    let response = login(
        State(ctx.state.clone()),
        Json(LoginRequest {
            email,
            password: "S3cure-enough!".to_string(),
        }),
    )
    .await
    .map_err(|err| anyhow!("login failed: {}", err.code()))?;
    assert_eq!(response.status(), StatusCode::OK);

    ctx.teardown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(feature = "integration"), ignore = "enable with --features integration (requires Postgres: embedded or external)")]
async fn duplicate_signup_conflicts() -> Result<()> {
    let Some(ctx) = TestContext::bootstrap().await? else {
        return Ok(());
    };
    let user = seed_user(&ctx.pool, "customer", None, true).await?;

    let err = signup(
        State(ctx.state.clone()),
        Json(SignupRequest {
            email: user.email.clone(),
            password: "Another-pass!".to_string(),
            full_name: "Impostor".to_string(),
            phone: None,
        }),
    )
    .await
    .expect_err("duplicate email should conflict");
    assert_eq!(err.status(), StatusCode::CONFLICT);
    assert_eq!(err.code(), "EMAIL_EXISTS");
    // No mail goes out for a rejected signup.
    assert_eq!(ctx.mailer.sent_count(), 0);

    ctx.teardown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(feature = "integration"), ignore = "enable with --features integration (requires Postgres: embedded or external)")]
async fn forgot_password_does_not_reveal_accounts() -> Result<()> {
    let Some(ctx) = TestContext::bootstrap().await? else {
        return Ok(());
    };
    let user = seed_user(&ctx.pool, "customer", None, true).await?;

    let unknown = forgot_password(
        State(ctx.state.clone()),
        Json(ForgotPasswordRequest {
            email: "ghost@example.com".to_string(),
        }),
    )
    .await
    .map_err(|err| anyhow!("forgot failed: {}", err.code()))?;
    assert_eq!(ctx.mailer.sent_count(), 0);

    let known = forgot_password(
        State(ctx.state.clone()),
        Json(ForgotPasswordRequest {
            email: user.email.clone(),
        }),
    )
    .await
    .map_err(|err| anyhow!("forgot failed: {}", err.code()))?;
    assert_eq!(ctx.mailer.sent_count(), 1);

    // Identical body either way.
    assert_eq!(unknown.0.message, known.0.message);

    ctx.teardown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(feature = "integration"), ignore = "enable with --features integration (requires Postgres: embedded or external)")]
async fn password_reset_resend_does_not_reveal_accounts() -> Result<()> {
    let Some(ctx) = TestContext::bootstrap().await? else {
        return Ok(());
    };
    let user = seed_user(&ctx.pool, "customer", None, true).await?;

    // The resend endpoint must hold the forgot-password line: an unknown
    // address gets the same success body, never a 404.
    let unknown = resend_email(
        State(ctx.state.clone()),
        Json(ResendEmailRequest {
            email: "ghost@example.com".to_string(),
            purpose: "password_reset".to_string(),
        }),
    )
    .await
    .map_err(|err| anyhow!("resend should not fail: {}", err.code()))?;
    assert_eq!(ctx.mailer.sent_count(), 0);

    let known = resend_email(
        State(ctx.state.clone()),
        Json(ResendEmailRequest {
            email: user.email.clone(),
            purpose: "password_reset".to_string(),
        }),
    )
    .await
    .map_err(|err| anyhow!("resend failed: {}", err.code()))?;
    assert_eq!(ctx.mailer.sent_count(), 1);
    assert_eq!(unknown.0.message, known.0.message);

    // And the body matches forgot-password exactly.
    let forgot = forgot_password(
        State(ctx.state.clone()),
        Json(ForgotPasswordRequest {
            email: "ghost@example.com".to_string(),
        }),
    )
    .await
    .map_err(|err| anyhow!("forgot failed: {}", err.code()))?;
    assert_eq!(known.0.message, forgot.0.message);

    // The resent token is a working reset token.
    let token = ctx.mailer.last_token().ok_or_else(|| anyhow!("no reset token"))?;
    reset_password(
        State(ctx.state.clone()),
        Json(ResetPasswordRequest {
            token,
            new_password: "Resent-pass5".to_string(),
        }),
    )
    .await
    .map_err(|err| anyhow!("reset failed: {}", err.code()))?;

    ctx.teardown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(feature = "integration"), ignore = "enable with --features integration (requires Postgres: embedded or external)")]
async fn reset_password_rotates_credentials_and_revokes_sessions() -> Result<()> {
    let Some(ctx) = TestContext::bootstrap().await? else {
        return Ok(());
    };
    let user = seed_user(&ctx.pool, "customer", None, true).await?;

    // Open a session that the reset must revoke.
    let store = RefreshTokenStore::new(ctx.pool.clone(), 7);
    store.issue(user.user_id).await?;

    forgot_password(
        State(ctx.state.clone()),
        Json(ForgotPasswordRequest {
            email: user.email.clone(),
        }),
    )
    .await
    .map_err(|err| anyhow!("forgot failed: {}", err.code()))?;
    let token = ctx.mailer.last_token().ok_or_else(|| anyhow!("no reset token"))?;

    reset_password(
        State(ctx.state.clone()),
        Json(ResetPasswordRequest {
            token: token.clone(),
            new_password: "Brand-new-pass1".to_string(),
        }),
    )
    .await
    .map_err(|err| anyhow!("reset failed: {}", err.code()))?;

    let sessions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM auth_refresh_tokens WHERE user_id = $1")
            .bind(user.user_id)
            .fetch_one(&ctx.pool)
            .await?;
    assert_eq!(sessions, 0);

    let err = login(
        State(ctx.state.clone()),
        Json(LoginRequest {
            email: user.email.clone(),
            password: user.password.clone(),
        }),
    )
    .await
    .expect_err("old password should no longer work");
    assert_eq!(err.code(), "WRONG_PASSWORD");

    let response = login(
        State(ctx.state.clone()),
        Json(LoginRequest {
            email: user.email.clone(),
            password: "Brand-new-pass1".to_string(),
        }),
    )
    .await
    .map_err(|err| anyhow!("login failed: {}", err.code()))?;
    assert_eq!(response.status(), StatusCode::OK);

    // The reset token is spent.
    let err = reset_password(
        State(ctx.state.clone()),
        Json(ResetPasswordRequest {
            token,
            new_password: "Another-pass2".to_string(),
        }),
    )
    .await
    .expect_err("replayed reset token should fail");
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);

    ctx.teardown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(feature = "integration"), ignore = "enable with --features integration (requires Postgres: embedded or external)")]
async fn stale_reset_tokens_are_rejected_distinctly() -> Result<()> {
    let Some(ctx) = TestContext::bootstrap().await? else {
        return Ok(());
    };
    let user = seed_user(&ctx.pool, "customer", None, true).await?;

    forgot_password(
        State(ctx.state.clone()),
        Json(ForgotPasswordRequest {
            email: user.email.clone(),
        }),
    )
    .await
    .map_err(|err| anyhow!("forgot failed: {}", err.code()))?;
    let first = ctx.mailer.last_token().ok_or_else(|| anyhow!("no token"))?;

    // A second request supersedes the first token.
    forgot_password(
        State(ctx.state.clone()),
        Json(ForgotPasswordRequest {
            email: user.email.clone(),
        }),
    )
    .await
    .map_err(|err| anyhow!("forgot failed: {}", err.code()))?;
    let second = ctx.mailer.last_token().ok_or_else(|| anyhow!("no token"))?;
    assert_ne!(first, second);

    let err = reset_password(
        State(ctx.state.clone()),
        Json(ResetPasswordRequest {
            token: first,
            new_password: "Whatever-pass3".to_string(),
        }),
    )
    .await
    .expect_err("superseded token should fail");
    assert_eq!(error_message(err).await?, "Token has already been used");

    // Force-expire the live token.
    sqlx::query(
        "UPDATE user_verification_tokens SET expires_at = NOW() - INTERVAL '1 hour'
         WHERE user_id = $1 AND used_at IS NULL",
    )
    .bind(user.user_id)
    .execute(&ctx.pool)
    .await?;

    let err = reset_password(
        State(ctx.state.clone()),
        Json(ResetPasswordRequest {
            token: second,
            new_password: "Whatever-pass3".to_string(),
        }),
    )
    .await
    .expect_err("expired token should fail");
    assert_eq!(error_message(err).await?, "Token has expired");

    let err = reset_password(
        State(ctx.state.clone()),
        Json(ResetPasswordRequest {
            token: "deadbeef".repeat(8),
            new_password: "Whatever-pass3".to_string(),
        }),
    )
    .await
    .expect_err("unknown token should fail");
    assert_eq!(error_message(err).await?, "Invalid token");

    ctx.teardown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(feature = "integration"), ignore = "enable with --features integration (requires Postgres: embedded or external)")]
async fn resend_email_is_explicit_about_state() -> Result<()> {
    let Some(ctx) = TestContext::bootstrap().await? else {
        return Ok(());
    };
    let verified = seed_user(&ctx.pool, "customer", None, true).await?;
    let unverified = seed_user(&ctx.pool, "customer", None, false).await?;

    let err = resend_email(
        State(ctx.state.clone()),
        Json(ResendEmailRequest {
            email: verified.email.clone(),
            purpose: "email_verification".to_string(),
        }),
    )
    .await
    .expect_err("already-verified resend should conflict");
    assert_eq!(err.status(), StatusCode::CONFLICT);
    assert_eq!(err.code(), "ALREADY_VERIFIED");

    let err = resend_email(
        State(ctx.state.clone()),
        Json(ResendEmailRequest {
            email: "ghost@example.com".to_string(),
            purpose: "email_verification".to_string(),
        }),
    )
    .await
    .expect_err("unknown address should 404");
    assert_eq!(err.status(), StatusCode::NOT_FOUND);

    let err = resend_email(
        State(ctx.state.clone()),
        Json(ResendEmailRequest {
            email: unverified.email.clone(),
            purpose: "carrier_pigeon".to_string(),
        }),
    )
    .await
    .expect_err("unknown type should 400");
    assert_eq!(err.code(), "UNSUPPORTED_EMAIL_TYPE");

    resend_email(
        State(ctx.state.clone()),
        Json(ResendEmailRequest {
            email: unverified.email.clone(),
            purpose: "email_verification".to_string(),
        }),
    )
    .await
    .map_err(|err| anyhow!("resend failed: {}", err.code()))?;
    assert_eq!(ctx.mailer.sent_count(), 1);

    ctx.teardown().await?;
    Ok(())
}
