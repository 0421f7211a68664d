use std::sync::Arc;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use common_auth::TokenCodec;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::notifications::Mailer;
use crate::{
    qr_guard, session_handlers, staff_handlers, table_handlers, user_handlers,
    verification_handlers,
};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub codec: Arc<TokenCodec>,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
}

impl FromRef<AppState> for Arc<TokenCodec> {
    fn from_ref(state: &AppState) -> Self {
        state.codec.clone()
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

async fn health() -> &'static str {
    "ok"
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/auth/signup", post(user_handlers::signup))
        .route("/auth/login", post(user_handlers::login))
        .route("/auth/oauth/callback", post(user_handlers::oauth_callback))
        .route("/auth/me", get(user_handlers::me))
        .route("/auth/refresh", post(session_handlers::refresh_session))
        .route("/auth/logout", post(session_handlers::logout))
        .route(
            "/auth/verify-email",
            post(verification_handlers::verify_email),
        )
        .route(
            "/auth/forgot-password",
            post(verification_handlers::forgot_password),
        )
        .route(
            "/auth/reset-password",
            post(verification_handlers::reset_password),
        )
        .route(
            "/auth/resend-email",
            post(verification_handlers::resend_email),
        )
        .route("/staff", post(staff_handlers::create_staff))
        .route(
            "/staff/:staff_id/resend-invite",
            post(staff_handlers::resend_invite),
        )
        .route(
            "/tables/:table_id/qr",
            post(table_handlers::generate_table_qr).get(table_handlers::get_table_qr),
        )
        .route("/tables/qr/verify", post(table_handlers::verify_table_token))
        .route("/guest/table-context", get(qr_guard::guest_table_context))
        .with_state(state)
}
