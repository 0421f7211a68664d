use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use common_auth::AccessSubject;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::tokens::RefreshTokenStore;
use crate::user_handlers::MessageResponse;
use crate::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: String,
    pub role: String,
    pub tenant_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: SessionUser,
}

/// Signs a fresh access token, persists a new refresh token, and returns
/// both: the access token in the body, the refresh token as an HttpOnly
/// cookie the browser replays on /auth/refresh.
pub async fn issue_session(state: &AppState, user: SessionUser) -> Result<Response, ApiError> {
    let subject = AccessSubject {
        user_id: user.id,
        email: user.email.clone(),
        role: user.role.clone(),
        tenant_id: user.tenant_id,
    };
    let (access_token, _expires_at) = state.codec.sign_access(&subject)?;

    let store = RefreshTokenStore::new(state.db.clone(), state.config.refresh_ttl_days);
    let (refresh_token, _) = store.issue(user.id).await.map_err(|err| {
        tracing::error!(user_id = %user.id, error = ?err, "Failed to issue refresh token");
        ApiError::internal("Unable to issue session")
    })?;

    let body = AuthResponse {
        access_token,
        token_type: "Bearer",
        expires_in: state.codec.access_ttl().num_seconds(),
        user,
    };

    let cookie = build_refresh_cookie(
        &state.config,
        &refresh_token,
        state.config.refresh_ttl_days * 24 * 60 * 60,
    );
    respond_with_cookie(Json(body).into_response(), &cookie)
}

/// Exchanges the refresh cookie for a new session. The presented token is
/// consumed whatever happens; a stale or unknown token clears the cookie so
/// the browser stops replaying it.
pub async fn refresh_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let store = RefreshTokenStore::new(state.db.clone(), state.config.refresh_ttl_days);

    let Some(token) = read_refresh_cookie(&headers, &state.config.refresh_cookie_name) else {
        return Err(ApiError::unauthorized(
            "REFRESH_MISSING",
            "No refresh token provided",
        ));
    };

    let account = store.consume(&token).await.map_err(|err| {
        tracing::error!(error = ?err, "Failed to consume refresh token");
        ApiError::internal("Unable to refresh session")
    })?;

    let Some(account) = account else {
        warn!("refresh rejected: unknown or expired token");
        let clear = clear_refresh_cookie(&state.config);
        let response = ApiError::unauthorized("REFRESH_INVALID", "Invalid refresh token")
            .into_response();
        return respond_with_cookie(response, &clear);
    };

    if account.status != "active" {
        let clear = clear_refresh_cookie(&state.config);
        let response =
            ApiError::unauthorized("ACCOUNT_INACTIVE", "Account is inactive").into_response();
        return respond_with_cookie(response, &clear);
    }

    info!(user_id = %account.user_id, "session refreshed");

    issue_session(
        &state,
        SessionUser {
            id: account.user_id,
            email: account.email,
            full_name: account.full_name,
            role: account.role,
            tenant_id: account.tenant_id,
        },
    )
    .await
}

/// Revokes the presented refresh token only; other devices stay signed in.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(token) = read_refresh_cookie(&headers, &state.config.refresh_cookie_name) {
        let store = RefreshTokenStore::new(state.db.clone(), state.config.refresh_ttl_days);
        if let Err(err) = store.delete(&token).await {
            warn!(error = ?err, "Failed to delete refresh token on logout");
        }
    }

    let clear = clear_refresh_cookie(&state.config);
    let response = Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    })
    .into_response();
    respond_with_cookie(response, &clear)
}

pub(crate) fn respond_with_cookie(
    mut response: Response,
    cookie: &str,
) -> Result<Response, ApiError> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|_| ApiError::internal("Invalid cookie attributes"))?;
    response.headers_mut().append(header::SET_COOKIE, value);
    Ok(response)
}

pub(crate) fn build_refresh_cookie(config: &AppConfig, value: &str, max_age_seconds: i64) -> String {
    let mut cookie = format!(
        "{}={value}; Path=/; HttpOnly; SameSite={}; Max-Age={max_age_seconds}",
        config.refresh_cookie_name,
        config.refresh_cookie_same_site.as_str(),
    );
    if let Some(domain) = config.refresh_cookie_domain.as_deref() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if config.refresh_cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub(crate) fn clear_refresh_cookie(config: &AppConfig) -> String {
    build_refresh_cookie(config, "", 0)
}

/// Pulls the refresh token out of the Cookie header, if present.
pub(crate) fn read_refresh_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    for header_value in headers.get_all(header::COOKIE) {
        let Ok(raw) = header_value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let name = parts.next()?.trim();
            let value = parts.next().unwrap_or("").trim();
            if name == cookie_name && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
