use anyhow::{anyhow, Context, Result};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSameSite {
    Lax,
    Strict,
    None,
}

impl CookieSameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieSameSite::Lax => "Lax",
            CookieSameSite::Strict => "Strict",
            CookieSameSite::None => "None",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HS256 secret shared by access and QR tokens.
    pub jwt_secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub qr_ttl_days: i64,

    pub refresh_cookie_name: String,
    pub refresh_cookie_domain: Option<String>,
    pub refresh_cookie_secure: bool,
    pub refresh_cookie_same_site: CookieSameSite,

    /// Customer-facing ordering frontend, embedded into QR ordering URLs.
    pub order_url: String,
    /// External QR image rendering API (URL only; no local rendering).
    pub qr_image_api_url: String,
    /// Frontend base for verification / reset links in emails.
    pub frontend_url: String,

    pub email_gateway_url: Option<String>,
    pub email_gateway_bearer: Option<String>,
    pub email_from: String,
}

pub fn load_app_config() -> Result<AppConfig> {
    // Missing signing secret is programmer/deployment error, not a request
    // failure: refuse to start.
    let jwt_secret = env::var("AUTH_JWT_SECRET")
        .ok()
        .and_then(|value| normalize_optional(&value))
        .ok_or_else(|| anyhow!("AUTH_JWT_SECRET must be set"))?;

    let access_ttl_minutes = int_from_env("AUTH_ACCESS_TTL_MINUTES")
        .context("Failed to parse AUTH_ACCESS_TTL_MINUTES")?
        .unwrap_or(5);
    let refresh_ttl_days = int_from_env("AUTH_REFRESH_TTL_DAYS")
        .context("Failed to parse AUTH_REFRESH_TTL_DAYS")?
        .unwrap_or(7);
    let qr_ttl_days = int_from_env("AUTH_QR_TTL_DAYS")
        .context("Failed to parse AUTH_QR_TTL_DAYS")?
        .unwrap_or(365);

    let refresh_cookie_name =
        env::var("AUTH_REFRESH_COOKIE_NAME").unwrap_or_else(|_| "refresh_token".to_string());
    let refresh_cookie_domain = env::var("AUTH_REFRESH_COOKIE_DOMAIN")
        .ok()
        .and_then(|value| normalize_optional(&value));
    // Secure unless a plain-HTTP local deployment opts out.
    let refresh_cookie_secure = bool_from_env("AUTH_REFRESH_COOKIE_SECURE").unwrap_or(true);
    let refresh_cookie_same_site = env::var("AUTH_REFRESH_COOKIE_SAMESITE")
        .ok()
        .map(|value| parse_same_site(&value))
        .transpose()
        .context("Failed to parse AUTH_REFRESH_COOKIE_SAMESITE")?
        .unwrap_or(CookieSameSite::Lax);

    let order_url =
        env::var("APP_ORDER_URL").unwrap_or_else(|_| "http://localhost:3000/order".to_string());
    let qr_image_api_url = env::var("QR_IMAGE_API_URL")
        .unwrap_or_else(|_| "https://api.qrserver.com/v1/create-qr-code/".to_string());
    let frontend_url =
        env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let email_gateway_url = env::var("EMAIL_GATEWAY_URL")
        .ok()
        .and_then(|value| normalize_optional(&value));
    let email_gateway_bearer = env::var("EMAIL_GATEWAY_BEARER")
        .ok()
        .and_then(|value| normalize_optional(&value));
    let email_from =
        env::var("EMAIL_FROM").unwrap_or_else(|_| "noreply@example.com".to_string());

    Ok(AppConfig {
        jwt_secret,
        access_ttl_minutes,
        refresh_ttl_days,
        qr_ttl_days,
        refresh_cookie_name,
        refresh_cookie_domain,
        refresh_cookie_secure,
        refresh_cookie_same_site,
        order_url,
        qr_image_api_url,
        frontend_url,
        email_gateway_url,
        email_gateway_bearer,
        email_from,
    })
}

fn bool_from_env(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn int_from_env(key: &str) -> Result<Option<i64>> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed = trimmed
                .parse::<i64>()
                .map_err(|err| anyhow!("Invalid integer '{trimmed}' for {key}: {err}"))?;
            Ok(Some(parsed))
        }
        Err(_) => Ok(None),
    }
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_same_site(value: &str) -> Result<CookieSameSite> {
    match value.trim().to_ascii_lowercase().as_str() {
        "lax" => Ok(CookieSameSite::Lax),
        "strict" => Ok(CookieSameSite::Strict),
        "none" => Ok(CookieSameSite::None),
        other => Err(anyhow!(
            "Unsupported cookie same-site policy '{other}'. Use Lax, Strict, or None."
        )),
    }
}
