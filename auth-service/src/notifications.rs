use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Outbound email delivery. Implemented over an HTTP gateway in production
/// and by a no-op double in tests.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<()>;
}

/// Posts emails as JSON to a relay gateway.
pub struct GatewayMailer {
    client: Client,
    url: Option<String>,
    bearer: Option<String>,
    from: String,
}

impl GatewayMailer {
    pub fn new(client: Client, url: Option<String>, bearer: Option<String>, from: String) -> Self {
        if url.is_none() {
            warn!("EMAIL_GATEWAY_URL not configured; outbound email will fail");
        }
        Self {
            client,
            url,
            bearer,
            from,
        }
    }

    pub fn from_address(&self) -> &str {
        &self.from
    }
}

#[async_trait]
impl Mailer for GatewayMailer {
    async fn send(&self, email: OutboundEmail) -> Result<()> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("Email gateway not configured"))?;

        let mut request = self.client.post(url).json(&email);
        if let Some(token) = self.bearer.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Email gateway returned status {}",
                response.status()
            ));
        }

        info!(to = %email.to, subject = %email.subject, "email dispatched");
        Ok(())
    }
}

pub fn verification_email(
    from: &str,
    frontend_url: &str,
    to: &str,
    full_name: &str,
    token: &str,
) -> OutboundEmail {
    let link = format!(
        "{frontend_url}/verify-email?token={token}&email={}",
        urlencoding::encode(to)
    );
    OutboundEmail {
        from: from.to_string(),
        to: to.to_string(),
        subject: "Verify your email address".to_string(),
        html: format!(
            "<p>Hi {full_name},</p>\
             <p>Confirm your email address to activate your account:</p>\
             <p><a href=\"{link}\">Verify email</a></p>"
        ),
    }
}

pub fn password_reset_email(
    from: &str,
    frontend_url: &str,
    to: &str,
    full_name: &str,
    token: &str,
) -> OutboundEmail {
    let link = format!("{frontend_url}/auth/reset-password?token={token}");
    OutboundEmail {
        from: from.to_string(),
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        html: format!(
            "<p>Hi {full_name},</p>\
             <p>A password reset was requested for your account. The link \
             expires in one hour:</p>\
             <p><a href=\"{link}\">Reset password</a></p>\
             <p>If you did not request this, you can ignore this email.</p>"
        ),
    }
}

pub fn welcome_email(from: &str, to: &str, full_name: &str) -> OutboundEmail {
    OutboundEmail {
        from: from.to_string(),
        to: to.to_string(),
        subject: "Welcome aboard".to_string(),
        html: format!("<p>Hi {full_name},</p><p>Your email is verified. Enjoy!</p>"),
    }
}

/// Swallows outbound email; used by tests and local bring-up.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, email: OutboundEmail) -> Result<()> {
        info!(to = %email.to, subject = %email.subject, "email suppressed (noop mailer)");
        Ok(())
    }
}
