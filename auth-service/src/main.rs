use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE},
    HeaderName, HeaderValue, Method,
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

use auth_service::app::build_router;
use auth_service::config::load_app_config;
use auth_service::notifications::GatewayMailer;
use auth_service::AppState;
use common_auth::{TokenCodec, TokenConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Arc::new(load_app_config()?);

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;

    let codec = Arc::new(TokenCodec::new(
        TokenConfig::new(&config.jwt_secret)
            .with_access_ttl_minutes(config.access_ttl_minutes)
            .with_qr_ttl_days(config.qr_ttl_days),
    ));

    let mailer = Arc::new(GatewayMailer::new(
        reqwest::Client::new(),
        config.email_gateway_url.clone(),
        config.email_gateway_bearer.clone(),
        config.email_from.clone(),
    ));

    let state = AppState {
        db,
        codec,
        config,
        mailer,
    };

    let origins: Vec<HeaderValue> = env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string())
        .split(',')
        .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            AUTHORIZATION,
            CONTENT_TYPE,
            COOKIE,
            HeaderName::from_static("x-tenant-id"),
            HeaderName::from_static("x-qr-token"),
        ])
        .allow_credentials(true);

    let app = build_router(state).layer(cors);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8084);
    let ip: std::net::IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));

    info!(%addr, "starting auth-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
