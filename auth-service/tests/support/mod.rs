use std::{env, path::PathBuf, sync::Arc, sync::Mutex, time::Duration};

use anyhow::{Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use async_trait::async_trait;
use auth_service::config::{AppConfig, CookieSameSite};
use auth_service::notifications::{Mailer, OutboundEmail};
use auth_service::AppState;
use common_auth::{AccessSubject, TokenCodec, TokenConfig};
use dirs::cache_dir;
use pg_embed::pg_enums::PgAuthMethod;
use pg_embed::pg_fetch::{PgFetchSettings, PG_V13};
use pg_embed::postgres::{PgEmbed, PgSettings};
use portpicker::pick_unused_port;
use rand_core::OsRng;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

pub struct TestDatabase {
    pool: PgPool,
    embedded: Option<EmbeddedPg>,
}

impl TestDatabase {
    pub async fn setup() -> Result<Option<Self>> {
        if env::var("AUTH_TEST_DATABASE_URL").is_err() && !env_flag_enabled("AUTH_TEST_USE_EMBED") {
            eprintln!(
                "Skipping auth-service integration tests: set AUTH_TEST_DATABASE_URL or AUTH_TEST_USE_EMBED=1 to run them.",
            );
            return Ok(None);
        }

        let mut embedded = None;
        let database_url = if let Ok(url) = env::var("AUTH_TEST_DATABASE_URL") {
            url
        } else {
            if env_flag_enabled("AUTH_TEST_EMBED_CLEAR_CACHE") {
                if let Some(cache_dir) = cache_dir() {
                    let _ = std::fs::remove_dir_all(cache_dir.join("pg-embed"));
                }
            }

            let temp = tempdir()?;
            let port = pick_unused_port()
                .context("failed to find available port for embedded Postgres")?;

            let mut fetch_settings = PgFetchSettings::default();
            fetch_settings.version = PG_V13;

            let mut pg = PgEmbed::new(
                PgSettings {
                    database_dir: temp.path().to_path_buf(),
                    port,
                    user: "postgres".to_string(),
                    password: "postgres".to_string(),
                    auth_method: PgAuthMethod::Plain,
                    persistent: false,
                    timeout: Some(Duration::from_secs(30)),
                    migration_dir: None,
                },
                fetch_settings,
            )
            .await?;

            pg.setup().await?;
            pg.start_db().await?;

            let uri = format!("{}/postgres", pg.db_uri);
            embedded = Some(EmbeddedPg {
                pg,
                _temp_dir: temp,
            });
            uri
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;

        if embedded.is_some() || env_flag_enabled("AUTH_TEST_APPLY_MIGRATIONS") {
            run_migrations(&pool).await?;
        }

        Ok(Some(Self { pool, embedded }))
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub async fn teardown(self) -> Result<()> {
        if let Some(embedded) = self.embedded {
            embedded.shutdown().await;
        }
        Ok(())
    }
}

struct EmbeddedPg {
    pg: PgEmbed,
    _temp_dir: TempDir,
}

impl EmbeddedPg {
    async fn shutdown(mut self) {
        let _ = self.pg.stop_db().await;
    }
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let mut entries = std::fs::read_dir(&migrations_dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    for path in entries {
        let sql = std::fs::read_to_string(&path)?;
        for statement in sql.split(';') {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            sqlx::query(trimmed).execute(pool).await?;
        }
    }

    Ok(())
}

/// Captures outbound email so tests can fish tokens out of the links.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutboundEmail) -> Result<()> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

#[allow(dead_code)]
impl RecordingMailer {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Token query parameter from the most recent email's link, if any.
    pub fn last_token(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let html = &sent.last()?.html;
        let start = html.find("token=")? + "token=".len();
        let rest = &html[start..];
        let end = rest
            .find(|c: char| c == '&' || c == '"')
            .unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }

    pub fn last_recipient(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|e| e.to.clone())
    }
}

pub fn test_app_config() -> AppConfig {
    AppConfig {
        jwt_secret: "integration-test-secret".to_string(),
        access_ttl_minutes: 5,
        refresh_ttl_days: 7,
        qr_ttl_days: 365,
        refresh_cookie_name: "refresh_token".to_string(),
        refresh_cookie_domain: None,
        refresh_cookie_secure: false,
        refresh_cookie_same_site: CookieSameSite::Lax,
        order_url: "https://order.test".to_string(),
        qr_image_api_url: "https://qr.test/render".to_string(),
        frontend_url: "https://app.test".to_string(),
        email_gateway_url: None,
        email_gateway_bearer: None,
        email_from: "noreply@test".to_string(),
    }
}

pub fn test_app_state(pool: PgPool, mailer: Arc<dyn Mailer>) -> AppState {
    let config = test_app_config();
    let codec = Arc::new(TokenCodec::new(
        TokenConfig::new(&config.jwt_secret)
            .with_access_ttl_minutes(config.access_ttl_minutes)
            .with_qr_ttl_days(config.qr_ttl_days),
    ));
    AppState {
        db: pool,
        codec,
        config: Arc::new(config),
        mailer,
    }
}

#[allow(dead_code)]
pub fn sign_access_token(state: &AppState, user: &SeededUser) -> String {
    let (token, _) = state
        .codec
        .sign_access(&AccessSubject {
            user_id: user.user_id,
            email: Some(user.email.clone()),
            role: user.role.clone(),
            tenant_id: user.tenant_id,
        })
        .expect("sign access token");
    token
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct SeededUser {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub password: String,
    pub role: String,
}

#[allow(dead_code)]
pub async fn seed_user(
    pool: &PgPool,
    role: &str,
    tenant_id: Option<Uuid>,
    verified: bool,
) -> Result<SeededUser> {
    let user_id = Uuid::new_v4();
    let email = format!("user-{user_id}@example.com");
    let password = "CorrectHorseBatteryStaple!".to_string();
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("hash: {err}"))?
        .to_string();

    sqlx::query(
        "INSERT INTO users (id, tenant_id, email, password_hash, full_name, role, email_verified, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'active')",
    )
    .bind(user_id)
    .bind(tenant_id)
    .bind(&email)
    .bind(&password_hash)
    .bind("Test User")
    .bind(role)
    .bind(verified)
    .execute(pool)
    .await?;

    Ok(SeededUser {
        user_id,
        tenant_id,
        email,
        password,
        role: role.to_string(),
    })
}

#[allow(dead_code)]
pub async fn seed_tenant(pool: &PgPool, owner_id: Option<Uuid>) -> Result<Uuid> {
    let tenant_id = Uuid::new_v4();
    let slug = format!("tenant-{}", &tenant_id.to_string()[..8]);
    sqlx::query(
        "INSERT INTO tenants (id, name, slug, owner_id, image_url)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(tenant_id)
    .bind("Test Bistro")
    .bind(&slug)
    .bind(owner_id)
    .bind("https://cdn.test/logo.png")
    .execute(pool)
    .await?;
    Ok(tenant_id)
}

#[allow(dead_code)]
pub async fn seed_table(pool: &PgPool, tenant_id: Uuid, table_number: &str) -> Result<Uuid> {
    let zone_id = Uuid::new_v4();
    sqlx::query("INSERT INTO zones (id, tenant_id, name) VALUES ($1, $2, $3)")
        .bind(zone_id)
        .bind(tenant_id)
        .bind("Terrace")
        .execute(pool)
        .await?;

    let table_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO tables (id, tenant_id, zone_id, table_number, capacity, is_active)
         VALUES ($1, $2, $3, $4, 4, TRUE)",
    )
    .bind(table_id)
    .bind(tenant_id)
    .bind(zone_id)
    .bind(table_number)
    .execute(pool)
    .await?;
    Ok(table_id)
}

fn env_flag_enabled(key: &str) -> bool {
    matches!(env::var(key), Ok(value) if is_truthy(value.as_str()))
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}
