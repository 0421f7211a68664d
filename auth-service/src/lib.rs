pub mod app;
pub mod config;
pub mod credentials;
pub mod error;
pub mod notifications;
pub mod qr_guard;
pub mod session_handlers;
pub mod staff_handlers;
pub mod table_handlers;
pub mod tenancy;
pub mod tokens;
pub mod user_handlers;
pub mod verification_handlers;

pub use app::AppState;
