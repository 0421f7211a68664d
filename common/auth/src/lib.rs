pub mod claims;
pub mod codec;
pub mod config;
pub mod error;
pub mod extractors;
pub mod guards;
pub mod roles;

pub use claims::{AccessClaims, QrClaims};
pub use codec::{AccessSubject, QrSubject, TokenCodec};
pub use config::TokenConfig;
pub use error::{AuthError, AuthResult};
pub use extractors::AuthContext;
pub use guards::{ensure_role, resolve_tenant};
pub use roles::{
    is_staff_role, ROLE_CUSTOMER, ROLE_GUEST, ROLE_KITCHEN, ROLE_OWNER, ROLE_PLATFORM_ADMIN,
    ROLE_TENANT_ADMIN, ROLE_WAITER, STAFF_ROLES,
};
