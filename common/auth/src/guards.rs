use axum::http::HeaderMap;
use uuid::Uuid;

use crate::claims::AccessClaims;
use crate::error::{AuthError, AuthResult};
use crate::roles::ROLE_OWNER;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Generic role allow-list enforcement. An empty allow-list passes everyone.
pub fn ensure_role(claims: &AccessClaims, allowed: &[&str]) -> AuthResult<()> {
    if allowed.is_empty() || allowed.iter().any(|role| claims.role == *role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(
            allowed.iter().map(|value| value.to_string()).collect(),
        ))
    }
}

/// Resolves the tenant a request operates against.
///
/// Owners do not carry a fixed tenant (one owner may own many restaurants)
/// and must declare the target via the `x-tenant-id` header. Every other
/// role is structurally bound to its own tenant and the header is ignored.
/// The result feeds every tenant-scoped query as a mandatory filter.
pub fn resolve_tenant(headers: &HeaderMap, claims: &AccessClaims) -> AuthResult<Uuid> {
    if claims.role == ROLE_OWNER {
        let raw = headers.get(TENANT_HEADER).ok_or(AuthError::MissingTenant)?;
        let value = raw
            .to_str()
            .map_err(|_| AuthError::InvalidTenantHeader)?
            .trim();
        if value.is_empty() {
            return Err(AuthError::MissingTenant);
        }
        Uuid::parse_str(value).map_err(|_| AuthError::InvalidTenantHeader)
    } else {
        claims.tenant_id.ok_or(AuthError::MissingTenant)
    }
}
