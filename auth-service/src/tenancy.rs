use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use common_auth::{AccessClaims, ROLE_OWNER};

use crate::error::ApiError;

/// Owners name their tenant through the x-tenant-id header, so the claim
/// must be cross-checked against ownership before it is trusted. Every
/// other role already carries its tenant inside the signed token.
pub async fn ensure_tenant_owner(
    pool: &PgPool,
    claims: &AccessClaims,
    tenant_id: Uuid,
) -> Result<(), ApiError> {
    if claims.role != ROLE_OWNER {
        return Ok(());
    }

    let owned = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM tenants WHERE id = $1 AND owner_id = $2",
    )
    .bind(tenant_id)
    .bind(claims.subject)
    .fetch_optional(pool)
    .await?;

    if owned.is_none() {
        warn!(user_id = %claims.subject, tenant_id = %tenant_id, "tenant ownership check failed");
        return Err(ApiError::unauthorized(
            "TENANT_OWNERSHIP",
            "You do not have access to this tenant",
        ));
    }

    Ok(())
}
