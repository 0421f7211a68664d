pub const ROLE_PLATFORM_ADMIN: &str = "platform_admin";
pub const ROLE_OWNER: &str = "owner";
pub const ROLE_TENANT_ADMIN: &str = "tenant_admin";
pub const ROLE_WAITER: &str = "waiter";
pub const ROLE_KITCHEN: &str = "kitchen";
pub const ROLE_CUSTOMER: &str = "customer";
pub const ROLE_GUEST: &str = "guest";

/// Roles that act on behalf of the restaurant rather than a scanned table.
pub const STAFF_ROLES: &[&str] = &[
    ROLE_PLATFORM_ADMIN,
    ROLE_OWNER,
    ROLE_TENANT_ADMIN,
    ROLE_WAITER,
    ROLE_KITCHEN,
];

pub fn is_staff_role(role: &str) -> bool {
    STAFF_ROLES.contains(&role)
}
