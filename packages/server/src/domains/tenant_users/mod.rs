//! Tenant-users domain - memberships of people within tenants.

pub mod commands;
pub mod queries;
pub mod tenant_user;

// Re-export commonly used types
pub use commands::{AddTenantUser, ChangeTenantUserEmail};
pub use queries::{GetTenantUser, TenantUserView};
pub use tenant_user::{TenantUser, TenantUserEvent};
