//! Tenants domain - the unit of isolation everything else hangs off.

pub mod commands;
pub mod queries;
pub mod tenant;

// Re-export commonly used types
pub use commands::{CreateTenant, DeleteTenant, RenameTenant, RestoreTenant};
pub use queries::{GetTenant, ListTenants, TenantView};
pub use tenant::{Tenant, TenantEvent};
