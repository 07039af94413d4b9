//! Typed ID definitions for all domain entities.
//!
//! This module defines type aliases for each domain entity, providing
//! compile-time type safety for ID usage throughout the application.
//!
//! # Example
//!
//! ```rust
//! use server_core::common::{TenantId, TenantUserId};
//!
//! // These are incompatible types - compiler prevents mixing them up
//! let tenant_id: TenantId = TenantId::new();
//! let user_id: TenantUserId = TenantUserId::new();
//!
//! // This would be a compile error:
//! // let wrong: TenantUserId = tenant_id;
//! ```

// Re-export the core Id type and version markers
pub use super::id::{Id, V4, V7};

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for Tenant entities.
pub struct Tenant;

/// Marker type for TenantUser entities (memberships within a tenant).
pub struct TenantUser;

/// Marker type for User entities (the people acting on requests).
pub struct User;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

/// Typed ID for Tenant entities.
pub type TenantId = Id<Tenant>;

/// Typed ID for TenantUser entities.
pub type TenantUserId = Id<TenantUser>;

/// Typed ID for User entities.
pub type UserId = Id<User>;
