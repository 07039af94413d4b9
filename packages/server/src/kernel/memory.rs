//! In-memory persistence for the tenant domains.
//!
//! [`MemoryDb`] stands in for an external durable store. Writes are staged:
//! `save_tenant`/`save_tenant_user` drain the aggregate's event buffer and
//! park the snapshot plus its events in a pending area. Nothing touches the
//! live tables until the surrounding [`MemoryUnitOfWork`] runs
//! `save_changes`, and events reach the journal only on `commit`. Rolling
//! back discards the pending area, so a failed command leaves both the
//! tables and the journal exactly as they were.
//!
//! A single async write lock serializes command scopes; queries read the
//! live tables directly and never take it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use conveyor::{UnitOfWork, UnitOfWorkFactory};
use dashmap::DashMap;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::common::{TenantId, TenantUserId};
use crate::domains::tenant_users::{TenantUser, TenantUserEvent};
use crate::domains::tenants::{Tenant, TenantEvent};

/// A domain event that survived its commit, in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    Tenant(TenantEvent),
    TenantUser(TenantUserEvent),
}

#[derive(Default)]
struct PendingWrites {
    tenants: Vec<Tenant>,
    tenant_users: Vec<TenantUser>,
    events: Vec<JournalEvent>,
}

/// In-memory stand-in for the durable store.
pub struct MemoryDb {
    tenants: DashMap<TenantId, Tenant>,
    tenant_users: DashMap<TenantUserId, TenantUser>,
    pending: Mutex<PendingWrites>,
    journal: Mutex<Vec<JournalEvent>>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    fail_save: AtomicBool,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            tenant_users: DashMap::new(),
            pending: Mutex::new(PendingWrites::default()),
            journal: Mutex::new(Vec::new()),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            fail_save: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Tenants
    // =========================================================================

    /// Fetch a tenant by id, soft-deleted ones included.
    pub fn get_tenant(&self, id: TenantId) -> Option<Tenant> {
        self.tenants.get(&id).map(|entry| entry.value().clone())
    }

    /// Find a live tenant by name, ignoring case and surrounding whitespace.
    /// Soft-deleted tenants do not hold their name.
    pub fn find_tenant_by_name(&self, name: &str) -> Option<Tenant> {
        let wanted = name.trim();
        self.tenants
            .iter()
            .find(|entry| {
                !entry.value().is_deleted() && entry.value().name().eq_ignore_ascii_case(wanted)
            })
            .map(|entry| entry.value().clone())
    }

    /// Live tenants in id order (UUIDv7, so oldest first), strictly after
    /// the cursor, at most `limit` of them.
    pub fn list_tenants(&self, after: Option<Uuid>, limit: usize) -> Vec<Tenant> {
        let mut rows: Vec<Tenant> = self
            .tenants
            .iter()
            .filter(|entry| !entry.value().is_deleted())
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|t| t.id());
        rows.into_iter()
            .filter(|t| after.map_or(true, |cursor| *t.id().as_uuid() > cursor))
            .take(limit)
            .collect()
    }

    /// Stage a tenant write. The aggregate's events move into the pending
    /// outbox; the snapshot becomes visible once the unit of work saves.
    pub fn save_tenant(&self, tenant: &mut Tenant) {
        let events = tenant.take_events();
        let mut pending = self.lock_pending();
        pending
            .events
            .extend(events.into_iter().map(JournalEvent::Tenant));
        pending.tenants.push(tenant.clone());
    }

    // =========================================================================
    // Tenant users
    // =========================================================================

    /// Fetch a membership by id, soft-deleted ones included.
    pub fn get_tenant_user(&self, id: TenantUserId) -> Option<TenantUser> {
        self.tenant_users.get(&id).map(|entry| entry.value().clone())
    }

    /// Find a live membership by user name within one tenant, ignoring case.
    pub fn find_tenant_user_by_name(
        &self,
        tenant_id: TenantId,
        user_name: &str,
    ) -> Option<TenantUser> {
        let wanted = user_name.trim();
        self.tenant_users
            .iter()
            .find(|entry| {
                let user = entry.value();
                !user.is_deleted()
                    && user.tenant_id() == tenant_id
                    && user.user_name().eq_ignore_ascii_case(wanted)
            })
            .map(|entry| entry.value().clone())
    }

    /// Stage a membership write.
    pub fn save_tenant_user(&self, user: &mut TenantUser) {
        let events = user.take_events();
        let mut pending = self.lock_pending();
        pending
            .events
            .extend(events.into_iter().map(JournalEvent::TenantUser));
        pending.tenant_users.push(user.clone());
    }

    // =========================================================================
    // Journal and test hooks
    // =========================================================================

    /// Everything dispatched so far, in commit order.
    pub fn journal(&self) -> Vec<JournalEvent> {
        self.lock_journal().clone()
    }

    /// Make the next `save_changes` fail. One-shot.
    pub fn fail_next_save_changes(&self) {
        self.fail_save.store(true, Ordering::SeqCst);
    }

    // =========================================================================
    // Unit-of-work plumbing
    // =========================================================================

    fn apply_pending(&self) -> anyhow::Result<u64> {
        if self.fail_save.swap(false, Ordering::SeqCst) {
            anyhow::bail!("injected save failure");
        }
        let mut pending = self.lock_pending();
        let mut applied = 0u64;
        for tenant in pending.tenants.drain(..) {
            self.tenants.insert(tenant.id(), tenant);
            applied += 1;
        }
        for user in pending.tenant_users.drain(..) {
            self.tenant_users.insert(user.id(), user);
            applied += 1;
        }
        Ok(applied)
    }

    fn dispatch_pending_events(&self) {
        let drained: Vec<JournalEvent> = self.lock_pending().events.drain(..).collect();
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        self.lock_journal().extend(drained);
        tracing::debug!(count, "dispatched domain events to the journal");
    }

    fn clear_pending(&self) {
        let mut pending = self.lock_pending();
        pending.tenants.clear();
        pending.tenant_users.clear();
        pending.events.clear();
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingWrites> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A writer panicked mid-stage; the scope's rollback discards
                // whatever it left behind.
                tracing::warn!("pending-writes lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_journal(&self) -> MutexGuard<'_, Vec<JournalEvent>> {
        match self.journal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("journal lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for MemoryDb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDb")
            .field("tenants", &self.tenants.len())
            .field("tenant_users", &self.tenant_users.len())
            .finish()
    }
}

/// Unit of work over [`MemoryDb`].
///
/// `begin` takes the db's write lock, so at most one command scope mutates
/// at a time; the lock is released on commit or rollback when the guard
/// drops.
pub struct MemoryUnitOfWork {
    db: Arc<MemoryDb>,
    guard: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn begin(&mut self) -> anyhow::Result<()> {
        let guard = self.db.write_lock.clone().lock_owned().await;
        // A scope starts with nothing staged.
        self.db.clear_pending();
        self.guard = Some(guard);
        Ok(())
    }

    async fn save_changes(&mut self) -> anyhow::Result<u64> {
        self.db.apply_pending()
    }

    async fn commit(&mut self) -> anyhow::Result<()> {
        self.db.dispatch_pending_events();
        self.guard.take();
        Ok(())
    }

    async fn rollback(&mut self) -> anyhow::Result<()> {
        self.db.clear_pending();
        self.guard.take();
        Ok(())
    }
}

/// Builds a [`MemoryUnitOfWork`] per command dispatch.
pub struct MemoryUnitOfWorkFactory {
    db: Arc<MemoryDb>,
}

impl MemoryUnitOfWorkFactory {
    pub fn new(db: Arc<MemoryDb>) -> Self {
        Self { db }
    }
}

impl UnitOfWorkFactory for MemoryUnitOfWorkFactory {
    fn create(&self) -> Box<dyn UnitOfWork> {
        Box::new(MemoryUnitOfWork {
            db: self.db.clone(),
            guard: None,
        })
    }
}
