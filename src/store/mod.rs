// Persistence boundary: trait objects injected into the engine and services

pub mod memory;
pub mod pool;
pub mod postgres;

pub use memory::MemoryStore;
pub use pool::{create_pool, run_migrations};
pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::audit::{AuditFilter, AuditLogEntry, AuditStatistics};
use crate::domain::role::{Role, RoleAssignment};
use crate::errors::Result;

/// Outcome of one assignment row write. A `Conflict` means the uniqueness
/// constraint on `user_id` already held: the row and its audit entry were
/// not written, but the surrounding transaction stays alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { audit_entry_id: Uuid },
    Conflict,
}

/// Read-only access to role reference data.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn role(&self, id: Uuid) -> Result<Option<Role>>;
    /// All roles, ordered by ascending level.
    async fn roles(&self) -> Result<Vec<Role>>;
}

/// Role assignment rows. Every mutation is paired with its audit entry and
/// the pair commits in one transaction, or not at all.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn assignment_for_user(&self, user_id: Uuid) -> Result<Option<RoleAssignment>>;

    /// Insert one assignment together with its success audit entry.
    async fn insert(
        &self,
        assignment: &RoleAssignment,
        entry: &AuditLogEntry,
    ) -> Result<InsertOutcome>;

    /// Insert a batch of assignments, each paired with its audit entry, in
    /// a single transaction. A storage failure aborts every write in the
    /// batch. An item losing the uniqueness race is reported as `Conflict`
    /// in its slot without aborting the rest.
    async fn insert_batch(
        &self,
        items: &[(RoleAssignment, AuditLogEntry)],
    ) -> Result<Vec<InsertOutcome>>;

    /// Delete one assignment together with its audit entry. Returns `false`
    /// when no row existed (nothing is written in that case).
    async fn remove(&self, user_id: Uuid, entry: &AuditLogEntry) -> Result<bool>;
}

/// Append-only audit trail. Entries are never mutated or deleted by normal
/// operation; every read is ordered by timestamp descending.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<Uuid>;
    async fn append_many(&self, entries: &[AuditLogEntry]) -> Result<Vec<Uuid>>;

    /// Filtered page plus the total count matching the filter.
    async fn list(
        &self,
        filter: &AuditFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<AuditLogEntry>, i64)>;

    /// Case-insensitive substring match over reason, role names, and
    /// identity fields, on top of the structured filter.
    async fn search(
        &self,
        term: &str,
        filter: &AuditFilter,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>>;

    /// Aggregates over the full trail, optionally scoped to one user.
    async fn statistics(&self, scope: Option<Uuid>) -> Result<AuditStatistics>;
}
