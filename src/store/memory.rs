// In-memory implementation of the store traits.
//
// Backs the test suites and the local development mode; the transactional
// methods mirror the PostgreSQL semantics, including all-or-nothing batch
// writes and per-row conflict detection. `fail_writes_after` injects a
// storage failure mid-transaction so rollback behavior can be exercised.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::audit::{fill_recent_activity, AuditFilter, AuditLogEntry, AuditStatistics};
use crate::domain::role::{Role, RoleAssignment};
use crate::errors::{AppError, Result};
use crate::store::{AssignmentStore, AuditStore, InsertOutcome, RoleStore};

#[derive(Default, Clone)]
struct State {
    roles: Vec<Role>,
    assignments: HashMap<Uuid, RoleAssignment>,
    audit: Vec<AuditLogEntry>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    /// Remaining row writes before the next assignment transaction fails.
    fail_after: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            fail_after: Mutex::new(None),
        }
    }

    pub fn with_roles(roles: Vec<Role>) -> Self {
        Self {
            state: Mutex::new(State {
                roles,
                ..State::default()
            }),
            fail_after: Mutex::new(None),
        }
    }

    /// Arm a simulated storage failure: the assignment transaction errors
    /// after `n` successful row writes, leaving the store untouched.
    pub async fn fail_writes_after(&self, n: usize) {
        *self.fail_after.lock().await = Some(n);
    }

    /// Snapshot of the audit trail in insertion order (test support).
    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.state.lock().await.audit.clone()
    }

    pub async fn assignment_count(&self) -> usize {
        self.state.lock().await.assignments.len()
    }

    /// Install an assignment row without an audit entry (test support).
    pub async fn seed_assignment(&self, assignment: RoleAssignment) {
        self.state
            .lock()
            .await
            .assignments
            .insert(assignment.user_id, assignment);
    }

    fn charge(budget: &mut Option<usize>) -> Result<()> {
        if let Some(remaining) = budget {
            if *remaining == 0 {
                return Err(AppError::Internal("simulated storage failure".to_string()));
            }
            *remaining -= 1;
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(entry: &AuditLogEntry, filter: &AuditFilter) -> bool {
    if let Some(user_id) = filter.user_id {
        if entry.user_id != user_id {
            return false;
        }
    }
    if let Some(performed_by) = filter.performed_by {
        if entry.performed_by != performed_by {
            return false;
        }
    }
    if let Some(role_before) = &filter.role_before {
        if entry.role_before.as_ref() != Some(role_before) {
            return false;
        }
    }
    if let Some(role_after) = &filter.role_after {
        if &entry.role_after != role_after {
            return false;
        }
    }
    if let Some(from) = filter.from {
        if entry.timestamp < from {
            return false;
        }
    }
    if let Some(to) = filter.to {
        if entry.timestamp > to {
            return false;
        }
    }
    if let Some(reason) = &filter.reason_contains {
        if !entry
            .reason
            .to_lowercase()
            .contains(&reason.to_lowercase())
        {
            return false;
        }
    }
    true
}

fn matches_term(entry: &AuditLogEntry, term: &str) -> bool {
    let needle = term.to_lowercase();
    entry.reason.to_lowercase().contains(&needle)
        || entry.role_after.to_lowercase().contains(&needle)
        || entry
            .role_before
            .as_deref()
            .is_some_and(|r| r.to_lowercase().contains(&needle))
        || entry.user_id.to_string().contains(&needle)
        || entry.performed_by.to_string().contains(&needle)
}

fn sorted_desc(mut entries: Vec<AuditLogEntry>) -> Vec<AuditLogEntry> {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn role(&self, id: Uuid) -> Result<Option<Role>> {
        Ok(self
            .state
            .lock()
            .await
            .roles
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn roles(&self) -> Result<Vec<Role>> {
        let mut roles = self.state.lock().await.roles.clone();
        roles.sort_by_key(|r| r.level);
        Ok(roles)
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn assignment_for_user(&self, user_id: Uuid) -> Result<Option<RoleAssignment>> {
        Ok(self.state.lock().await.assignments.get(&user_id).cloned())
    }

    async fn insert(
        &self,
        assignment: &RoleAssignment,
        entry: &AuditLogEntry,
    ) -> Result<InsertOutcome> {
        let outcomes = self
            .insert_batch(&[(assignment.clone(), entry.clone())])
            .await?;
        Ok(outcomes[0])
    }

    async fn insert_batch(
        &self,
        items: &[(RoleAssignment, AuditLogEntry)],
    ) -> Result<Vec<InsertOutcome>> {
        let mut state = self.state.lock().await;
        let mut budget = self.fail_after.lock().await;

        // Stage every write, commit only if the whole batch survives.
        let mut staged = state.clone();
        let mut outcomes = Vec::with_capacity(items.len());

        for (assignment, entry) in items {
            if staged.assignments.contains_key(&assignment.user_id) {
                outcomes.push(InsertOutcome::Conflict);
                continue;
            }
            Self::charge(&mut budget)?;
            staged
                .assignments
                .insert(assignment.user_id, assignment.clone());
            Self::charge(&mut budget)?;
            staged.audit.push(entry.clone());
            outcomes.push(InsertOutcome::Inserted {
                audit_entry_id: entry.id,
            });
        }

        *state = staged;
        Ok(outcomes)
    }

    async fn remove(&self, user_id: Uuid, entry: &AuditLogEntry) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.assignments.remove(&user_id).is_none() {
            return Ok(false);
        }
        state.audit.push(entry.clone());
        Ok(true)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<Uuid> {
        self.state.lock().await.audit.push(entry.clone());
        Ok(entry.id)
    }

    async fn append_many(&self, entries: &[AuditLogEntry]) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock().await;
        state.audit.extend(entries.iter().cloned());
        Ok(entries.iter().map(|e| e.id).collect())
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<AuditLogEntry>, i64)> {
        let state = self.state.lock().await;
        let filtered: Vec<AuditLogEntry> = state
            .audit
            .iter()
            .filter(|e| matches_filter(e, filter))
            .cloned()
            .collect();
        let total = filtered.len() as i64;

        let page = sorted_desc(filtered)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();

        Ok((page, total))
    }

    async fn search(
        &self,
        term: &str,
        filter: &AuditFilter,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        let state = self.state.lock().await;
        let matched: Vec<AuditLogEntry> = state
            .audit
            .iter()
            .filter(|e| matches_filter(e, filter) && matches_term(e, term))
            .cloned()
            .collect();

        Ok(sorted_desc(matched)
            .into_iter()
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn statistics(&self, scope: Option<Uuid>) -> Result<AuditStatistics> {
        let state = self.state.lock().await;
        let entries: Vec<&AuditLogEntry> = state
            .audit
            .iter()
            .filter(|e| scope.map_or(true, |user_id| e.user_id == user_id))
            .collect();

        let mut changes_by_role: BTreeMap<String, i64> = BTreeMap::new();
        let mut changes_by_user: BTreeMap<Uuid, i64> = BTreeMap::new();
        let mut day_counts: BTreeMap<NaiveDate, i64> = BTreeMap::new();

        let now = Utc::now();
        let window_start = now - Duration::days(crate::domain::audit::RECENT_ACTIVITY_DAYS);

        for entry in &entries {
            *changes_by_role.entry(entry.role_after.clone()).or_insert(0) += 1;
            *changes_by_user.entry(entry.user_id).or_insert(0) += 1;
            if entry.timestamp >= window_start {
                *day_counts.entry(entry.timestamp.date_naive()).or_insert(0) += 1;
            }
        }

        Ok(AuditStatistics {
            total_changes: entries.len() as i64,
            changes_by_role,
            changes_by_user,
            recent_activity: fill_recent_activity(&day_counts, now.date_naive()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user: Uuid, role_after: &str, reason: &str) -> AuditLogEntry {
        AuditLogEntry::new(user, role_after, Uuid::new_v4(), reason)
    }

    #[tokio::test]
    async fn test_list_orders_descending_and_paginates() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        for i in 0..5 {
            let mut e = entry(user, "staff", &format!("change {}", i));
            e.timestamp = Utc::now() - Duration::minutes(5 - i);
            store.append(&e).await.unwrap();
        }

        let (page, total) = store.list(&AuditFilter::default(), 0, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].reason, "change 4");
        assert!(page[0].timestamp >= page[1].timestamp);

        let (page2, _) = store.list(&AuditFilter::default(), 2, 2).await.unwrap();
        assert_eq!(page2[0].reason, "change 2");
    }

    #[tokio::test]
    async fn test_filter_by_user_and_role() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.append(&entry(alice, "staff", "hire")).await.unwrap();
        store
            .append(&entry(bob, "moderator", "promotion"))
            .await
            .unwrap();

        let filter = AuditFilter {
            user_id: Some(alice),
            ..AuditFilter::default()
        };
        let (entries, total) = store.list(&filter, 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(entries[0].user_id, alice);

        let filter = AuditFilter {
            role_after: Some("moderator".to_string()),
            ..AuditFilter::default()
        };
        let (entries, _) = store.list(&filter, 0, 10).await.unwrap();
        assert_eq!(entries[0].user_id, bob);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store
            .append(&entry(user, "administrator", "Quarterly Access Review"))
            .await
            .unwrap();
        store.append(&entry(user, "staff", "hire")).await.unwrap();

        let hits = store
            .search("qUaRtErLy", &AuditFilter::default(), 50)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].role_after, "administrator");

        // Identity fields are searchable too.
        let hits = store
            .search(&user.to_string()[..8], &AuditFilter::default(), 50)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_insert_is_atomic_under_failure() {
        let store = MemoryStore::new();
        let actor = Uuid::new_v4();
        let role_id = Uuid::new_v4();
        let items: Vec<(RoleAssignment, AuditLogEntry)> = (0..3)
            .map(|i| {
                let user = Uuid::new_v4();
                (
                    RoleAssignment::new(user, role_id, actor, format!("batch {}", i)),
                    entry(user, "staff", "batch"),
                )
            })
            .collect();

        // Fails on the third row write, mid-item.
        store.fail_writes_after(3).await;
        let result = store.insert_batch(&items).await;
        assert!(result.is_err());
        assert_eq!(store.assignment_count().await, 0);
        assert!(store.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_insert_conflict_does_not_abort() {
        let store = MemoryStore::new();
        let actor = Uuid::new_v4();
        let role_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        let items = vec![
            (
                RoleAssignment::new(user, role_id, actor, "first".to_string()),
                entry(user, "staff", "first"),
            ),
            // Same target twice: the second write loses the uniqueness race.
            (
                RoleAssignment::new(user, role_id, actor, "second".to_string()),
                entry(user, "staff", "second"),
            ),
            (
                RoleAssignment::new(other, role_id, actor, "third".to_string()),
                entry(other, "staff", "third"),
            ),
        ];

        let outcomes = store.insert_batch(&items).await.unwrap();
        assert!(matches!(outcomes[0], InsertOutcome::Inserted { .. }));
        assert_eq!(outcomes[1], InsertOutcome::Conflict);
        assert!(matches!(outcomes[2], InsertOutcome::Inserted { .. }));
        assert_eq!(store.assignment_count().await, 2);
        assert_eq!(store.audit_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_statistics_counts_and_buckets() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.append(&entry(alice, "staff", "hire")).await.unwrap();
        store.append(&entry(alice, "moderator", "promotion")).await.unwrap();
        store.append(&entry(bob, "staff", "hire")).await.unwrap();

        let stats = store.statistics(None).await.unwrap();
        assert_eq!(stats.total_changes, 3);
        assert_eq!(stats.changes_by_role.get("staff"), Some(&2));
        assert_eq!(stats.changes_by_user.get(&alice), Some(&2));
        assert_eq!(stats.recent_activity.len(), 7);
        assert_eq!(stats.recent_activity.last().unwrap().count, 3);

        let scoped = store.statistics(Some(bob)).await.unwrap();
        assert_eq!(scoped.total_changes, 1);
        assert!(scoped.changes_by_role.get("moderator").is_none());
    }
}
