// PostgreSQL implementation of the store traits

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::audit::{fill_recent_activity, AuditFilter, AuditLogEntry, AuditStatistics};
use crate::domain::role::{Role, RoleAssignment};
use crate::errors::Result;
use crate::store::{AssignmentStore, AuditStore, InsertOutcome, RoleStore};

/// All three store traits backed by one connection pool. Paired
/// row-plus-audit writes share a single transaction.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ENTRY_COLUMNS: &str = "id, user_id, role_before, role_after, performed_by, reason, \
     ip_address, user_agent, metadata, timestamp";

async fn insert_entry<'e, E>(executor: E, entry: &AuditLogEntry) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO audit_log (id, user_id, role_before, role_after, performed_by, reason, \
         ip_address, user_agent, metadata, timestamp) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(entry.id)
    .bind(entry.user_id)
    .bind(&entry.role_before)
    .bind(&entry.role_after)
    .bind(entry.performed_by)
    .bind(&entry.reason)
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .bind(&entry.metadata)
    .bind(entry.timestamp)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_assignment_row(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    assignment: &RoleAssignment,
    entry: &AuditLogEntry,
) -> Result<InsertOutcome> {
    // ON CONFLICT DO NOTHING keeps the transaction alive when this row
    // loses the uniqueness race; the caller decides what that means.
    let result = sqlx::query(
        "INSERT INTO user_roles (user_id, role_id, assigned_by, reason, assigned_at, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(assignment.user_id)
    .bind(assignment.role_id)
    .bind(assignment.assigned_by)
    .bind(&assignment.reason)
    .bind(assignment.assigned_at)
    .bind(&assignment.metadata)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(InsertOutcome::Conflict);
    }

    insert_entry(&mut **tx, entry).await?;
    Ok(InsertOutcome::Inserted {
        audit_entry_id: entry.id,
    })
}

/// Append the structured filter conditions to a query that already selects
/// from `audit_log` and ends with `WHERE 1=1`.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    if let Some(user_id) = filter.user_id {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(performed_by) = filter.performed_by {
        builder.push(" AND performed_by = ").push_bind(performed_by);
    }
    if let Some(role_before) = &filter.role_before {
        builder
            .push(" AND role_before = ")
            .push_bind(role_before.clone());
    }
    if let Some(role_after) = &filter.role_after {
        builder
            .push(" AND role_after = ")
            .push_bind(role_after.clone());
    }
    if let Some(from) = filter.from {
        builder.push(" AND timestamp >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND timestamp <= ").push_bind(to);
    }
    if let Some(reason) = &filter.reason_contains {
        builder
            .push(" AND reason ILIKE ")
            .push_bind(like_pattern(reason));
    }
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl RoleStore for PostgresStore {
    async fn role(&self, id: Uuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT id, name, level FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn roles(&self) -> Result<Vec<Role>> {
        let roles =
            sqlx::query_as::<_, Role>("SELECT id, name, level FROM roles ORDER BY level ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(roles)
    }
}

#[async_trait]
impl AssignmentStore for PostgresStore {
    async fn assignment_for_user(&self, user_id: Uuid) -> Result<Option<RoleAssignment>> {
        let assignment = sqlx::query_as::<_, RoleAssignment>(
            "SELECT user_id, role_id, assigned_by, reason, assigned_at, metadata \
             FROM user_roles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(assignment)
    }

    async fn insert(
        &self,
        assignment: &RoleAssignment,
        entry: &AuditLogEntry,
    ) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = insert_assignment_row(&mut tx, assignment, entry).await?;
        match outcome {
            InsertOutcome::Inserted { .. } => tx.commit().await?,
            InsertOutcome::Conflict => tx.rollback().await?,
        }
        Ok(outcome)
    }

    async fn insert_batch(
        &self,
        items: &[(RoleAssignment, AuditLogEntry)],
    ) -> Result<Vec<InsertOutcome>> {
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(items.len());

        for (assignment, entry) in items {
            let outcome = insert_assignment_row(&mut tx, assignment, entry).await?;
            outcomes.push(outcome);
        }

        tx.commit().await?;
        Ok(outcomes)
    }

    async fn remove(&self, user_id: Uuid, entry: &AuditLogEntry) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_entry(&mut *tx, entry).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl AuditStore for PostgresStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<Uuid> {
        insert_entry(&self.pool, entry).await?;
        Ok(entry.id)
    }

    async fn append_many(&self, entries: &[AuditLogEntry]) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            insert_entry(&mut *tx, entry).await?;
        }
        tx.commit().await?;
        Ok(entries.iter().map(|e| e.id).collect())
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<AuditLogEntry>, i64)> {
        let mut count_query =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_log WHERE 1=1");
        push_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut page_query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM audit_log WHERE 1=1",
            ENTRY_COLUMNS
        ));
        push_filter(&mut page_query, filter);
        page_query
            .push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let entries = page_query
            .build_query_as::<AuditLogEntry>()
            .fetch_all(&self.pool)
            .await?;

        Ok((entries, total))
    }

    async fn search(
        &self,
        term: &str,
        filter: &AuditFilter,
        limit: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        let pattern = like_pattern(term);
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM audit_log WHERE 1=1",
            ENTRY_COLUMNS
        ));
        push_filter(&mut query, filter);

        query.push(" AND (reason ILIKE ").push_bind(pattern.clone());
        query
            .push(" OR role_after ILIKE ")
            .push_bind(pattern.clone());
        query
            .push(" OR COALESCE(role_before, '') ILIKE ")
            .push_bind(pattern.clone());
        query
            .push(" OR user_id::text ILIKE ")
            .push_bind(pattern.clone());
        query
            .push(" OR performed_by::text ILIKE ")
            .push_bind(pattern);
        query.push(")");

        query
            .push(" ORDER BY timestamp DESC LIMIT ")
            .push_bind(limit);

        let entries = query
            .build_query_as::<AuditLogEntry>()
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    async fn statistics(&self, scope: Option<Uuid>) -> Result<AuditStatistics> {
        let mut total_query =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_log WHERE 1=1");
        if let Some(user_id) = scope {
            total_query.push(" AND user_id = ").push_bind(user_id);
        }
        let total_changes: i64 = total_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut role_query = QueryBuilder::<Postgres>::new(
            "SELECT role_after, COUNT(*) FROM audit_log WHERE 1=1",
        );
        if let Some(user_id) = scope {
            role_query.push(" AND user_id = ").push_bind(user_id);
        }
        role_query.push(" GROUP BY role_after");
        let by_role: Vec<(String, i64)> = role_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let mut user_query =
            QueryBuilder::<Postgres>::new("SELECT user_id, COUNT(*) FROM audit_log WHERE 1=1");
        if let Some(user_id) = scope {
            user_query.push(" AND user_id = ").push_bind(user_id);
        }
        user_query.push(" GROUP BY user_id");
        let by_user: Vec<(Uuid, i64)> = user_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let mut day_query = QueryBuilder::<Postgres>::new(
            "SELECT (timestamp AT TIME ZONE 'UTC')::date AS day, COUNT(*) FROM audit_log \
             WHERE timestamp >= NOW() - INTERVAL '7 days'",
        );
        if let Some(user_id) = scope {
            day_query.push(" AND user_id = ").push_bind(user_id);
        }
        day_query.push(" GROUP BY day");
        let by_day: Vec<(NaiveDate, i64)> = day_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let day_counts: BTreeMap<NaiveDate, i64> = by_day.into_iter().collect();

        Ok(AuditStatistics {
            total_changes,
            changes_by_role: by_role.into_iter().collect(),
            changes_by_user: by_user.into_iter().collect(),
            recent_activity: fill_recent_activity(&day_counts, Utc::now().date_naive()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("plain"), "%plain%");
    }
}
