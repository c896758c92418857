// Audit trail domain model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Caller-side request context threaded into every audit write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One immutable record of a state-changing or denied security-relevant
/// action. Append-only: an entry has exactly one state, `created`, and is
/// never mutated or deleted by normal operation. All reads are ordered by
/// `timestamp` descending.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Name of the role previously held, or `None` when no prior assignment
    /// existed.
    pub role_before: Option<String>,
    /// Name of the role granted, or one of the sentinel values for
    /// non-success entries.
    pub role_after: String,
    pub performed_by: Uuid,
    pub reason: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    /// `role_after` sentinel for a denied single assignment attempt.
    pub const ATTEMPT_FAILED: &'static str = "attempt_failed";
    /// `role_after` sentinel for a bulk operation rejected up front.
    pub const BLOCKED: &'static str = "blocked";
    /// `role_after` sentinel for an explicit unassignment.
    pub const UNASSIGNED: &'static str = "unassigned";

    pub fn new(
        user_id: Uuid,
        role_after: impl Into<String>,
        performed_by: Uuid,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            role_before: None,
            role_after: role_after.into(),
            performed_by,
            reason: reason.into(),
            ip_address: None,
            user_agent: None,
            metadata: serde_json::json!({}),
            timestamp: Utc::now(),
        }
    }

    pub fn with_role_before(mut self, role_before: Option<String>) -> Self {
        self.role_before = role_before;
        self
    }

    pub fn with_context(mut self, ctx: &RequestContext) -> Self {
        self.ip_address = ctx.ip_address.clone();
        self.user_agent = ctx.user_agent.clone();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Filter over the audit trail, applied identically by list, search,
/// statistics, and export.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub user_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub role_before: Option<String>,
    pub role_after: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring match over the reason field.
    pub reason_contains: Option<String>,
}

/// Per-day activity count for the trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityBucket {
    pub day: NaiveDate,
    pub count: i64,
}

/// Aggregates computed over the (optionally scoped) audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_changes: i64,
    pub changes_by_role: BTreeMap<String, i64>,
    pub changes_by_user: BTreeMap<Uuid, i64>,
    /// One bucket per day over the trailing seven days, oldest first,
    /// zero-filled for days without activity.
    pub recent_activity: Vec<ActivityBucket>,
}

/// Number of days covered by `AuditStatistics::recent_activity`.
pub const RECENT_ACTIVITY_DAYS: i64 = 7;

/// Zero-fill the trailing activity window from sparse per-day counts.
pub fn fill_recent_activity(counts: &BTreeMap<NaiveDate, i64>, today: NaiveDate) -> Vec<ActivityBucket> {
    (0..RECENT_ACTIVITY_DAYS)
        .rev()
        .map(|offset| {
            let day = today - chrono::Duration::days(offset);
            ActivityBucket {
                day,
                count: counts.get(&day).copied().unwrap_or(0),
            }
        })
        .collect()
}
