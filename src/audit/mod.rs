// Audit trail service

pub mod export;

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::audit::{AuditFilter, AuditLogEntry, AuditStatistics, RequestContext};
use crate::domain::validation::ValidationResult;
use crate::errors::Result;
use crate::store::AuditStore;

pub use export::ExportFormat;

/// One page of audit entries plus the paging envelope.
#[derive(Debug, Clone)]
pub struct AuditPage {
    pub entries: Vec<AuditLogEntry>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

/// Append, query, aggregate, and export the security trail.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    default_page_size: u32,
    max_page_size: u32,
    export_max_rows: u32,
}

impl AuditLog {
    pub fn new(
        store: Arc<dyn AuditStore>,
        default_page_size: u32,
        max_page_size: u32,
        export_max_rows: u32,
    ) -> Self {
        Self {
            store,
            default_page_size,
            max_page_size,
            export_max_rows,
        }
    }

    pub async fn append(&self, entry: &AuditLogEntry) -> Result<Uuid> {
        let id = self.store.append(entry).await?;
        metrics::counter!("audit_entries_written_total", 1);
        Ok(id)
    }

    pub async fn append_many(&self, entries: &[AuditLogEntry]) -> Result<Vec<Uuid>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.store.append_many(entries).await?;
        metrics::counter!("audit_entries_written_total", ids.len() as u64);
        Ok(ids)
    }

    /// Build the entry recording a denied or blocked attempt. The full
    /// validation outcome rides along in metadata so denied attempts stay
    /// investigable even for users who never acquire a role.
    pub fn denial_entry(
        user_id: Uuid,
        performed_by: Uuid,
        sentinel: &str,
        reason: &str,
        verdict: &ValidationResult,
        ctx: &RequestContext,
    ) -> AuditLogEntry {
        let metadata = serde_json::json!({
            "validation": verdict,
        });
        AuditLogEntry::new(user_id, sentinel, performed_by, reason)
            .with_context(ctx)
            .with_metadata(metadata)
    }

    /// Filtered page, newest first. The requested limit is clamped to the
    /// configured ceiling; page numbers start at 1.
    pub async fn list(
        &self,
        filter: &AuditFilter,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<AuditPage> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);
        let offset = i64::from(page - 1) * i64::from(limit);

        let (entries, total) = self.store.list(filter, offset, i64::from(limit)).await?;
        Ok(AuditPage {
            entries,
            total,
            page,
            limit,
        })
    }

    /// Case-insensitive substring search, newest first.
    pub async fn search(&self, term: &str, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        self.store
            .search(term, filter, i64::from(self.max_page_size))
            .await
    }

    /// Aggregates over the trail, optionally scoped to one user.
    pub async fn statistics(&self, scope: Option<Uuid>) -> Result<AuditStatistics> {
        self.store.statistics(scope).await
    }

    /// Serialize the filtered trail. CSV and JSON are produced from the
    /// same read, so the two formats always agree record for record.
    pub async fn export(&self, filter: &AuditFilter, format: ExportFormat) -> Result<Vec<u8>> {
        let (entries, total) = self
            .store
            .list(filter, 0, i64::from(self.export_max_rows))
            .await?;

        if total > entries.len() as i64 {
            info!(
                total,
                exported = entries.len(),
                "export truncated to the configured row ceiling"
            );
        }

        match format {
            ExportFormat::Csv => export::to_csv(&entries),
            ExportFormat::Json => export::to_json(&entries),
        }
    }
}
