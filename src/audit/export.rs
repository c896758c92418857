// Audit trail export formats.
//
// CSV rows are flat: metadata is compacted to a JSON string and the
// timestamp rendered as RFC 3339, with quoting handled by the writer.
// The JSON export is an array of entry objects from the same record set.

use serde::Serialize;
use std::str::FromStr;

use crate::domain::audit::AuditLogEntry;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(AppError::Validation(format!(
                "unsupported export format: {}",
                other
            ))),
        }
    }
}

/// Flat CSV row for one audit entry.
#[derive(Debug, Serialize)]
struct CsvAuditRecord {
    id: String,
    user_id: String,
    role_before: String,
    role_after: String,
    performed_by: String,
    reason: String,
    ip_address: String,
    user_agent: String,
    metadata: String,
    timestamp: String,
}

impl From<&AuditLogEntry> for CsvAuditRecord {
    fn from(entry: &AuditLogEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            user_id: entry.user_id.to_string(),
            role_before: entry.role_before.clone().unwrap_or_default(),
            role_after: entry.role_after.clone(),
            performed_by: entry.performed_by.to_string(),
            reason: entry.reason.clone(),
            ip_address: entry.ip_address.clone().unwrap_or_default(),
            user_agent: entry.user_agent.clone().unwrap_or_default(),
            metadata: entry.metadata.to_string(),
            timestamp: entry.timestamp.to_rfc3339(),
        }
    }
}

const CSV_HEADER: [&str; 10] = [
    "id",
    "user_id",
    "role_before",
    "role_after",
    "performed_by",
    "reason",
    "ip_address",
    "user_agent",
    "metadata",
    "timestamp",
];

/// Header row plus one row per entry, RFC 4180 quoting.
pub fn to_csv(entries: &[AuditLogEntry]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if entries.is_empty() {
        // The serializer only emits the header alongside a record.
        writer
            .write_record(CSV_HEADER)
            .map_err(|e| AppError::Export(e.to_string()))?;
    }
    for entry in entries {
        writer
            .serialize(CsvAuditRecord::from(entry))
            .map_err(|e| AppError::Export(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Export(e.to_string()))
}

/// JSON array of entry objects.
pub fn to_json(entries: &[AuditLogEntry]) -> Result<Vec<u8>> {
    serde_json::to_vec(entries).map_err(|e| AppError::Export(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(reason: &str) -> AuditLogEntry {
        AuditLogEntry::new(Uuid::new_v4(), "moderator", Uuid::new_v4(), reason)
    }

    #[test]
    fn test_empty_export_still_has_header() {
        let bytes = to_csv(&[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("id,user_id,"));
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let entries = vec![entry("promotion"), entry("transfer")];
        let bytes = to_csv(&entries).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,user_id,role_before,role_after"));
        assert!(lines[1].contains("promotion"));
    }

    #[test]
    fn test_csv_quotes_embedded_delimiters() {
        let entries = vec![entry("budget, \"approved\" by dean")];
        let bytes = to_csv(&entries).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        // RFC 4180: the field is quoted and inner quotes doubled.
        assert!(text.contains("\"budget, \"\"approved\"\" by dean\""));

        // A compliant reader round-trips the value.
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[5], "budget, \"approved\" by dean");
    }

    #[test]
    fn test_formats_agree_on_records() {
        let entries = vec![entry("promotion"), entry("demotion, appealed")];

        let json_bytes = to_json(&entries).unwrap();
        let json: Vec<serde_json::Value> = serde_json::from_slice(&json_bytes).unwrap();

        let csv_bytes = to_csv(&entries).unwrap();
        let mut reader = csv::Reader::from_reader(csv_bytes.as_slice());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

        assert_eq!(json.len(), rows.len());
        for (value, row) in json.iter().zip(&rows) {
            assert_eq!(value["id"].as_str().unwrap(), &row[0]);
            assert_eq!(value["user_id"].as_str().unwrap(), &row[1]);
            assert_eq!(value["role_after"].as_str().unwrap(), &row[3]);
            assert_eq!(value["reason"].as_str().unwrap(), &row[5]);
        }
    }
}
