// ABOUTME: Append-only trail of admin-surface mutations, newest first.

use super::Store;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Spec-mandated cap on the serialized `detail_json` column.
const MAX_DETAIL_JSON_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor_principal_id: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub timestamp: DateTime<Utc>,
    pub detail: Value,
}

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

impl Store {
    pub fn append_audit_entry(
        &self,
        actor_principal_id: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        detail: Value,
    ) -> Result<AuditEntry> {
        let detail_json = detail.to_string();
        if detail_json.len() > MAX_DETAIL_JSON_BYTES {
            return Err(GatewayError::Invalid(format!(
                "audit detail_json exceeds {MAX_DETAIL_JSON_BYTES} bytes ({} bytes)",
                detail_json.len()
            )));
        }

        let entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            actor_principal_id: actor_principal_id.to_string(),
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            timestamp: Utc::now(),
            detail,
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO audit_entries
                (id, actor_principal_id, action, target_type, target_id, timestamp, detail_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                entry.actor_principal_id,
                entry.action,
                entry.target_type,
                entry.target_id,
                entry.timestamp.to_rfc3339(),
                detail_json,
            ],
        )?;

        Ok(entry)
    }

    /// Most recent entries first, `limit` clamped to [1, 1000], default 100.
    pub fn list_audit_entries(&self, limit: Option<i64>) -> Result<Vec<AuditEntry>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, actor_principal_id, action, target_type, target_id, timestamp, detail_json
             FROM audit_entries ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_entry)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<AuditEntry> {
    let timestamp: String = row.get(5)?;
    let detail_json: String = row.get(6)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        actor_principal_id: row.get(1)?,
        action: row.get(2)?,
        target_type: row.get(3)?,
        target_id: row.get(4)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        detail: serde_json::from_str(&detail_json).unwrap_or(Value::Null),
    })
}
