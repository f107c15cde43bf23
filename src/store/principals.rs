// ABOUTME: Principal and role-assignment CRUD. Delete cascades to bindings where the
// ABOUTME: principal is the agent side of the binding.

use super::Store;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    Agent,
    Client,
    Member,
    Service,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalType::Agent => "agent",
            PrincipalType::Client => "client",
            PrincipalType::Member => "member",
            PrincipalType::Service => "service",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "agent" => Ok(PrincipalType::Agent),
            "client" => Ok(PrincipalType::Client),
            "member" => Ok(PrincipalType::Member),
            "service" => Ok(PrincipalType::Service),
            other => Err(GatewayError::Invalid(format!("unknown principal type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalStatus {
    Pending,
    Approved,
    Revoked,
    Online,
    Offline,
}

impl PrincipalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalStatus::Pending => "pending",
            PrincipalStatus::Approved => "approved",
            PrincipalStatus::Revoked => "revoked",
            PrincipalStatus::Online => "online",
            PrincipalStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PrincipalStatus::Pending),
            "approved" => Ok(PrincipalStatus::Approved),
            "revoked" => Ok(PrincipalStatus::Revoked),
            "online" => Ok(PrincipalStatus::Online),
            "offline" => Ok(PrincipalStatus::Offline),
            other => Err(GatewayError::Invalid(format!("unknown principal status: {other}"))),
        }
    }

    /// Only these statuses may authenticate.
    pub fn may_authenticate(&self) -> bool {
        matches!(
            self,
            PrincipalStatus::Approved | PrincipalStatus::Online | PrincipalStatus::Offline
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub principal_type: PrincipalType,
    pub display_name: String,
    pub pubkey: Option<String>,
    pub pubkey_fingerprint: Option<String>,
    pub status: PrincipalStatus,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub fn create_principal(
        &self,
        principal_type: PrincipalType,
        display_name: &str,
        pubkey: Option<&str>,
        pubkey_fingerprint: Option<&str>,
    ) -> Result<Principal> {
        let principal = Principal {
            id: uuid::Uuid::new_v4().to_string(),
            principal_type,
            display_name: display_name.to_string(),
            pubkey: pubkey.map(str::to_string),
            pubkey_fingerprint: pubkey_fingerprint.map(str::to_string),
            status: PrincipalStatus::Pending,
            created_at: Utc::now(),
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO principals
                (id, principal_type, display_name, pubkey, pubkey_fingerprint, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                principal.id,
                principal.principal_type.as_str(),
                principal.display_name,
                principal.pubkey,
                principal.pubkey_fingerprint,
                principal.status.as_str(),
                principal.created_at.to_rfc3339(),
            ],
        )?;

        Ok(principal)
    }

    pub fn get_principal(&self, id: &str) -> Result<Principal> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, principal_type, display_name, pubkey, pubkey_fingerprint, status, created_at
             FROM principals WHERE id = ?1",
        )?;
        let principal = stmt
            .query_row(params![id], row_to_principal)
            .optional()?
            .ok_or(GatewayError::NotFound)?;
        Ok(principal)
    }

    pub fn list_principals(&self, filter_type: Option<PrincipalType>) -> Result<Vec<Principal>> {
        let db = self.db.lock().unwrap();
        let mut results = Vec::new();
        if let Some(pt) = filter_type {
            let mut stmt = db.prepare(
                "SELECT id, principal_type, display_name, pubkey, pubkey_fingerprint, status, created_at
                 FROM principals WHERE principal_type = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![pt.as_str()], row_to_principal)?;
            for row in rows {
                results.push(row?);
            }
        } else {
            let mut stmt = db.prepare(
                "SELECT id, principal_type, display_name, pubkey, pubkey_fingerprint, status, created_at
                 FROM principals ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_principal)?;
            for row in rows {
                results.push(row?);
            }
        }
        Ok(results)
    }

    pub fn set_principal_status(&self, id: &str, status: PrincipalStatus) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE principals SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(GatewayError::NotFound);
        }
        Ok(())
    }

    /// Delete a principal. Cascades to bindings where this principal is the agent.
    pub fn delete_principal(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute("DELETE FROM principals WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(GatewayError::NotFound);
        }
        db.execute("DELETE FROM bindings WHERE agent_id = ?1", params![id])?;
        db.execute(
            "DELETE FROM role_assignments WHERE subject_kind = 'principal' AND subject_id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn add_role(&self, subject_id: &str, role_name: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO role_assignments (subject_kind, subject_id, role_name)
             VALUES ('principal', ?1, ?2)",
            params![subject_id, role_name],
        )?;
        Ok(())
    }

    pub fn remove_role(&self, subject_id: &str, role_name: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM role_assignments WHERE subject_kind = 'principal' AND subject_id = ?1 AND role_name = ?2",
            params![subject_id, role_name],
        )?;
        Ok(())
    }

    pub fn list_roles(&self, subject_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT role_name FROM role_assignments WHERE subject_kind = 'principal' AND subject_id = ?1",
        )?;
        let rows = stmt.query_map(params![subject_id], |row| row.get::<_, String>(0))?;
        let mut roles = Vec::new();
        for row in rows {
            roles.push(row?);
        }
        Ok(roles)
    }
}

fn row_to_principal(row: &rusqlite::Row) -> rusqlite::Result<Principal> {
    let principal_type: String = row.get(1)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(Principal {
        id: row.get(0)?,
        principal_type: PrincipalType::parse(&principal_type)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        display_name: row.get(2)?,
        pubkey: row.get(3)?,
        pubkey_fingerprint: row.get(4)?,
        status: PrincipalStatus::parse(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
    })
}
