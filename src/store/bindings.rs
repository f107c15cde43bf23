// ABOUTME: Binding CRUD — the (frontend, channel_id) -> agent_id mapping the router consumes.

use super::Store;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub id: String,
    pub frontend: String,
    pub channel_id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

impl Store {
    /// Fails with `AlreadyExists` if `(frontend, channel_id)` is already bound.
    /// The referenced agent principal must exist at creation time.
    pub fn create_binding(
        &self,
        frontend: &str,
        channel_id: &str,
        agent_id: &str,
        created_by: Option<&str>,
    ) -> Result<Binding> {
        // Validate the agent principal exists before inserting.
        self.get_principal(agent_id)?;

        let binding = Binding {
            id: uuid::Uuid::new_v4().to_string(),
            frontend: frontend.to_string(),
            channel_id: channel_id.to_string(),
            agent_id: agent_id.to_string(),
            created_at: Utc::now(),
            created_by: created_by.map(str::to_string),
        };

        let db = self.db.lock().unwrap();
        let result = db.execute(
            "INSERT INTO bindings (id, frontend, channel_id, agent_id, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                binding.id,
                binding.frontend,
                binding.channel_id,
                binding.agent_id,
                binding.created_at.to_rfc3339(),
                binding.created_by,
            ],
        );

        match result {
            Ok(_) => Ok(binding),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(GatewayError::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_binding_by_channel(&self, frontend: &str, channel_id: &str) -> Result<Binding> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, frontend, channel_id, agent_id, created_at, created_by
             FROM bindings WHERE frontend = ?1 AND channel_id = ?2",
        )?;
        stmt.query_row(params![frontend, channel_id], row_to_binding)
            .optional()?
            .ok_or(GatewayError::NotFound)
    }

    pub fn list_bindings(&self) -> Result<Vec<Binding>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, frontend, channel_id, agent_id, created_at, created_by
             FROM bindings ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_binding)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn update_binding_agent(&self, id: &str, agent_id: &str) -> Result<Binding> {
        self.get_principal(agent_id)?;
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE bindings SET agent_id = ?1 WHERE id = ?2",
            params![agent_id, id],
        )?;
        if changed == 0 {
            return Err(GatewayError::NotFound);
        }
        let mut stmt = db.prepare(
            "SELECT id, frontend, channel_id, agent_id, created_at, created_by
             FROM bindings WHERE id = ?1",
        )?;
        stmt.query_row(params![id], row_to_binding)
            .optional()?
            .ok_or(GatewayError::NotFound)
    }

    /// Deleting a binding does not delete the agent principal it points at.
    pub fn delete_binding(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute("DELETE FROM bindings WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(GatewayError::NotFound);
        }
        Ok(())
    }
}

fn row_to_binding(row: &rusqlite::Row) -> rusqlite::Result<Binding> {
    let created_at: String = row.get(4)?;
    Ok(Binding {
        id: row.get(0)?,
        frontend: row.get(1)?,
        channel_id: row.get(2)?,
        agent_id: row.get(3)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_by: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::principals::PrincipalType;

    fn store_with_agent() -> (Store, String) {
        let store = Store::open_in_memory().unwrap();
        let agent = store
            .create_principal(PrincipalType::Agent, "a1", None, None)
            .unwrap();
        (store, agent.id)
    }

    #[test]
    fn create_get_roundtrip() {
        let (store, agent_id) = store_with_agent();
        let binding = store
            .create_binding("matrix", "!room:ex.org", &agent_id, None)
            .unwrap();
        let fetched = store.get_binding_by_channel("matrix", "!room:ex.org").unwrap();
        assert_eq!(fetched.id, binding.id);
        assert_eq!(fetched.agent_id, agent_id);
    }

    #[test]
    fn duplicate_channel_is_already_exists() {
        let (store, agent_id) = store_with_agent();
        store
            .create_binding("matrix", "!room:ex.org", &agent_id, None)
            .unwrap();
        let err = store
            .create_binding("matrix", "!room:ex.org", &agent_id, None)
            .unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists));
    }

    #[test]
    fn missing_channel_is_not_found() {
        let (store, _agent_id) = store_with_agent();
        let err = store
            .get_binding_by_channel("matrix", "!unknown:ex.org")
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound));
    }

    #[test]
    fn create_requires_existing_agent() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .create_binding("matrix", "!room:ex.org", "nonexistent-agent", None)
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound));
    }

    #[test]
    fn delete_does_not_remove_agent() {
        let (store, agent_id) = store_with_agent();
        let binding = store
            .create_binding("matrix", "!room:ex.org", &agent_id, None)
            .unwrap();
        store.delete_binding(&binding.id).unwrap();
        assert!(store.get_principal(&agent_id).is_ok());
        assert!(store
            .get_binding_by_channel("matrix", "!room:ex.org")
            .is_err());
    }

    #[test]
    fn list_returns_insertion_order() {
        let (store, agent_id) = store_with_agent();
        store.create_binding("matrix", "!a", &agent_id, None).unwrap();
        store.create_binding("slack", "C1", &agent_id, None).unwrap();
        let all = store.list_bindings().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].channel_id, "!a");
    }
}
