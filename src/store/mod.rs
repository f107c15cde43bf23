// ABOUTME: Durable store for principals, roles, bindings, ledger events, and audit entries.
// ABOUTME: Single-writer rusqlite connection behind a mutex; reads and writes both go through it.

pub mod audit;
pub mod bindings;
pub mod ledger;
pub mod principals;

pub use audit::AuditEntry;
pub use bindings::Binding;
pub use ledger::{Cursor, Direction, EventType, GetEventsParams, GetEventsPage, LedgerEvent, SortOrder};
pub use principals::{Principal, PrincipalStatus, PrincipalType};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            db: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            db: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let db = self.db.lock().unwrap();
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS principals (
                id TEXT PRIMARY KEY,
                principal_type TEXT NOT NULL,
                display_name TEXT NOT NULL,
                pubkey TEXT,
                pubkey_fingerprint TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS role_assignments (
                subject_kind TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                role_name TEXT NOT NULL,
                PRIMARY KEY (subject_kind, subject_id, role_name)
            );

            CREATE TABLE IF NOT EXISTS bindings (
                id TEXT PRIMARY KEY,
                frontend TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                created_by TEXT,
                UNIQUE(frontend, channel_id)
            );

            CREATE TABLE IF NOT EXISTS ledger_events (
                id TEXT PRIMARY KEY,
                conversation_key TEXT NOT NULL,
                thread_id TEXT,
                direction TEXT NOT NULL,
                author TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                text TEXT,
                raw_transport TEXT,
                raw_payload_ref TEXT,
                actor_principal_id TEXT,
                actor_member_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_ledger_conversation
                ON ledger_events(conversation_key, timestamp, id);
            CREATE INDEX IF NOT EXISTS idx_ledger_thread
                ON ledger_events(thread_id, timestamp, id);
            CREATE INDEX IF NOT EXISTS idx_ledger_actor
                ON ledger_events(actor_principal_id, timestamp, id);

            CREATE TABLE IF NOT EXISTS audit_entries (
                id TEXT PRIMARY KEY,
                actor_principal_id TEXT NOT NULL,
                action TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                detail_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);
            ",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_initializes_schema_idempotently() {
        let store = Store::open_in_memory().unwrap();
        // Calling init again must not fail (IF NOT EXISTS everywhere).
        store.init_schema().unwrap();
    }
}
