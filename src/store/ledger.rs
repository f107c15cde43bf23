// ABOUTME: Append-only conversation ledger with opaque keyset-pagination cursors.
// ABOUTME: Events are never mutated or deleted once written; GetEvents walks strictly forward.

use super::Store;
use crate::error::{GatewayError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    InboundToAgent,
    OutboundFromAgent,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::InboundToAgent => "inbound_to_agent",
            Direction::OutboundFromAgent => "outbound_from_agent",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "inbound_to_agent" => Ok(Direction::InboundToAgent),
            "outbound_from_agent" => Ok(Direction::OutboundFromAgent),
            other => Err(GatewayError::Invalid(format!("unknown direction: {other}"))),
        }
    }
}

/// Sort direction for `list_events_by_actor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    File,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Text => "text",
            EventType::Thinking => "thinking",
            EventType::ToolUse => "tool_use",
            EventType::ToolResult => "tool_result",
            EventType::File => "file",
            EventType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(EventType::Text),
            "thinking" => Ok(EventType::Thinking),
            "tool_use" => Ok(EventType::ToolUse),
            "tool_result" => Ok(EventType::ToolResult),
            "file" => Ok(EventType::File),
            "error" => Ok(EventType::Error),
            other => Err(GatewayError::Invalid(format!("unknown event type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: String,
    pub conversation_key: String,
    pub thread_id: Option<String>,
    pub direction: Direction,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub text: Option<String>,
    pub raw_transport: Option<String>,
    pub raw_payload_ref: Option<String>,
    pub actor_principal_id: Option<String>,
    pub actor_member_id: Option<String>,
}

/// Opaque keyset-pagination cursor: base64(timestamp "|" event_id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let raw = format!("{}|{}", self.timestamp.to_rfc3339(), self.event_id);
        URL_SAFE_NO_PAD.encode(raw)
    }

    pub fn decode(s: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| GatewayError::Invalid("malformed cursor".to_string()))?;
        let raw = String::from_utf8(raw)
            .map_err(|_| GatewayError::Invalid("malformed cursor".to_string()))?;
        let (ts, id) = raw
            .split_once('|')
            .ok_or_else(|| GatewayError::Invalid("malformed cursor".to_string()))?;
        let timestamp = DateTime::parse_from_rfc3339(ts)
            .map_err(|_| GatewayError::Invalid("malformed cursor".to_string()))?
            .with_timezone(&Utc);
        Ok(Cursor {
            timestamp,
            event_id: id.to_string(),
        })
    }
}

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone, Default)]
pub struct GetEventsParams {
    pub conversation_key: String,
    pub cursor: Option<Cursor>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct GetEventsPage {
    pub events: Vec<LedgerEvent>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub fn save_event(
        &self,
        conversation_key: &str,
        thread_id: Option<&str>,
        direction: Direction,
        author: &str,
        event_type: EventType,
        text: Option<&str>,
        raw_transport: Option<&str>,
        raw_payload_ref: Option<&str>,
        actor_principal_id: Option<&str>,
        actor_member_id: Option<&str>,
    ) -> Result<LedgerEvent> {
        let event = LedgerEvent {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_key: conversation_key.to_string(),
            thread_id: thread_id.map(str::to_string),
            direction,
            author: author.to_string(),
            timestamp: Utc::now(),
            event_type,
            text: text.map(str::to_string),
            raw_transport: raw_transport.map(str::to_string),
            raw_payload_ref: raw_payload_ref.map(str::to_string),
            actor_principal_id: actor_principal_id.map(str::to_string),
            actor_member_id: actor_member_id.map(str::to_string),
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO ledger_events
                (id, conversation_key, thread_id, direction, author, timestamp, event_type,
                 text, raw_transport, raw_payload_ref, actor_principal_id, actor_member_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.id,
                event.conversation_key,
                event.thread_id,
                event.direction.as_str(),
                event.author,
                event.timestamp.to_rfc3339(),
                event.event_type.as_str(),
                event.text,
                event.raw_transport,
                event.raw_payload_ref,
                event.actor_principal_id,
                event.actor_member_id,
            ],
        )?;
        metrics::counter!("coven_ledger_events_written_total", "direction" => event.direction.as_str())
            .increment(1);

        Ok(event)
    }

    pub fn get_event(&self, id: &str) -> Result<LedgerEvent> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!("{SELECT_COLS} WHERE id = ?1"))?;
        stmt.query_row(params![id], row_to_event)
            .optional()?
            .ok_or(GatewayError::NotFound)
    }

    /// Returns the most recent `limit` events for a thread, in ASC order: the
    /// underlying query runs DESC-limited (newest first) and the page is then
    /// reversed, rather than scanning the whole thread from the beginning.
    /// `limit` is clamped to `[1, 500]`, default 50.
    pub fn get_events_by_thread(&self, thread_id: &str, limit: Option<i64>) -> Result<Vec<LedgerEvent>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLS} WHERE thread_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![thread_id, limit], row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out.reverse();
        Ok(out)
    }

    pub fn list_events_by_actor(
        &self,
        actor_principal_id: &str,
        limit: Option<i64>,
        order: SortOrder,
    ) -> Result<Vec<LedgerEvent>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SELECT_COLS} WHERE actor_principal_id = ?1 ORDER BY timestamp {dir}, id {dir} LIMIT ?2",
            dir = order.as_sql()
        ))?;
        let rows = stmt.query_map(params![actor_principal_id, limit], row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Strictly-after keyset pagination over a conversation's events, ordered by
    /// (timestamp, id) ascending. `limit` is clamped to [1, 500], default 50.
    pub fn get_events(&self, params: GetEventsParams) -> Result<GetEventsPage> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let fetch = limit + 1;

        let db = self.db.lock().unwrap();
        let mut rows_out = Vec::new();

        if let Some(cursor) = &params.cursor {
            let mut stmt = db.prepare(&format!(
                "{SELECT_COLS} WHERE conversation_key = ?1
                 AND (timestamp > ?2 OR (timestamp = ?2 AND id > ?3))
                 ORDER BY timestamp ASC, id ASC LIMIT ?4"
            ))?;
            let rows = stmt.query_map(
                params![
                    params.conversation_key,
                    cursor.timestamp.to_rfc3339(),
                    cursor.event_id,
                    fetch
                ],
                row_to_event,
            )?;
            for row in rows {
                rows_out.push(row?);
            }
        } else {
            let mut stmt = db.prepare(&format!(
                "{SELECT_COLS} WHERE conversation_key = ?1
                 ORDER BY timestamp ASC, id ASC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![params.conversation_key, fetch], row_to_event)?;
            for row in rows {
                rows_out.push(row?);
            }
        }
        drop(db);

        let has_more = rows_out.len() as i64 > limit;
        if has_more {
            rows_out.truncate(limit as usize);
        }
        let next_cursor = rows_out.last().map(|e| {
            Cursor {
                timestamp: e.timestamp,
                event_id: e.id.clone(),
            }
            .encode()
        });

        Ok(GetEventsPage {
            events: rows_out,
            next_cursor: if has_more { next_cursor } else { None },
            has_more,
        })
    }
}

const SELECT_COLS: &str = "SELECT id, conversation_key, thread_id, direction, author, timestamp,
    event_type, text, raw_transport, raw_payload_ref, actor_principal_id, actor_member_id
    FROM ledger_events";

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<LedgerEvent> {
    let direction: String = row.get(3)?;
    let timestamp: String = row.get(5)?;
    let event_type: String = row.get(6)?;
    Ok(LedgerEvent {
        id: row.get(0)?,
        conversation_key: row.get(1)?,
        thread_id: row.get(2)?,
        direction: Direction::parse(&direction).map_err(|_| rusqlite::Error::InvalidQuery)?,
        author: row.get(4)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        event_type: EventType::parse(&event_type).map_err(|_| rusqlite::Error::InvalidQuery)?,
        text: row.get(7)?,
        raw_transport: row.get(8)?,
        raw_payload_ref: row.get(9)?,
        actor_principal_id: row.get(10)?,
        actor_member_id: row.get(11)?,
    })
}
