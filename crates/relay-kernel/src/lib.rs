//! SQLite-backed conversation log and turn store.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_core::conversation::{
    ConversationEvent, ConversationId, ConversationLog, EventType, NewConversationEvent, Turn,
    TurnId, TurnStore,
};
use relay_protocol::Role;

#[derive(Clone, Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
    busy: Duration,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl SqliteStore {
    /// Opens `conversations.sqlite` under `dir`. Busy timeout defaults to
    /// 5000ms; override with RELAY_SQLITE_BUSY_MS.
    pub fn open(dir: &Path) -> Result<Self> {
        let busy_ms: u64 = std::env::var("RELAY_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        Self::open_with_busy_timeout(dir, Duration::from_millis(busy_ms))
    }

    pub fn open_with_busy_timeout(dir: &Path, busy: Duration) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let store = Self {
            db_path: dir.join("conversations.sqlite"),
            busy,
        };
        let conn = store.conn()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;
        tracing::info!(path = %store.db_path.display(), "conversation store opened");
        Ok(store)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              conversation_id TEXT NOT NULL,
              role TEXT NOT NULL,
              kind TEXT NOT NULL,
              content TEXT NOT NULL,
              time TEXT NOT NULL,
              metadata TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conv_events_conv ON conversation_events(conversation_id, id);

            CREATE TABLE IF NOT EXISTS turns (
              id TEXT PRIMARY KEY,
              conversation_id TEXT NOT NULL,
              request TEXT NOT NULL,
              completion TEXT,
              created TEXT NOT NULL,
              completed TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_turns_conv ON turns(conversation_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy)?;
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");
        Ok(conn)
    }
}

impl ConversationLog for SqliteStore {
    fn append(
        &self,
        conversation: &ConversationId,
        event: NewConversationEvent,
    ) -> Result<ConversationEvent> {
        let conn = self.conn()?;
        let time = now_rfc3339();
        let metadata = Value::Object(event.metadata);
        conn.execute(
            "INSERT INTO conversation_events(conversation_id,role,kind,content,time,metadata) VALUES (?,?,?,?,?,?)",
            params![
                conversation.as_str(),
                event.role.as_str(),
                event.kind.as_str(),
                event.content,
                time,
                serde_json::to_string(&metadata)?,
            ],
        )?;
        Ok(ConversationEvent {
            seq: conn.last_insert_rowid(),
            conversation_id: conversation.clone(),
            role: event.role,
            kind: event.kind,
            content: event.content,
            timestamp: time,
            metadata,
        })
    }

    fn read(&self, conversation: &ConversationId) -> Result<Vec<ConversationEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id,role,kind,content,time,metadata FROM conversation_events WHERE conversation_id=? ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![conversation.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let role: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let metadata: String = row.get(5)?;
            out.push(ConversationEvent {
                seq: row.get(0)?,
                conversation_id: conversation.clone(),
                role: Role::from_slug(&role).ok_or_else(|| anyhow!("unknown role {role}"))?,
                kind: kind.parse::<EventType>()?,
                content: row.get(3)?,
                timestamp: row.get(4)?,
                metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
            });
        }
        Ok(out)
    }

    fn conversations(&self, limit: usize) -> Result<Vec<ConversationId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id FROM conversation_events GROUP BY conversation_id ORDER BY MAX(id) DESC LIMIT ?",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for id in rows {
            out.push(ConversationId::new(id?));
        }
        Ok(out)
    }
}

impl TurnStore for SqliteStore {
    fn create(&self, conversation: &ConversationId, request: &Value) -> Result<TurnId> {
        let id = TurnId::generate();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO turns(id,conversation_id,request,created) VALUES (?,?,?,?)",
            params![
                id.as_str(),
                conversation.as_str(),
                serde_json::to_string(request)?,
                now_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    fn complete(&self, turn: &TurnId, completion: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE turns SET completion=?, completed=? WHERE id=? AND completed IS NULL",
            params![completion, now_rfc3339(), turn.as_str()],
        )?;
        Ok(n == 1)
    }

    fn get(&self, turn: &TurnId) -> Result<Option<Turn>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT conversation_id,request,completion,created,completed FROM turns WHERE id=?",
                params![turn.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((conversation_id, request, completion, created, completed)) = row else {
            return Ok(None);
        };
        Ok(Some(Turn {
            id: turn.clone(),
            conversation_id: ConversationId::new(conversation_id),
            request: serde_json::from_str(&request).unwrap_or(Value::Null),
            completion,
            created,
            completed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_survive_reopen_in_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let conv = ConversationId::new("forms:claim-7");
        {
            let store = SqliteStore::open(dir.path()).unwrap();
            store
                .append(
                    &conv,
                    NewConversationEvent::new(Role::System, EventType::Opened, "Claim")
                        .with_metadata("fields", 4),
                )
                .unwrap();
            store
                .append(
                    &ConversationId::new("forms:other"),
                    NewConversationEvent::new(Role::User, EventType::UserInput, "noise"),
                )
                .unwrap();
            store
                .append(
                    &conv,
                    NewConversationEvent::new(Role::User, EventType::UserInput, "hello"),
                )
                .unwrap();
        }
        let store = SqliteStore::open(dir.path()).unwrap();
        let events = store.read(&conv).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventType::Opened);
        assert_eq!(events[0].metadata, json!({"fields": 4}));
        assert_eq!(events[1].content, "hello");
        assert!(events[0].seq < events[1].seq);

        let transcript = store.transcript(&conv).unwrap();
        assert_eq!(transcript, store.transcript(&conv).unwrap());
        assert_eq!(transcript[1].role, Role::User);

        let listed = store.conversations(10).unwrap();
        assert_eq!(listed, vec![conv.clone(), ConversationId::new("forms:other")]);
        assert_eq!(store.conversations(1).unwrap(), vec![conv]);
    }

    #[test]
    fn every_connection_carries_the_busy_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SqliteStore::open_with_busy_timeout(dir.path(), Duration::from_millis(1234)).unwrap();
        let conn = store.conn().unwrap();
        let busy: i64 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy, 1234);
        store
            .append(
                &ConversationId::new("forms:p"),
                NewConversationEvent::new(Role::User, EventType::UserInput, "hi"),
            )
            .unwrap();
    }

    #[test]
    fn turn_completion_is_single_shot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path()).unwrap();
        let conv = ConversationId::new("forms:p");
        let id = store.create(&conv, &json!({"messages": [1, 2]})).unwrap();
        let open = store.get(&id).unwrap().unwrap();
        assert!(open.completion.is_none());
        assert_eq!(open.request, json!({"messages": [1, 2]}));

        assert!(store.complete(&id, "{\"answer\":\"yes\"}").unwrap());
        assert!(!store.complete(&id, "late duplicate").unwrap());
        let done = store.get(&id).unwrap().unwrap();
        assert_eq!(done.completion.as_deref(), Some("{\"answer\":\"yes\"}"));
        assert!(done.completed.is_some());

        assert!(store.get(&TurnId::new("turn-missing")).unwrap().is_none());
        assert!(!store.complete(&TurnId::new("turn-missing"), "x").unwrap());
    }
}
