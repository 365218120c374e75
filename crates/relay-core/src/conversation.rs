//! Append-only conversation log and the turn records that hang off it.
//!
//! Storage is a collaborator: anything implementing [`ConversationLog`] and
//! [`TurnStore`] can back the handlers. [`MemoryStore`] is the in-process
//! implementation; `relay-kernel` provides a SQLite one.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use relay_protocol::Role;

use crate::now_rfc3339;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Opened,
    Polled,
    StateChanged,
    UserInput,
    ContextUpdated,
    HelpRequested,
    ErrorsReported,
    AssistantResponded,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Opened => "opened",
            EventType::Polled => "polled",
            EventType::StateChanged => "state-changed",
            EventType::UserInput => "user-input",
            EventType::ContextUpdated => "context-updated",
            EventType::HelpRequested => "help-requested",
            EventType::ErrorsReported => "errors-reported",
            EventType::AssistantResponded => "assistant-responded",
        }
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "opened" => EventType::Opened,
            "polled" => EventType::Polled,
            "state-changed" => EventType::StateChanged,
            "user-input" => EventType::UserInput,
            "context-updated" => EventType::ContextUpdated,
            "help-requested" => EventType::HelpRequested,
            "errors-reported" => EventType::ErrorsReported,
            "assistant-responded" => EventType::AssistantResponded,
            other => anyhow::bail!("unknown conversation event type: {other}"),
        };
        Ok(kind)
    }
}

/// Event to be appended; the store assigns sequence and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConversationEvent {
    pub role: Role,
    pub kind: EventType,
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl NewConversationEvent {
    pub fn new(role: Role, kind: EventType, content: impl Into<String>) -> Self {
        Self {
            role,
            kind,
            content: content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub seq: i64,
    pub conversation_id: ConversationId,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub content: String,
    pub timestamp: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub content: String,
}

/// Projects a conversation onto its transcript, preserving append order.
pub fn replay(events: &[ConversationEvent]) -> Vec<TranscriptEntry> {
    events
        .iter()
        .map(|e| TranscriptEntry {
            role: e.role,
            kind: e.kind,
            content: e.content.clone(),
        })
        .collect()
}

pub trait ConversationLog: Send + Sync {
    fn append(
        &self,
        conversation: &ConversationId,
        event: NewConversationEvent,
    ) -> Result<ConversationEvent>;

    /// Events of one conversation in append order.
    fn read(&self, conversation: &ConversationId) -> Result<Vec<ConversationEvent>>;

    /// Conversations with at least one event, most recent activity first.
    fn conversations(&self, limit: usize) -> Result<Vec<ConversationId>>;

    fn transcript(&self, conversation: &ConversationId) -> Result<Vec<TranscriptEntry>> {
        Ok(replay(&self.read(conversation)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(String);

impl TurnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("turn-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub conversation_id: ConversationId,
    pub request: Value,
    pub completion: Option<String>,
    pub created: String,
    pub completed: Option<String>,
}

pub trait TurnStore: Send + Sync {
    fn create(&self, conversation: &ConversationId, request: &Value) -> Result<TurnId>;

    /// Records the completion text. Returns false when the turn is unknown or
    /// was already completed; a turn is completed at most once.
    fn complete(&self, turn: &TurnId, completion: &str) -> Result<bool>;

    fn get(&self, turn: &TurnId) -> Result<Option<Turn>>;
}

#[derive(Default)]
struct MemoryInner {
    next_seq: i64,
    conversations: HashMap<ConversationId, Vec<ConversationEvent>>,
    turns: HashMap<TurnId, Turn>,
}

/// Process-local store. Appends are serialized by one mutex, which gives
/// read-your-writes per conversation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationLog for MemoryStore {
    fn append(
        &self,
        conversation: &ConversationId,
        event: NewConversationEvent,
    ) -> Result<ConversationEvent> {
        let mut inner = self.inner.lock();
        inner.next_seq += 1;
        let stored = ConversationEvent {
            seq: inner.next_seq,
            conversation_id: conversation.clone(),
            role: event.role,
            kind: event.kind,
            content: event.content,
            timestamp: now_rfc3339(),
            metadata: Value::Object(event.metadata),
        };
        inner
            .conversations
            .entry(conversation.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn read(&self, conversation: &ConversationId) -> Result<Vec<ConversationEvent>> {
        Ok(self
            .inner
            .lock()
            .conversations
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    fn conversations(&self, limit: usize) -> Result<Vec<ConversationId>> {
        let inner = self.inner.lock();
        let mut latest: Vec<(i64, &ConversationId)> = inner
            .conversations
            .iter()
            .filter_map(|(id, events)| events.last().map(|e| (e.seq, id)))
            .collect();
        latest.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(latest
            .into_iter()
            .take(limit)
            .map(|(_, id)| id.clone())
            .collect())
    }
}

impl TurnStore for MemoryStore {
    fn create(&self, conversation: &ConversationId, request: &Value) -> Result<TurnId> {
        let id = TurnId::generate();
        let turn = Turn {
            id: id.clone(),
            conversation_id: conversation.clone(),
            request: request.clone(),
            completion: None,
            created: now_rfc3339(),
            completed: None,
        };
        self.inner.lock().turns.insert(id.clone(), turn);
        Ok(id)
    }

    fn complete(&self, turn: &TurnId, completion: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.turns.get_mut(turn) {
            Some(t) if t.completed.is_none() => {
                t.completion = Some(completion.to_string());
                t.completed = Some(now_rfc3339());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self, turn: &TurnId) -> Result<Option<Turn>> {
        Ok(self.inner.lock().turns.get(turn).cloned())
    }
}
