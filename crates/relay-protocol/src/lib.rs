use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod fields;
pub mod inbound;
pub mod outbound;

pub use fields::{FieldMap, FieldState, FieldStats};
pub use inbound::{DecodeError, Inbound};

/// Wire envelope used in both directions of the duplex stream.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Envelope {
    pub event: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

impl Envelope {
    /// Builds an envelope from any serializable payload. A payload that fails
    /// to serialize is replaced by a marker object rather than dropped.
    pub fn new<T: Serialize>(event: &str, data: &T) -> Self {
        let data =
            serde_json::to_value(data).unwrap_or_else(|_| serde_json::json!({"_ser":"error"}));
        Self {
            event: event.to_string(),
            data,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Speaker of a message or conversation event.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_slug(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// RFC7807-style error payload used at service edges.
#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ProblemDetails {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: Option<String>,
    pub instance: Option<String>,
}

impl ProblemDetails {
    pub fn new(status: u16, title: impl Into<String>) -> Self {
        Self {
            r#type: "about:blank".to_string(),
            title: title.into(),
            status,
            detail: None,
            instance: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
