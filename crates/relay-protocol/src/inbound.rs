//! Typed inbound events, decoded once at the transport boundary.
//!
//! Every name listed in [`relay_topics::INBOUND_EVENTS`] has a payload type
//! here. Names outside that set decode to [`Inbound::Other`] so newer clients
//! can send events this server does not know yet; a known name whose payload
//! does not fit its type is a [`DecodeError`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use relay_topics as topics;

use crate::{Envelope, FieldMap};

#[derive(Debug, thiserror::Error)]
#[error("malformed `{event}` payload: {source}")]
pub struct DecodeError {
    pub event: String,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormOpen {
    #[serde(default)]
    pub form_title: Option<String>,
    #[serde(default)]
    pub fields: FieldMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormPoll {
    #[serde(default)]
    pub form_title: Option<String>,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub focused_field: Option<String>,
}

/// Page snapshot sent while the user types; unknown keys are carried through
/// untouched so they can be echoed back for analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    #[serde(default)]
    pub form_fields: FieldMap,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatTyping {
    #[serde(default)]
    pub page_content: PageContent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub system_prompt_patch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormSubmit {
    #[serde(default)]
    pub form_title: Option<String>,
    #[serde(default)]
    pub current_user: Option<String>,
    #[serde(default)]
    pub fields: FieldMap,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldHelp {
    pub field_name: String,
    #[serde(default)]
    pub field_label: Option<String>,
    #[serde(default)]
    pub form_title: Option<String>,
    #[serde(default)]
    pub fields: FieldMap,
}

/// Validation output for one field: browsers report either a single message
/// or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ValidationMessages {
    One(String),
    Many(Vec<String>),
}

impl ValidationMessages {
    pub fn joined(&self) -> String {
        match self {
            ValidationMessages::One(msg) => msg.clone(),
            ValidationMessages::Many(msgs) => msgs.join("; "),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormErrors {
    #[serde(default)]
    pub errors: BTreeMap<String, ValidationMessages>,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub form_title: Option<String>,
    #[serde(default)]
    pub current_user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    pub request_id: String,
    #[serde(default)]
    pub response: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    FormOpen(FormOpen),
    FormPoll(FormPoll),
    ChatTyping(ChatTyping),
    ChatContext(ChatContext),
    Chat(ChatMessage),
    FormSubmit(FormSubmit),
    FieldHelp(FieldHelp),
    FormErrors(FormErrors),
    LlmResponse(LlmResponse),
    Other { name: String, data: Value },
}

impl Inbound {
    pub fn decode(envelope: Envelope) -> Result<Self, DecodeError> {
        let Envelope { event, data } = envelope;
        let decoded = match event.as_str() {
            topics::EVENT_FORM_OPEN => Inbound::FormOpen(payload(&event, data)?),
            topics::EVENT_FORM_POLL => Inbound::FormPoll(payload(&event, data)?),
            topics::EVENT_CHAT_TYPING => Inbound::ChatTyping(payload(&event, data)?),
            topics::EVENT_CHAT_CONTEXT => Inbound::ChatContext(payload(&event, data)?),
            topics::EVENT_CHAT => Inbound::Chat(payload(&event, data)?),
            topics::EVENT_FORM_SUBMIT => Inbound::FormSubmit(payload(&event, data)?),
            topics::EVENT_FIELD_HELP => Inbound::FieldHelp(payload(&event, data)?),
            topics::EVENT_FORM_ERRORS => Inbound::FormErrors(payload(&event, data)?),
            topics::EVENT_LLM_RESPONSE => Inbound::LlmResponse(payload(&event, data)?),
            _ => Inbound::Other { name: event, data },
        };
        Ok(decoded)
    }

    pub fn name(&self) -> &str {
        match self {
            Inbound::FormOpen(_) => topics::EVENT_FORM_OPEN,
            Inbound::FormPoll(_) => topics::EVENT_FORM_POLL,
            Inbound::ChatTyping(_) => topics::EVENT_CHAT_TYPING,
            Inbound::ChatContext(_) => topics::EVENT_CHAT_CONTEXT,
            Inbound::Chat(_) => topics::EVENT_CHAT,
            Inbound::FormSubmit(_) => topics::EVENT_FORM_SUBMIT,
            Inbound::FieldHelp(_) => topics::EVENT_FIELD_HELP,
            Inbound::FormErrors(_) => topics::EVENT_FORM_ERRORS,
            Inbound::LlmResponse(_) => topics::EVENT_LLM_RESPONSE,
            Inbound::Other { name, .. } => name,
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError {
        event: event.to_string(),
        source,
    })
}
