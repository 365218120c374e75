use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::inbound::PageContent;
use crate::Role;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Generation options forwarded to the inference bridge untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmRequest {
    pub request_id: String,
    pub messages: Vec<LlmMessage>,
    pub options: GenerationOptions,
}

/// Uncorrelated warm-up request; its result is never joined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmPrime {
    pub messages: Vec<LlmMessage>,
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResult {
    pub ok: bool,
    pub answer: String,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SidebarMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldHelpResponse {
    pub field_name: String,
    pub help: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSuggestions {
    pub suggestions: Map<String, Value>,
    pub summary: String,
    pub turn_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormStats {
    pub filled: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focused_field: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppContext {
    pub conversation_id: String,
    pub filled: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextAnalyze {
    pub page_content: PageContent,
    pub app_context: AppContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextDisplay {
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextReady {
    pub system_prompt_patch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolError {
    pub event: String,
    pub detail: String,
}
