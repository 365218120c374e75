use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Form fields keyed by input name, as scraped by the browser extension.
pub type FieldMap = BTreeMap<String, FieldState>;

/// One scraped form field. The extension normally sends
/// `{value, label?, required?}` but older builds send the bare value; both
/// shapes decode into the same type.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(from = "RawField")]
pub struct FieldState {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub required: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawField {
    Full {
        #[serde(default)]
        value: Value,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        required: bool,
    },
    Bare(Value),
}

impl From<RawField> for FieldState {
    fn from(raw: RawField) -> Self {
        match raw {
            RawField::Full {
                value,
                label,
                required,
            } => FieldState {
                value,
                label,
                required,
            },
            RawField::Bare(value) => FieldState {
                value,
                ..Default::default()
            },
        }
    }
}

impl FieldState {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: Value::String(value.into()),
            ..Default::default()
        }
    }

    /// Value rendered for prompts; null renders empty.
    pub fn display_value(&self) -> String {
        match &self.value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_filled(&self) -> bool {
        match &self.value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Bool(b) => *b,
            _ => true,
        }
    }
}

/// Filled-versus-total counts for quick UI feedback.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
pub struct FieldStats {
    pub filled: usize,
    pub total: usize,
}

impl FieldStats {
    pub fn from_fields(fields: &FieldMap) -> Self {
        Self {
            filled: fields.values().filter(|f| f.is_filled()).count(),
            total: fields.len(),
        }
    }
}
