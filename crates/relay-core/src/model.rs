use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use relay_protocol::outbound::GenerationOptions;

pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_TOKENS: u32 = 512;

/// The inference target requests are addressed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub id: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn options(&self, format: Option<&str>) -> GenerationOptions {
        GenerationOptions {
            model: self.id.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            format: format.map(str::to_string),
        }
    }
}

/// Resolves the inference target in effect right now, if any.
pub trait ModelLookup: Send + Sync {
    fn current(&self) -> Option<ModelHandle>;
}

/// Model selection held in memory and swappable at runtime.
#[derive(Default)]
pub struct ConfiguredModel {
    current: RwLock<Option<ModelHandle>>,
}

impl ConfiguredModel {
    pub fn new(model: Option<ModelHandle>) -> Self {
        Self {
            current: RwLock::new(model),
        }
    }

    pub fn set(&self, model: Option<ModelHandle>) {
        *self.current.write() = model;
    }
}

impl ModelLookup for ConfiguredModel {
    fn current(&self) -> Option<ModelHandle> {
        self.current.read().clone()
    }
}
