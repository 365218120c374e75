use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use jsonschema::{validator_for, Validator};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{ModelHandle, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};

pub const DEFAULT_STREAM_PREFIX: &str = "forms";
pub const DEFAULT_SENTINEL_FIELD: &str = "e_pluribus_unum";
pub const DEFAULT_SENTINEL_PHRASE: &str = "easter egg";
pub const DEFAULT_PENDING_TTL_SECS: u64 = 600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Listen address, e.g. "127.0.0.1".
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Concurrent HTTP requests admitted by the server.
    #[serde(default)]
    pub max_connections: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FormsConfig {
    /// Channel stream prefix; pages publish to "{prefix}:{page_id}".
    #[serde(default)]
    pub stream_prefix: Option<String>,
    /// Field whose value can short-circuit validation.
    #[serde(default)]
    pub sentinel_field: Option<String>,
    #[serde(default)]
    pub sentinel_phrase: Option<String>,
}

impl FormsConfig {
    pub fn stream_prefix(&self) -> &str {
        self.stream_prefix.as_deref().unwrap_or(DEFAULT_STREAM_PREFIX)
    }

    pub fn sentinel_field(&self) -> &str {
        self.sentinel_field.as_deref().unwrap_or(DEFAULT_SENTINEL_FIELD)
    }

    pub fn sentinel_phrase(&self) -> &str {
        self.sentinel_phrase.as_deref().unwrap_or(DEFAULT_SENTINEL_PHRASE)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CorrelationConfig {
    /// Seconds a request may stay pending before the sweep drops it.
    #[serde(default)]
    pub pending_ttl_secs: Option<u64>,
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl CorrelationConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs.unwrap_or(DEFAULT_PENDING_TTL_SECS))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.sweep_interval_secs
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                .max(1),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Inference target id. Without it no `llm:request` is issued.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn handle(&self) -> Option<ModelHandle> {
        let id = self.id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some(ModelHandle {
            id: id.to_string(),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Option<StorageBackend>,
    /// Directory for the SQLite database.
    #[serde(default)]
    pub state_dir: Option<String>,
}

impl StorageConfig {
    pub fn backend(&self) -> StorageBackend {
        self.backend.unwrap_or_default()
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(self.state_dir.as_deref().unwrap_or("state"))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub forms: FormsConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Returns the JSON schema describing the configuration structure.
pub fn config_schema_json() -> Result<serde_json::Value> {
    let schema = schemars::schema_for!(Config);
    Ok(serde_json::to_value(&schema)?)
}

fn validator() -> Result<Validator> {
    let schema = config_schema_json()?;
    validator_for(&schema).map_err(|e| anyhow!("invalid config schema: {e}"))
}

/// Parses TOML text, rejecting anything the schema does not allow.
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validator = validator()?;
    let validation_errors: Vec<_> = validator
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(content)?;
    Ok(cfg)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config {}", path.display()))
}
