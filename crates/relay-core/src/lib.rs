//! Core of the form-assistant relay: channels, the correlation registry,
//! the conversation log contract and configuration.

pub mod channel;
pub mod config;
pub mod conversation;
pub mod correlation;
pub mod model;

pub use channel::{Channel, ChannelHooks, ChannelId, ChannelStreams, DispatchContext, NoHooks};
pub use config::{
    config_schema_json, load_config, parse_config, Config, CorrelationConfig, FormsConfig,
    ModelConfig, ServerConfig, StorageBackend, StorageConfig,
};
pub use conversation::{
    replay, ConversationEvent, ConversationId, ConversationLog, EventType, MemoryStore,
    NewConversationEvent, TranscriptEntry, Turn, TurnId, TurnStore,
};
pub use correlation::{new_request_id, CorrelationError, CorrelationRegistry, PendingRequest, Purpose};
pub use model::{ConfiguredModel, ModelHandle, ModelLookup};

/// The bus every inbound handler subscribes to.
pub type FormBus = relay_events::EventBus<relay_protocol::Inbound, DispatchContext>;

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
