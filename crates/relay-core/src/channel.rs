//! Per-connection routing identity.
//!
//! A [`Channel`] is created when a client subscribes and dropped when it
//! disconnects. It owns no domain data: only the stream keys outbound events
//! for its client are published to, and the means to hand inbound envelopes to
//! the bus with itself as the originating context.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use relay_events::{EmitReport, StreamHub};
use relay_protocol::{DecodeError, Envelope, Inbound};
use relay_topics as topics;

use crate::conversation::ConversationId;
use crate::correlation::CorrelationRegistry;
use crate::FormBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(uuid::Uuid);

impl ChannelId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Optional lifecycle callbacks supplied by the transport host.
pub trait ChannelHooks: Send + Sync {
    fn on_connect(&self, _channel: &Channel, _params: &Value) {}
    fn on_disconnect(&self, _channel: &Channel) {}
}

pub struct NoHooks;

impl ChannelHooks for NoHooks {}

/// Receivers for a channel's own stream and its prefix-wide broadcast stream.
pub struct ChannelStreams {
    pub direct: broadcast::Receiver<Envelope>,
    pub broadcast: broadcast::Receiver<Envelope>,
}

impl ChannelStreams {
    /// Everything currently queued, direct stream first. Lagged gaps are skipped.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        for rx in [&mut self.direct, &mut self.broadcast] {
            loop {
                match rx.try_recv() {
                    Ok(env) => out.push(env),
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        }
        out
    }
}

pub struct Channel {
    id: ChannelId,
    stream_key: String,
    broadcast_key: String,
    hub: StreamHub,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("stream_key", &self.stream_key)
            .finish()
    }
}

impl Channel {
    /// Creates a channel for `page_id` under `prefix`, joins its streams and
    /// runs the connect hook. The returned receivers are subscribed before the
    /// hook runs, so nothing the hook emits is lost.
    pub fn subscribe(
        hub: &StreamHub,
        prefix: &str,
        page_id: Option<&str>,
        params: &Value,
        hooks: &dyn ChannelHooks,
    ) -> (Arc<Channel>, ChannelStreams) {
        let page = match page_id.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) if p.eq_ignore_ascii_case(topics::BROADCAST_STREAM) => {
                warn!(page = p, "reserved page id; using the default page");
                topics::DEFAULT_PAGE
            }
            Some(p) => p,
            None => topics::DEFAULT_PAGE,
        };
        let channel = Arc::new(Channel {
            id: ChannelId::generate(),
            stream_key: format!("{prefix}:{page}"),
            broadcast_key: format!("{prefix}:{}", topics::BROADCAST_STREAM),
            hub: hub.clone(),
        });
        let streams = ChannelStreams {
            direct: hub.subscribe(&channel.stream_key),
            broadcast: hub.subscribe(&channel.broadcast_key),
        };
        info!(channel = %channel.id, stream = %channel.stream_key, "channel subscribed");
        hooks.on_connect(&channel, params);
        (channel, streams)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn broadcast_key(&self) -> &str {
        &self.broadcast_key
    }

    /// One page is one conversation.
    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::new(self.stream_key.clone())
    }

    /// Decodes a raw envelope and dispatches it with this channel as context.
    pub fn receive(self: &Arc<Self>, bus: &FormBus, raw: Envelope) -> Result<EmitReport, DecodeError> {
        let inbound = Inbound::decode(raw)?;
        debug!(channel = %self.id, event = inbound.name(), "inbound event");
        Ok(bus.emit(&inbound, &DispatchContext::for_channel(Arc::clone(self))))
    }

    /// Sends one envelope to this channel's own stream.
    pub fn emit_to_client<T: Serialize>(&self, event: &str, data: &T) -> usize {
        debug!(channel = %self.id, event, "outbound event");
        self.hub.publish_event(&self.stream_key, event, data)
    }

    /// Sends one envelope to an arbitrary stream.
    pub fn broadcast<T: Serialize>(&self, stream_key: &str, event: &str, data: &T) -> usize {
        self.hub.publish_event(stream_key, event, data)
    }

    /// Runs the disconnect hook and abandons every request still pending on
    /// this channel. Returns the number of abandoned requests.
    pub fn unsubscribe(&self, registry: &CorrelationRegistry, hooks: &dyn ChannelHooks) -> usize {
        hooks.on_disconnect(self);
        let abandoned = registry.abandon_channel(self.id);
        info!(channel = %self.id, stream = %self.stream_key, abandoned, "channel unsubscribed");
        abandoned
    }
}

/// Context handed to every handler alongside the event.
#[derive(Clone, Debug, Default)]
pub struct DispatchContext {
    pub channel: Option<Arc<Channel>>,
}

impl DispatchContext {
    pub fn for_channel(channel: Arc<Channel>) -> Self {
        Self {
            channel: Some(channel),
        }
    }

    /// Context for deliveries that did not arrive through a channel.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.channel.as_ref().map(|c| c.conversation_id())
    }
}
