use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use relay_core::{Channel, ChannelHooks, ConversationLog, CorrelationRegistry, FormBus};
use relay_events::StreamHub;
use serde_json::Value;
use tracing::info;

/// Counts live WebSocket channels.
#[derive(Default)]
pub(crate) struct ConnectionGauge {
    live: AtomicUsize,
}

impl ConnectionGauge {
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl ChannelHooks for ConnectionGauge {
    fn on_connect(&self, channel: &Channel, params: &Value) {
        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        info!(channel = %channel.id(), stream = channel.stream_key(), %params, live, "client connected");
    }

    fn on_disconnect(&self, channel: &Channel) {
        let live = self
            .live
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        info!(channel = %channel.id(), live, "client disconnected");
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    bus: Arc<FormBus>,
    hub: StreamHub,
    registry: Arc<CorrelationRegistry>,
    log: Arc<dyn ConversationLog>,
    connections: Arc<ConnectionGauge>,
    stream_prefix: Arc<str>,
}

impl AppState {
    pub(crate) fn new(
        bus: Arc<FormBus>,
        hub: StreamHub,
        registry: Arc<CorrelationRegistry>,
        log: Arc<dyn ConversationLog>,
        stream_prefix: &str,
    ) -> Self {
        Self {
            bus,
            hub,
            registry,
            log,
            connections: Arc::new(ConnectionGauge::default()),
            stream_prefix: Arc::from(stream_prefix),
        }
    }

    pub(crate) fn bus(&self) -> Arc<FormBus> {
        self.bus.clone()
    }

    pub(crate) fn hub(&self) -> &StreamHub {
        &self.hub
    }

    pub(crate) fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub(crate) fn log(&self) -> Arc<dyn ConversationLog> {
        self.log.clone()
    }

    pub(crate) fn connections(&self) -> &Arc<ConnectionGauge> {
        &self.connections
    }

    pub(crate) fn stream_prefix(&self) -> &str {
        &self.stream_prefix
    }
}
