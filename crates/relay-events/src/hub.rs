use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use relay_protocol::Envelope;

/// Keyed broadcast streams for outbound envelopes.
///
/// Every subscriber of a key receives every envelope published to that key.
/// Streams are created lazily by the first subscriber; publishing to a key
/// nobody listens to is a no-op.
#[derive(Clone)]
pub struct StreamHub {
    streams: Arc<RwLock<HashMap<String, broadcast::Sender<Envelope>>>>,
    capacity: usize,
}

impl StreamHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<Envelope> {
        let mut streams = self.streams.write();
        streams
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns the number of receivers the envelope was handed to.
    pub fn publish(&self, key: &str, envelope: Envelope) -> usize {
        let streams = self.streams.read();
        match streams.get(key) {
            Some(tx) => tx.send(envelope).unwrap_or(0),
            None => 0,
        }
    }

    pub fn publish_event<T: Serialize>(&self, key: &str, event: &str, data: &T) -> usize {
        self.publish(key, Envelope::new(event, data))
    }

    /// Drops streams whose receivers are all gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut streams = self.streams.write();
        let before = streams.len();
        streams.retain(|_, tx| tx.receiver_count() > 0);
        before - streams.len()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }
}
