//! Pending inference round-trips keyed by request id.
//!
//! A handler that sends `llm:request` stores a [`PendingRequest`] here first;
//! the `llm:response` handler takes it back out. `take` removes atomically, so
//! a request is consumed at most once no matter how many responses arrive.
//! Entries are in-memory only and do not survive a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::channel::{Channel, ChannelId};
use crate::conversation::{ConversationId, TurnId};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("request id {request_id} is already pending")]
    Collision { request_id: String },
}

/// Which response branch an `llm:response` is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purpose {
    Validation,
    FieldHelp { field_name: String },
    ErrorResolution,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Validation => "validation",
            Purpose::FieldHelp { .. } => "field_help",
            Purpose::ErrorResolution => "error_resolution",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: String,
    pub channel: Arc<Channel>,
    pub conversation_id: ConversationId,
    pub turn_id: TurnId,
    pub purpose: Purpose,
    pub extra: Map<String, Value>,
    pub created_at: Instant,
}

impl PendingRequest {
    pub fn new(
        request_id: impl Into<String>,
        channel: Arc<Channel>,
        conversation_id: ConversationId,
        turn_id: TurnId,
        purpose: Purpose,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            channel,
            conversation_id,
            turn_id,
            purpose,
            extra: Map::new(),
            created_at: Instant::now(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Fresh correlation token backed by a random UUIDv4.
pub fn new_request_id() -> String {
    format!("req-{}", uuid::Uuid::new_v4().simple())
}

#[derive(Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a pending request. A request id that is already pending is
    /// rejected and the existing entry is left untouched.
    pub fn put(&self, pending: PendingRequest) -> Result<(), CorrelationError> {
        use std::collections::hash_map::Entry;

        let mut map = self.pending.lock();
        match map.entry(pending.request_id.clone()) {
            Entry::Occupied(_) => Err(CorrelationError::Collision {
                request_id: pending.request_id,
            }),
            Entry::Vacant(slot) => {
                debug!(
                    request_id = %pending.request_id,
                    purpose = pending.purpose.as_str(),
                    channel = %pending.channel.id(),
                    "pending request stored"
                );
                slot.insert(pending);
                Ok(())
            }
        }
    }

    /// Removes and returns the pending request, or `None` when it was never
    /// stored, already consumed, or abandoned.
    pub fn take(&self, request_id: &str) -> Option<PendingRequest> {
        self.pending.lock().remove(request_id)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.pending.lock().contains_key(request_id)
    }

    /// Drops every request owned by a channel that went away.
    pub fn abandon_channel(&self, channel: ChannelId) -> usize {
        let mut map = self.pending.lock();
        let before = map.len();
        map.retain(|_, p| p.channel.id() != channel);
        let abandoned = before - map.len();
        if abandoned > 0 {
            info!(channel = %channel, abandoned, "abandoned pending requests on disconnect");
        }
        abandoned
    }

    /// Drops requests that have waited at least `ttl`.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        self.sweep_expired_at(Instant::now(), ttl)
    }

    pub fn sweep_expired_at(&self, now: Instant, ttl: Duration) -> usize {
        let mut map = self.pending.lock();
        let before = map.len();
        map.retain(|_, p| now.saturating_duration_since(p.created_at) < ttl);
        let expired = before - map.len();
        if expired > 0 {
            info!(expired, ttl_secs = ttl.as_secs(), "expired pending requests");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::NoHooks;
    use proptest::prelude::*;
    use relay_events::StreamHub;
    use serde_json::json;

    fn channel(page: &str) -> Arc<Channel> {
        let hub = StreamHub::new(4);
        Channel::subscribe(&hub, "forms", Some(page), &json!({}), &NoHooks).0
    }

    fn pending(id: &str, ch: &Arc<Channel>, purpose: Purpose) -> PendingRequest {
        PendingRequest::new(
            id,
            Arc::clone(ch),
            ch.conversation_id(),
            TurnId::new(format!("turn-{id}")),
            purpose,
        )
    }

    #[test]
    fn take_consumes_exactly_once() {
        let reg = CorrelationRegistry::new();
        let ch = channel("p");
        reg.put(pending("req-1", &ch, Purpose::Validation)).unwrap();
        let first = reg.take("req-1").expect("pending");
        assert_eq!(first.purpose, Purpose::Validation);
        assert!(reg.take("req-1").is_none());
        assert!(reg.take("never-stored").is_none());
    }

    #[test]
    fn colliding_put_is_rejected_and_keeps_original() {
        let reg = CorrelationRegistry::new();
        let ch = channel("p");
        reg.put(pending("req-1", &ch, Purpose::Validation)).unwrap();
        let err = reg
            .put(pending("req-1", &ch, Purpose::ErrorResolution))
            .unwrap_err();
        assert_eq!(
            err,
            CorrelationError::Collision {
                request_id: "req-1".into()
            }
        );
        assert_eq!(reg.take("req-1").unwrap().purpose, Purpose::Validation);
    }

    #[test]
    fn abandon_channel_only_drops_that_channels_entries() {
        let reg = CorrelationRegistry::new();
        let gone = channel("a");
        let stays = channel("a");
        reg.put(pending("r1", &gone, Purpose::Validation)).unwrap();
        reg.put(pending("r2", &gone, Purpose::ErrorResolution)).unwrap();
        reg.put(pending("r3", &stays, Purpose::Validation)).unwrap();
        assert_eq!(reg.abandon_channel(gone.id()), 2);
        assert_eq!(reg.len(), 1);
        assert!(reg.contains("r3"));
    }

    #[test]
    fn sweep_drops_only_entries_past_ttl() {
        let reg = CorrelationRegistry::new();
        let ch = channel("p");
        let now = Instant::now();
        let mut old = pending("old", &ch, Purpose::Validation);
        old.created_at = now;
        reg.put(old).unwrap();
        let mut fresh = pending("fresh", &ch, Purpose::Validation);
        fresh.created_at = now + Duration::from_secs(100);
        reg.put(fresh).unwrap();
        let later = now + Duration::from_secs(120);
        assert_eq!(reg.sweep_expired_at(later, Duration::from_secs(60)), 1);
        assert!(reg.contains("fresh"));
        assert!(!reg.contains("old"));
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = new_request_id();
        let b = new_request_id();
        assert!(a.starts_with("req-"));
        assert_ne!(a, b);
    }

    #[test]
    fn concurrent_takes_hand_out_one_winner() {
        let reg = Arc::new(CorrelationRegistry::new());
        let ch = channel("p");
        reg.put(pending("req-race", &ch, Purpose::Validation)).unwrap();
        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let reg = Arc::clone(&reg);
                    s.spawn(move || usize::from(reg.take("req-race").is_some()))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
    }

    proptest! {
        #[test]
        fn every_put_is_taken_at_most_once(ids in proptest::collection::hash_set("[a-z0-9]{1,12}", 1..32)) {
            let reg = CorrelationRegistry::new();
            let ch = channel("prop");
            for id in &ids {
                reg.put(pending(id, &ch, Purpose::Validation)).unwrap();
            }
            for id in &ids {
                prop_assert!(reg.take(id).is_some());
                prop_assert!(reg.take(id).is_none());
            }
            prop_assert!(reg.is_empty());
        }
    }
}
