//! Dispatch primitives: a synchronous named-event bus for inbound handlers and
//! a keyed broadcast hub for outbound streams.

mod bus;
mod hub;

pub use bus::{EmitReport, EventBus, Handler, HandlerFailure, HandlerId, Named};
pub use hub::StreamHub;
pub use relay_protocol::Envelope;

impl Named for relay_protocol::Inbound {
    fn name(&self) -> &str {
        relay_protocol::Inbound::name(self)
    }
}

impl Named for Envelope {
    fn name(&self) -> &str {
        &self.event
    }
}
