//! Canonical event names shared by the relay crates and the browser bridge.
//!
//! This crate centralizes the string constants used on the duplex stream so
//! the handlers, the server and the tests stay in sync. Keep this list
//! alphabetized within sections; names follow the bridge's colon.case style.

// Form lifecycle (inbound)
pub const EVENT_FORM_ERRORS: &str = "form:errors";
pub const EVENT_FORM_OPEN: &str = "form:open";
pub const EVENT_FORM_POLL: &str = "form:poll";
pub const EVENT_FORM_SUBMIT: &str = "form:submit";
pub const EVENT_FIELD_HELP: &str = "field:help";

// Chat (inbound)
pub const EVENT_CHAT: &str = "chat";
pub const EVENT_CHAT_CONTEXT: &str = "chat:context";
pub const EVENT_CHAT_TYPING: &str = "chat:typing";

// Inference bridge
pub const EVENT_LLM_PRIME: &str = "llm:prime";
pub const EVENT_LLM_REQUEST: &str = "llm:request";
pub const EVENT_LLM_RESPONSE: &str = "llm:response";

// Outbound UI control
pub const EVENT_CHAT_CONTEXT_ANALYZE: &str = "chat:context:analyze";
pub const EVENT_CHAT_CONTEXT_DISPLAY: &str = "chat:context:display";
pub const EVENT_CHAT_CONTEXT_READY: &str = "chat:context:ready";
pub const EVENT_FIELD_HELP_RESPONSE: &str = "field:help:response";
pub const EVENT_FORM_ERROR_SUGGESTIONS: &str = "form:error:suggestions";
pub const EVENT_FORM_STATS: &str = "form:stats";
pub const EVENT_FORM_SUBMIT_RESULT: &str = "form:submit:result";
pub const EVENT_SIDEBAR_MESSAGE: &str = "sidebar:message";
pub const EVENT_SIDEBAR_OPEN: &str = "sidebar:open";

// Transport
pub const EVENT_PROTOCOL_ERROR: &str = "protocol:error";

/// Suffix of the shared per-prefix stream every channel joins.
pub const BROADCAST_STREAM: &str = "broadcast";
/// Page segment used when a subscriber does not name a page.
pub const DEFAULT_PAGE: &str = "default";

/// Inbound names the form assistant understands.
pub const INBOUND_EVENTS: &[&str] = &[
    EVENT_CHAT,
    EVENT_CHAT_CONTEXT,
    EVENT_CHAT_TYPING,
    EVENT_FIELD_HELP,
    EVENT_FORM_ERRORS,
    EVENT_FORM_OPEN,
    EVENT_FORM_POLL,
    EVENT_FORM_SUBMIT,
    EVENT_LLM_RESPONSE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_names_are_unique() {
        let mut names = INBOUND_EVENTS.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), INBOUND_EVENTS.len());
    }
}
