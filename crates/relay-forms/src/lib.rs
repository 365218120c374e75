//! Form-lifecycle handlers for the relay bus.
//!
//! [`FormAssistant::install`] subscribes one assistant to every inbound form
//! event. Requests that need the model go out as `llm:request` and come back
//! through the `llm:response` handler, joined by request id.

mod assistant;
pub mod extract;
pub mod prompts;

pub use assistant::{
    FormAssistant, FormsSettings, GENERIC_ERROR_SUMMARY, SENTINEL_ANSWER, SENTINEL_EXPLANATION,
};
pub use extract::extract_json_object;
