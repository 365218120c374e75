use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

use relay_core::{
    new_request_id, Channel, ConversationId, ConversationLog, CorrelationRegistry,
    DispatchContext, EventType, FormBus, FormsConfig, ModelLookup, NewConversationEvent,
    PendingRequest, Purpose, TurnStore,
};
use relay_events::{Handler, HandlerId};
use relay_protocol::inbound::{
    ChatContext, ChatMessage, ChatTyping, FieldHelp, FormErrors, FormOpen, FormPoll, FormSubmit,
    LlmResponse,
};
use relay_protocol::outbound::{
    AppContext, ContextAnalyze, ContextDisplay, ContextReady, ErrorSuggestions,
    FieldHelpResponse, FormStats, LlmMessage, LlmPrime, LlmRequest, SidebarMessage, SubmitResult,
};
use relay_protocol::{FieldStats, Inbound, Role};
use relay_topics as topics;

use crate::extract::{extract_json_object, str_field};
use crate::prompts;

pub const SENTINEL_ANSWER: &str = "egg";
pub const SENTINEL_EXPLANATION: &str = "You found the easter egg. Submission accepted without review.";
pub const GENERIC_ERROR_SUMMARY: &str =
    "Some fields need attention. Review the highlighted entries and try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormsSettings {
    pub sentinel_field: String,
    pub sentinel_phrase: String,
}

impl Default for FormsSettings {
    fn default() -> Self {
        Self::from(&FormsConfig::default())
    }
}

impl From<&FormsConfig> for FormsSettings {
    fn from(cfg: &FormsConfig) -> Self {
        Self {
            sentinel_field: cfg.sentinel_field().to_string(),
            sentinel_phrase: cfg.sentinel_phrase().to_string(),
        }
    }
}

/// Form-lifecycle handlers plus the `llm:response` join point.
///
/// One instance serves every channel; per-page state lives in the
/// conversation log and the correlation registry, never here.
pub struct FormAssistant {
    log: Arc<dyn ConversationLog>,
    turns: Arc<dyn TurnStore>,
    registry: Arc<CorrelationRegistry>,
    model: Arc<dyn ModelLookup>,
    settings: FormsSettings,
}

impl FormAssistant {
    pub fn new(
        log: Arc<dyn ConversationLog>,
        turns: Arc<dyn TurnStore>,
        registry: Arc<CorrelationRegistry>,
        model: Arc<dyn ModelLookup>,
        settings: FormsSettings,
    ) -> Self {
        Self {
            log,
            turns,
            registry,
            model,
            settings,
        }
    }

    /// Registers this assistant for every inbound event it understands.
    pub fn install(self: &Arc<Self>, bus: &FormBus) -> Vec<HandlerId> {
        let handler: Arc<dyn Handler<Inbound, DispatchContext>> = self.clone();
        topics::INBOUND_EVENTS
            .iter()
            .map(|name| bus.on_handler(name, Arc::clone(&handler)))
            .collect()
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    fn record(&self, conversation: &ConversationId, event: NewConversationEvent) -> Result<()> {
        self.log.append(conversation, event)?;
        Ok(())
    }

    fn on_form_open(&self, channel: &Arc<Channel>, ev: &FormOpen) -> Result<()> {
        let conversation = channel.conversation_id();
        let stats = FieldStats::from_fields(&ev.fields);
        self.record(
            &conversation,
            NewConversationEvent::new(
                Role::System,
                EventType::Opened,
                ev.form_title.clone().unwrap_or_default(),
            )
            .with_metadata("filled", stats.filled)
            .with_metadata("total", stats.total),
        )?;
        let Some(model) = self.model.current() else {
            debug!(conversation = %conversation, "no model; skipping prime");
            return Ok(());
        };
        let prime = LlmPrime {
            messages: prompts::prime(ev.form_title.as_deref(), &ev.fields),
            options: model.options(None),
        };
        channel.emit_to_client(topics::EVENT_LLM_PRIME, &prime);
        Ok(())
    }

    fn on_form_poll(&self, channel: &Arc<Channel>, ev: &FormPoll) -> Result<()> {
        let stats = FieldStats::from_fields(&ev.fields);
        self.record(
            &channel.conversation_id(),
            NewConversationEvent::new(
                Role::System,
                EventType::Polled,
                ev.form_title.clone().unwrap_or_default(),
            )
            .with_metadata("filled", stats.filled)
            .with_metadata("total", stats.total)
            .with_metadata("focused_field", ev.focused_field.clone()),
        )?;
        channel.emit_to_client(
            topics::EVENT_FORM_STATS,
            &FormStats {
                filled: stats.filled,
                total: stats.total,
                focused_field: ev.focused_field.clone(),
            },
        );
        Ok(())
    }

    fn on_chat_typing(&self, channel: &Arc<Channel>, ev: &ChatTyping) -> Result<()> {
        let conversation = channel.conversation_id();
        let stats = FieldStats::from_fields(&ev.page_content.form_fields);
        self.record(
            &conversation,
            NewConversationEvent::new(Role::System, EventType::StateChanged, "typing")
                .with_metadata("trigger", "typing")
                .with_metadata("filled", stats.filled)
                .with_metadata("total", stats.total),
        )?;
        channel.emit_to_client(
            topics::EVENT_CHAT_CONTEXT_ANALYZE,
            &ContextAnalyze {
                page_content: ev.page_content.clone(),
                app_context: AppContext {
                    conversation_id: conversation.to_string(),
                    filled: stats.filled,
                    total: stats.total,
                },
            },
        );
        Ok(())
    }

    fn on_chat_context(&self, channel: &Arc<Channel>, ev: &ChatContext) -> Result<()> {
        self.record(
            &channel.conversation_id(),
            NewConversationEvent::new(Role::System, EventType::ContextUpdated, ev.summary.clone())
                .with_metadata("system_prompt_patch", ev.system_prompt_patch.clone()),
        )?;
        channel.emit_to_client(
            topics::EVENT_CHAT_CONTEXT_DISPLAY,
            &ContextDisplay {
                summary: ev.summary.clone(),
            },
        );
        channel.emit_to_client(
            topics::EVENT_CHAT_CONTEXT_READY,
            &ContextReady {
                system_prompt_patch: ev.system_prompt_patch.clone(),
            },
        );
        Ok(())
    }

    fn on_chat(&self, channel: &Arc<Channel>, ev: &ChatMessage) -> Result<()> {
        let role = ev
            .role
            .as_deref()
            .and_then(Role::from_slug)
            .unwrap_or(Role::User);
        self.record(
            &channel.conversation_id(),
            NewConversationEvent::new(role, EventType::UserInput, ev.content.clone()),
        )
    }

    fn is_sentinel(&self, ev: &FormSubmit) -> bool {
        ev.fields
            .get(&self.settings.sentinel_field)
            .map(|f| {
                f.display_value()
                    .trim()
                    .eq_ignore_ascii_case(self.settings.sentinel_phrase.trim())
            })
            .unwrap_or(false)
    }

    fn on_form_submit(&self, channel: &Arc<Channel>, ev: &FormSubmit) -> Result<()> {
        let conversation = channel.conversation_id();
        self.record(
            &conversation,
            NewConversationEvent::new(
                Role::System,
                EventType::StateChanged,
                ev.form_title.clone().unwrap_or_default(),
            )
            .with_metadata("trigger", "submit")
            .with_metadata("current_user", ev.current_user.clone()),
        )?;

        if self.is_sentinel(ev) {
            let result = SubmitResult {
                ok: true,
                answer: SENTINEL_ANSWER.to_string(),
                explanation: SENTINEL_EXPLANATION.to_string(),
            };
            let turn = self.turns.create(
                &conversation,
                &json!({"sentinel": self.settings.sentinel_field}),
            )?;
            self.turns
                .complete(&turn, &serde_json::to_string(&result)?)?;
            self.record(
                &conversation,
                NewConversationEvent::new(
                    Role::Assistant,
                    EventType::AssistantResponded,
                    SENTINEL_EXPLANATION,
                )
                .with_metadata("turn_id", turn.as_str()),
            )?;
            info!(conversation = %conversation, turn = %turn, "sentinel submission accepted");
            channel.emit_to_client(topics::EVENT_SIDEBAR_OPEN, &json!({}));
            channel.emit_to_client(
                topics::EVENT_SIDEBAR_MESSAGE,
                &SidebarMessage {
                    role: Role::Assistant,
                    content: SENTINEL_EXPLANATION.to_string(),
                },
            );
            channel.emit_to_client(topics::EVENT_FORM_SUBMIT_RESULT, &result);
            return Ok(());
        }

        let messages = prompts::validation(
            ev.form_title.as_deref(),
            ev.current_user.as_deref(),
            &ev.fields,
        );
        self.start_round_trip(
            channel,
            Purpose::Validation,
            messages,
            &[("form_title", json!(ev.form_title))],
        )
    }

    fn on_field_help(&self, channel: &Arc<Channel>, ev: &FieldHelp) -> Result<()> {
        self.record(
            &channel.conversation_id(),
            NewConversationEvent::new(
                Role::User,
                EventType::HelpRequested,
                ev.field_label.clone().unwrap_or_else(|| ev.field_name.clone()),
            )
            .with_metadata("field_name", ev.field_name.clone()),
        )?;
        let messages = prompts::field_help(
            ev.form_title.as_deref(),
            &ev.field_name,
            ev.field_label.as_deref(),
            &ev.fields,
        );
        self.start_round_trip(
            channel,
            Purpose::FieldHelp {
                field_name: ev.field_name.clone(),
            },
            messages,
            &[
                ("field_label", json!(ev.field_label)),
                ("form_title", json!(ev.form_title)),
            ],
        )
    }

    fn on_form_errors(&self, channel: &Arc<Channel>, ev: &FormErrors) -> Result<()> {
        let listed: Vec<String> = ev
            .errors
            .iter()
            .map(|(field, msgs)| format!("{field}: {}", msgs.joined()))
            .collect();
        self.record(
            &channel.conversation_id(),
            NewConversationEvent::new(Role::System, EventType::ErrorsReported, listed.join("\n"))
                .with_metadata("error_count", ev.errors.len()),
        )?;
        let messages = prompts::error_resolution(
            ev.form_title.as_deref(),
            ev.current_user.as_deref(),
            &ev.errors,
            &ev.fields,
        );
        self.start_round_trip(
            channel,
            Purpose::ErrorResolution,
            messages,
            &[("form_title", json!(ev.form_title))],
        )
    }

    /// Opens a correlated inference round-trip: turn, pending entry, then
    /// `llm:request`. Without a model nothing is sent. `extra` rides along on
    /// the pending entry and lands in the response's log metadata.
    fn start_round_trip(
        &self,
        channel: &Arc<Channel>,
        purpose: Purpose,
        messages: Vec<LlmMessage>,
        extra: &[(&str, Value)],
    ) -> Result<()> {
        let conversation = channel.conversation_id();
        let Some(model) = self.model.current() else {
            debug!(
                conversation = %conversation,
                purpose = purpose.as_str(),
                "no model; llm:request not sent"
            );
            return Ok(());
        };
        let options = model.options(Some("json"));
        let turn = self.turns.create(
            &conversation,
            &json!({"purpose": purpose.as_str(), "messages": messages, "options": options}),
        )?;
        let request_id = new_request_id();
        let pending = extra.iter().fold(
            PendingRequest::new(
                request_id.clone(),
                Arc::clone(channel),
                conversation.clone(),
                turn.clone(),
                purpose.clone(),
            ),
            |pending, (key, value)| pending.with_extra(key, value.clone()),
        );
        self.registry.put(pending)?;
        info!(
            conversation = %conversation,
            request_id = %request_id,
            turn = %turn,
            purpose = purpose.as_str(),
            "llm:request sent"
        );
        channel.emit_to_client(
            topics::EVENT_LLM_REQUEST,
            &LlmRequest {
                request_id,
                messages,
                options,
            },
        );
        Ok(())
    }

    fn on_llm_response(&self, ev: &LlmResponse) -> Result<()> {
        let Some(pending) = self.registry.take(&ev.request_id) else {
            debug!(request_id = %ev.request_id, "no pending request; response dropped");
            return Ok(());
        };
        if !self.turns.complete(&pending.turn_id, &ev.response)? {
            debug!(turn = %pending.turn_id, "turn was already completed");
        }
        let mut responded = NewConversationEvent::new(
            Role::Assistant,
            EventType::AssistantResponded,
            ev.response.clone(),
        )
        .with_metadata("request_id", ev.request_id.clone())
        .with_metadata("purpose", pending.purpose.as_str());
        for (key, value) in &pending.extra {
            if !value.is_null() {
                responded = responded.with_metadata(key, value.clone());
            }
        }
        self.record(&pending.conversation_id, responded)?;

        let parsed = extract_json_object(&ev.response);
        let channel = &pending.channel;
        match &pending.purpose {
            Purpose::FieldHelp { field_name } => {
                let help = str_field(&parsed, "help")
                    .map(str::to_string)
                    .unwrap_or_else(|| ev.response.clone());
                channel.emit_to_client(
                    topics::EVENT_FIELD_HELP_RESPONSE,
                    &FieldHelpResponse {
                        field_name: field_name.clone(),
                        help,
                    },
                );
            }
            Purpose::ErrorResolution => {
                let suggestions = parsed
                    .get("suggestions")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let summary = str_field(&parsed, "summary")
                    .unwrap_or(GENERIC_ERROR_SUMMARY)
                    .to_string();
                channel.emit_to_client(
                    topics::EVENT_FORM_ERROR_SUGGESTIONS,
                    &ErrorSuggestions {
                        suggestions,
                        summary,
                        turn_id: pending.turn_id.to_string(),
                    },
                );
            }
            Purpose::Validation => {
                let answer = str_field(&parsed, "answer").unwrap_or("yes").to_string();
                let explanation = parsed
                    .get("explanation")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| ev.response.clone());
                let ok = answer.to_ascii_lowercase().starts_with("yes");
                if !ok {
                    channel.emit_to_client(topics::EVENT_SIDEBAR_OPEN, &json!({}));
                    channel.emit_to_client(
                        topics::EVENT_SIDEBAR_MESSAGE,
                        &SidebarMessage {
                            role: Role::Assistant,
                            content: explanation.clone(),
                        },
                    );
                }
                channel.emit_to_client(
                    topics::EVENT_FORM_SUBMIT_RESULT,
                    &SubmitResult {
                        ok,
                        answer,
                        explanation,
                    },
                );
            }
        }
        Ok(())
    }
}

impl Handler<Inbound, DispatchContext> for FormAssistant {
    fn handle(&self, event: &Inbound, ctx: &DispatchContext) -> Result<()> {
        if let Inbound::LlmResponse(ev) = event {
            return self.on_llm_response(ev);
        }
        let channel = ctx
            .channel
            .as_ref()
            .ok_or_else(|| anyhow!("`{}` dispatched without a channel", event.name()))?;
        match event {
            Inbound::FormOpen(ev) => self.on_form_open(channel, ev),
            Inbound::FormPoll(ev) => self.on_form_poll(channel, ev),
            Inbound::ChatTyping(ev) => self.on_chat_typing(channel, ev),
            Inbound::ChatContext(ev) => self.on_chat_context(channel, ev),
            Inbound::Chat(ev) => self.on_chat(channel, ev),
            Inbound::FormSubmit(ev) => self.on_form_submit(channel, ev),
            Inbound::FieldHelp(ev) => self.on_field_help(channel, ev),
            Inbound::FormErrors(ev) => self.on_form_errors(channel, ev),
            Inbound::LlmResponse(_) | Inbound::Other { .. } => Ok(()),
        }
    }
}
