use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use relay_core::{
    Channel, ChannelStreams, ConfiguredModel, ConversationEvent, ConversationId, ConversationLog,
    CorrelationRegistry, DispatchContext, EventType, FormBus, MemoryStore, ModelHandle,
    NewConversationEvent, NoHooks, TurnId, TurnStore,
};
use relay_events::{EmitReport, Envelope, StreamHub};
use relay_forms::{FormAssistant, FormsSettings, GENERIC_ERROR_SUMMARY};
use relay_protocol::{Inbound, Role};

struct Harness {
    hub: StreamHub,
    bus: FormBus,
    store: Arc<MemoryStore>,
    registry: Arc<CorrelationRegistry>,
}

impl Harness {
    fn new(model: Option<&str>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_log(model, store.clone(), store)
    }

    fn with_log(model: Option<&str>, log: Arc<dyn ConversationLog>, store: Arc<MemoryStore>) -> Self {
        let registry = Arc::new(CorrelationRegistry::new());
        let assistant = Arc::new(FormAssistant::new(
            log,
            store.clone(),
            registry.clone(),
            Arc::new(ConfiguredModel::new(model.map(ModelHandle::new))),
            FormsSettings::default(),
        ));
        let bus = FormBus::new();
        assistant.install(&bus);
        Self {
            hub: StreamHub::new(64),
            bus,
            store,
            registry,
        }
    }

    fn connect(&self, page: &str) -> (Arc<Channel>, ChannelStreams) {
        Channel::subscribe(&self.hub, "forms", Some(page), &json!({}), &NoHooks)
    }

    fn send(&self, channel: &Arc<Channel>, event: &str, data: Value) -> EmitReport {
        channel
            .receive(
                &self.bus,
                Envelope {
                    event: event.into(),
                    data,
                },
            )
            .expect("decodes")
    }

    fn transcript(&self, channel: &Channel) -> Vec<(Role, EventType, String)> {
        self.store
            .transcript(&channel.conversation_id())
            .unwrap()
            .into_iter()
            .map(|e| (e.role, e.kind, e.content))
            .collect()
    }
}

fn names(events: &[Envelope]) -> Vec<&str> {
    events.iter().map(|e| e.event.as_str()).collect()
}

fn submit_payload(sentinel: &str) -> Value {
    json!({
        "fields": {
            "e_pluribus_unum": {"value": sentinel},
            "first_name": {"value": "Ada"},
            "last_name": {"value": "Lovelace"}
        },
        "formTitle": "Beneficiary",
        "currentUser": "Ada Lovelace"
    })
}

fn request_id(env: &Envelope) -> String {
    env.data["requestId"].as_str().expect("request id").to_string()
}

#[test]
fn sentinel_submission_short_circuits_without_inference() {
    let h = Harness::new(Some("llama3.1:8b"));
    for phrase in ["easter egg", "Easter Egg", "  easter egg  "] {
        let (page, mut streams) = h.connect("beneficiary");
        let report = h.send(&page, "form:submit", submit_payload(phrase));
        assert!(report.is_clean());

        let got = streams.drain();
        assert_eq!(
            names(&got),
            vec!["sidebar:open", "sidebar:message", "form:submit:result"],
            "phrase {phrase:?}"
        );
        assert_eq!(got[2].data["ok"], json!(true));
        assert_eq!(got[2].data["answer"], json!("egg"));
        assert_eq!(got[1].data["role"], json!("assistant"));
    }
    assert!(h.registry.is_empty());
}

#[test]
fn rejected_validation_opens_sidebar_and_duplicates_are_ignored() {
    let h = Harness::new(Some("llama3.1:8b"));
    let (page, mut page_rx) = h.connect("claim-7");
    let (bridge, mut bridge_rx) = h.connect("bridge");

    h.send(&page, "form:submit", submit_payload("no egg here"));
    let sent = page_rx.drain();
    assert_eq!(names(&sent), vec!["llm:request"]);
    let id = request_id(&sent[0]);
    assert!(id.starts_with("req-"));
    assert_eq!(sent[0].data["options"]["model"], json!("llama3.1:8b"));
    assert_eq!(sent[0].data["messages"][0]["role"], json!("system"));
    assert_eq!(h.registry.len(), 1);

    let response = json!({
        "requestId": id,
        "response": "Result: {\"answer\": \"No\", \"explanation\": \"Date of birth is missing.\"}"
    });
    h.send(&bridge, "llm:response", response.clone());
    let got = page_rx.drain();
    assert_eq!(
        names(&got),
        vec!["sidebar:open", "sidebar:message", "form:submit:result"]
    );
    assert_eq!(got[1].data["content"], json!("Date of birth is missing."));
    assert_eq!(
        got[2].data,
        json!({"ok": false, "answer": "No", "explanation": "Date of birth is missing."})
    );
    assert!(bridge_rx.drain().is_empty());
    assert!(h.registry.is_empty());

    let again = h.send(&bridge, "llm:response", response);
    assert!(again.is_clean());
    assert!(page_rx.drain().is_empty());

    let transcript = h.transcript(&page);
    let kinds: Vec<_> = transcript.iter().map(|(_, k, _)| *k).collect();
    assert_eq!(
        kinds,
        vec![EventType::StateChanged, EventType::AssistantResponded]
    );
}

#[test]
fn response_delivered_without_a_channel_reaches_the_submitting_page() {
    let h = Harness::new(Some("llama3.1:8b"));
    let (page, mut rx) = h.connect("beneficiary");
    h.send(&page, "form:submit", submit_payload("not the egg"));
    let id = request_id(&rx.drain()[0]);

    let response = Inbound::decode(Envelope {
        event: "llm:response".into(),
        data: json!({
            "requestId": id,
            "response": "{\"answer\":\"no\",\"explanation\":\"self-beneficiary\"}"
        }),
    })
    .expect("decodes");
    let report = h.bus.emit(&response, &DispatchContext::detached());
    assert!(report.is_clean());

    let got = rx.drain();
    assert_eq!(
        names(&got),
        vec!["sidebar:open", "sidebar:message", "form:submit:result"]
    );
    assert_eq!(got[1].data["content"], json!("self-beneficiary"));
    assert_eq!(got[2].data["ok"], json!(false));
    assert_eq!(got[2].data["explanation"], json!("self-beneficiary"));
    assert!(h.registry.is_empty());

    let again = h.bus.emit(&response, &DispatchContext::detached());
    assert!(again.is_clean());
    assert!(rx.drain().is_empty());
}

#[test]
fn response_without_json_defaults_to_accepted() {
    let h = Harness::new(Some("llama3.1:8b"));
    let (page, mut rx) = h.connect("p");
    h.send(&page, "form:submit", submit_payload(""));
    let id = request_id(&rx.drain()[0]);

    h.send(
        &page,
        "llm:response",
        json!({"requestId": id, "response": "Looks complete to me."}),
    );
    let got = rx.drain();
    assert_eq!(names(&got), vec!["form:submit:result"]);
    assert_eq!(
        got[0].data,
        json!({"ok": true, "answer": "yes", "explanation": "Looks complete to me."})
    );
}

#[test]
fn field_help_round_trip_uses_the_requested_field() {
    let h = Harness::new(Some("llama3.1:8b"));
    let (page, mut rx) = h.connect("p");
    h.send(
        &page,
        "field:help",
        json!({"fieldName": "ssn", "fieldLabel": "Social security number", "formTitle": "W-4"}),
    );
    let sent = rx.drain();
    assert_eq!(names(&sent), vec!["llm:request"]);
    let pending_id = request_id(&sent[0]);

    h.send(
        &page,
        "llm:response",
        json!({"requestId": pending_id, "response": "{\"help\": \"Nine digits, no dashes.\"}"}),
    );
    let got = rx.drain();
    assert_eq!(names(&got), vec!["field:help:response"]);
    assert_eq!(
        got[0].data,
        json!({"fieldName": "ssn", "help": "Nine digits, no dashes."})
    );

    h.send(&page, "field:help", json!({"fieldName": "dob"}));
    let second = request_id(&rx.drain()[0]);
    h.send(
        &page,
        "llm:response",
        json!({"requestId": second, "response": "Use YYYY-MM-DD"}),
    );
    assert_eq!(rx.drain()[0].data["help"], json!("Use YYYY-MM-DD"));

    let transcript = h.transcript(&page);
    assert_eq!(
        transcript[0],
        (
            Role::User,
            EventType::HelpRequested,
            "Social security number".to_string()
        )
    );

    let events = h.store.read(&page.conversation_id()).unwrap();
    assert_eq!(events[1].kind, EventType::AssistantResponded);
    assert_eq!(events[1].metadata["purpose"], json!("field_help"));
    assert_eq!(events[1].metadata["field_label"], json!("Social security number"));
    assert_eq!(events[1].metadata["form_title"], json!("W-4"));
    assert!(events[3].metadata.get("field_label").is_none());
}

#[test]
fn error_resolution_emits_suggestions_with_turn_id() {
    let h = Harness::new(Some("llama3.1:8b"));
    let (page, mut rx) = h.connect("p");
    let errors = json!({
        "errors": {"email": ["is invalid", "is required"], "zip": "too short"},
        "fields": {"email": {"value": "ada@"}, "zip": {"value": "12"}},
        "formTitle": "Signup"
    });
    h.send(&page, "form:errors", errors.clone());
    let id = request_id(&rx.drain()[0]);
    h.send(
        &page,
        "llm:response",
        json!({
            "requestId": id,
            "response": "{\"suggestions\": {\"email\": \"Add a domain\"}, \"summary\": \"Fix the email.\"}"
        }),
    );
    let got = rx.drain();
    assert_eq!(names(&got), vec!["form:error:suggestions"]);
    assert_eq!(got[0].data["suggestions"], json!({"email": "Add a domain"}));
    assert_eq!(got[0].data["summary"], json!("Fix the email."));
    let turn = TurnId::new(got[0].data["turn_id"].as_str().unwrap());
    let stored = h.store.get(&turn).unwrap().expect("turn stored");
    assert!(stored.completed.is_some());

    h.send(&page, "form:errors", errors);
    let id = request_id(&rx.drain()[0]);
    h.send(&page, "llm:response", json!({"requestId": id, "response": "sorry"}));
    let fallback = rx.drain();
    assert_eq!(fallback[0].data["suggestions"], json!({}));
    assert_eq!(fallback[0].data["summary"], json!(GENERIC_ERROR_SUMMARY));

    let logged = &h.transcript(&page)[0];
    assert_eq!(logged.1, EventType::ErrorsReported);
    assert_eq!(logged.2, "email: is invalid; is required\nzip: too short");
}

#[test]
fn without_a_model_nothing_is_requested() {
    let h = Harness::new(None);
    let (page, mut rx) = h.connect("p");
    h.send(&page, "form:open", json!({"formTitle": "Claim"}));
    h.send(&page, "form:submit", submit_payload("plain"));
    h.send(&page, "field:help", json!({"fieldName": "ssn"}));
    assert!(rx.drain().is_empty());
    assert!(h.registry.is_empty());
    assert_eq!(h.transcript(&page).len(), 3);
}

#[test]
fn lifecycle_events_update_log_and_reply_to_the_page() {
    let h = Harness::new(Some("llama3.1:8b"));
    let (page, mut rx) = h.connect("intake");
    let fields = json!({"name": {"value": "Ada"}, "email": {"value": ""}});

    h.send(&page, "form:open", json!({"formTitle": "Intake", "fields": fields}));
    h.send(
        &page,
        "form:poll",
        json!({"formTitle": "Intake", "fields": fields, "focusedField": "email"}),
    );
    h.send(
        &page,
        "chat:typing",
        json!({"pageContent": {"formFields": fields, "url": "https://example.test/intake"}}),
    );
    h.send(
        &page,
        "chat:context",
        json!({"summary": "Half done", "systemPromptPatch": "Be terse."}),
    );
    h.send(&page, "chat", json!({"content": "what is this for?"}));

    let got = rx.drain();
    assert_eq!(
        names(&got),
        vec![
            "llm:prime",
            "form:stats",
            "chat:context:analyze",
            "chat:context:display",
            "chat:context:ready"
        ]
    );
    assert!(got[0].data.get("requestId").is_none());
    assert_eq!(
        got[1].data,
        json!({"filled": 1, "total": 2, "focusedField": "email"})
    );
    assert_eq!(
        got[2].data["appContext"],
        json!({"conversationId": "forms:intake", "filled": 1, "total": 2})
    );
    assert_eq!(
        got[2].data["pageContent"]["url"],
        json!("https://example.test/intake")
    );
    assert_eq!(got[3].data, json!({"summary": "Half done"}));
    assert_eq!(got[4].data, json!({"systemPromptPatch": "Be terse."}));
    assert!(h.registry.is_empty());

    let transcript = h.transcript(&page);
    let kinds: Vec<_> = transcript.iter().map(|(_, k, _)| *k).collect();
    assert_eq!(
        kinds,
        vec![
            EventType::Opened,
            EventType::Polled,
            EventType::StateChanged,
            EventType::ContextUpdated,
            EventType::UserInput
        ]
    );
    assert_eq!(
        transcript[4],
        (Role::User, EventType::UserInput, "what is this for?".to_string())
    );
}

#[test]
fn disconnect_abandons_pending_requests() {
    let h = Harness::new(Some("llama3.1:8b"));
    let (page, mut rx) = h.connect("p");
    let (bridge, _bridge_rx) = h.connect("bridge");
    h.send(&page, "form:submit", submit_payload(""));
    let id = request_id(&rx.drain()[0]);

    assert_eq!(page.unsubscribe(&h.registry, &NoHooks), 1);
    let report = h.send(
        &bridge,
        "llm:response",
        json!({"requestId": id, "response": "{\"answer\": \"yes\"}"}),
    );
    assert!(report.is_clean());
    assert!(rx.drain().is_empty());
}

#[test]
fn store_failure_is_isolated_from_later_handlers() {
    struct BrokenLog;
    impl ConversationLog for BrokenLog {
        fn append(&self, _: &ConversationId, _: NewConversationEvent) -> Result<ConversationEvent> {
            anyhow::bail!("disk full")
        }
        fn read(&self, _: &ConversationId) -> Result<Vec<ConversationEvent>> {
            Ok(Vec::new())
        }
        fn conversations(&self, _: usize) -> Result<Vec<ConversationId>> {
            Ok(Vec::new())
        }
    }

    let h = Harness::with_log(
        Some("llama3.1:8b"),
        Arc::new(BrokenLog),
        Arc::new(MemoryStore::new()),
    );
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        h.bus.on("chat", move |_: &Inbound, _: &DispatchContext| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    let (page, _rx) = h.connect("p");
    let report = h.send(&page, "chat", json!({"content": "hi"}));
    assert_eq!(report.invoked, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.to_string().contains("disk full"));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
