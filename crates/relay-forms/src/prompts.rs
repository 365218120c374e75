//! Prompt text for each inference round-trip. Every prompt asks for a single
//! JSON object so the response handler can pull fields out of it.

use std::collections::BTreeMap;
use std::fmt::Write;

use relay_protocol::inbound::ValidationMessages;
use relay_protocol::outbound::LlmMessage;
use relay_protocol::FieldMap;

fn title_or_default(title: Option<&str>) -> &str {
    title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or("this form")
}

/// One line per field: `- Label (name)*: value`, `*` marking required fields.
pub fn render_fields(fields: &FieldMap) -> String {
    let mut out = String::new();
    for (name, field) in fields {
        let label = field.label.as_deref().unwrap_or(name);
        let marker = if field.required { "*" } else { "" };
        let _ = writeln!(out, "- {label} ({name}){marker}: {}", field.display_value());
    }
    if out.is_empty() {
        out.push_str("(no fields)\n");
    }
    out
}

fn assistant_system(title: &str) -> String {
    format!(
        "You are a careful assistant helping a user complete \"{title}\". \
         Be brief and concrete. Never invent values for the user."
    )
}

pub fn prime(title: Option<&str>, fields: &FieldMap) -> Vec<LlmMessage> {
    let title = title_or_default(title);
    vec![
        LlmMessage::system(assistant_system(title)),
        LlmMessage::user(format!(
            "The user opened \"{title}\". Current fields:\n{}",
            render_fields(fields)
        )),
    ]
}

pub fn validation(title: Option<&str>, user: Option<&str>, fields: &FieldMap) -> Vec<LlmMessage> {
    let title = title_or_default(title);
    let user = user.unwrap_or("an anonymous user");
    vec![
        LlmMessage::system(format!(
            "{} Decide whether the submission looks complete and consistent. \
             Reply with JSON only: {{\"answer\": \"yes\" or \"no\", \"explanation\": string}}.",
            assistant_system(title)
        )),
        LlmMessage::user(format!(
            "Submission by {user}:\n{}",
            render_fields(fields)
        )),
    ]
}

pub fn field_help(
    title: Option<&str>,
    field_name: &str,
    field_label: Option<&str>,
    fields: &FieldMap,
) -> Vec<LlmMessage> {
    let title = title_or_default(title);
    let label = field_label.unwrap_or(field_name);
    vec![
        LlmMessage::system(format!(
            "{} Explain what a field expects in one or two sentences. \
             Reply with JSON only: {{\"help\": string}}.",
            assistant_system(title)
        )),
        LlmMessage::user(format!(
            "What should go into \"{label}\" ({field_name})? Other fields so far:\n{}",
            render_fields(fields)
        )),
    ]
}

pub fn error_resolution(
    title: Option<&str>,
    user: Option<&str>,
    errors: &BTreeMap<String, ValidationMessages>,
    fields: &FieldMap,
) -> Vec<LlmMessage> {
    let title = title_or_default(title);
    let user = user.unwrap_or("the user");
    let mut listed = String::new();
    for (field, msgs) in errors {
        let _ = writeln!(listed, "- {field}: {}", msgs.joined());
    }
    vec![
        LlmMessage::system(format!(
            "{} The form was rejected. For each failing field suggest a fix. \
             Reply with JSON only: {{\"suggestions\": {{field: string}}, \"summary\": string}}.",
            assistant_system(title)
        )),
        LlmMessage::user(format!(
            "Errors reported to {user}:\n{listed}Current values:\n{}",
            render_fields(fields)
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::{FieldState, Role};

    #[test]
    fn fields_render_with_labels_and_required_marker() {
        let mut fields = FieldMap::new();
        fields.insert(
            "ssn".into(),
            FieldState {
                label: Some("Social security number".into()),
                required: true,
                ..FieldState::text("123")
            },
        );
        fields.insert("nickname".into(), FieldState::text(""));
        let text = render_fields(&fields);
        assert_eq!(
            text,
            "- nickname (nickname): \n- Social security number (ssn)*: 123\n"
        );
        assert_eq!(render_fields(&FieldMap::new()), "(no fields)\n");
    }

    #[test]
    fn validation_prompt_is_system_then_user() {
        let msgs = validation(Some("Beneficiary"), Some("Ada Lovelace"), &FieldMap::new());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.contains("Beneficiary"));
        assert!(msgs[0].content.contains("\"answer\""));
        assert_eq!(msgs[1].role, Role::User);
        assert!(msgs[1].content.starts_with("Submission by Ada Lovelace"));
    }
}
