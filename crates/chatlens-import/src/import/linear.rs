use std::collections::HashSet;

use serde_json::Value;
use uuid::Uuid;

use chatlens_core::model::{Message, Role};

use super::{conversation_id, string_field, to_unix, Extraction, Extractor};

/// Flattens list-shaped exports: each conversation holds an ordered
/// `chat_messages` (or `messages`) array.
pub struct ListExtractor;

const TIMESTAMP_KEYS: [&str; 3] = ["created_at", "timestamp", "create_time"];

impl Extractor for ListExtractor {
    fn extract(&self, conversations: &[Value]) -> Extraction {
        let mut out = Extraction {
            conversations: conversations.len(),
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for (index, conv) in conversations.iter().enumerate() {
            let messages = ["chat_messages", "messages"]
                .iter()
                .find_map(|k| conv.get(*k).and_then(Value::as_array));
            let Some(messages) = messages else {
                out.dropped.malformed += 1;
                continue;
            };
            let thread_id = conversation_id(conv, index, &["uuid", "id"]);
            let title = string_field(conv, &["name", "title"]).unwrap_or_default();
            out.titles.entry(thread_id.clone()).or_insert(title);

            for (position, msg) in messages.iter().enumerate() {
                if !msg.is_object() {
                    out.dropped.malformed += 1;
                    continue;
                }
                let label = string_field(msg, &["sender", "role"]).unwrap_or_default();
                let Some(role) = Role::from_label(&label) else {
                    out.dropped.role += 1;
                    continue;
                };
                let timestamp = TIMESTAMP_KEYS
                    .iter()
                    .find_map(|k| msg.get(*k).filter(|v| !v.is_null()))
                    .and_then(to_unix);
                let Some(timestamp) = timestamp else {
                    tracing::debug!(thread = %thread_id, position, "Dropping message with bad timestamp");
                    out.dropped.timestamp += 1;
                    continue;
                };

                let node_id = string_field(msg, &["uuid", "id"])
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| synthetic_id(&thread_id, position));
                if !seen.insert(node_id.clone()) {
                    out.dropped.duplicate += 1;
                    continue;
                }

                match Message::new(node_id, thread_id.clone(), role, timestamp, message_text(msg)) {
                    Some(m) => out.messages.push(m),
                    None => out.dropped.timestamp += 1,
                }
            }
        }
        out
    }
}

/// Deterministic id for messages that carry none of their own.
fn synthetic_id(thread_id: &str, position: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{thread_id}/{position}").as_bytes(),
    )
    .as_simple()
    .to_string()
}

/// Message body: `text`, else the text blocks of a `content` array, else a
/// string `content`.
fn message_text(msg: &Value) -> String {
    if let Some(Value::String(text)) = msg.get("text") {
        if !text.is_empty() {
            return text.clone();
        }
    }
    match msg.get("content") {
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str).unwrap_or("text") == "text")
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<Value> {
        json!([
            {
                "uuid": "t-1",
                "name": "Research notes",
                "chat_messages": [
                    {"uuid": "a", "sender": "human", "text": "What is entropy?", "created_at": "2024-05-01T09:00:00Z"},
                    {"uuid": "b", "sender": "assistant", "text": "", "content": [
                        {"type": "text", "text": "A measure of uncertainty."},
                        {"type": "tool_use", "name": "search"},
                        {"type": "text", "text": "In bits."}
                    ], "created_at": "2024-05-01T09:00:05.250000+00:00"},
                    {"uuid": "c", "sender": "human", "text": "ok", "created_at": "not a date"},
                    {"uuid": "d", "sender": "system", "text": "hidden", "created_at": "2024-05-01T09:01:00Z"}
                ]
            },
            {
                "id": 42,
                "messages": [
                    {"role": "user", "content": "numeric time", "timestamp": 1714554000},
                    {"role": "assistant", "content": "reply", "timestamp": 1714554060.5}
                ]
            }
        ])
        .as_array()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_normalizes_roles_and_timestamps() {
        let out = ListExtractor.extract(&sample());
        assert_eq!(out.messages.len(), 4);
        let a = &out.messages[0];
        assert_eq!(a.role, Role::User);
        assert_eq!(a.timestamp, 1_714_554_000.0);
        assert_eq!(a.year_month, "2024-05");
        let b = &out.messages[1];
        assert_eq!(b.role, Role::Assistant);
        assert_eq!(b.timestamp, 1_714_554_005.25);
        assert_eq!(b.text, "A measure of uncertainty.\nIn bits.");
    }

    #[test]
    fn test_malformed_dates_are_dropped_not_fatal() {
        let out = ListExtractor.extract(&sample());
        assert_eq!(out.dropped.timestamp, 1);
        assert_eq!(out.dropped.role, 1);
        assert!(out.messages.iter().all(|m| m.node_id != "c"));
    }

    #[test]
    fn test_synthetic_ids_are_stable() {
        let first = ListExtractor.extract(&sample());
        let second = ListExtractor.extract(&sample());
        let ids = |e: &Extraction| e.messages.iter().map(|m| m.node_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        let numeric = &first.messages[2];
        assert_eq!(numeric.thread_id, "42");
        assert_eq!(numeric.node_id.len(), 32);
        assert_eq!(numeric.text, "numeric time");
        assert_eq!(first.titles.get("t-1").map(String::as_str), Some("Research notes"));
    }
}
