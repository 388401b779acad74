use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use chatlens_core::model::{Message, Role};

use super::{conversation_id, string_field, to_unix, Extraction, Extractor};

/// Flattens tree-shaped exports: each conversation holds a `mapping` of
/// node id -> node, and each node may carry one authored message.
pub struct TreeExtractor;

#[derive(Debug, Deserialize)]
struct TreeNode {
    #[serde(default)]
    message: Option<TreeMessage>,
}

#[derive(Debug, Deserialize)]
struct TreeMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    author: Option<TreeAuthor>,
    #[serde(default)]
    create_time: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TreeAuthor {
    #[serde(default)]
    role: Option<String>,
}

impl Extractor for TreeExtractor {
    fn extract(&self, conversations: &[Value]) -> Extraction {
        let mut out = Extraction {
            conversations: conversations.len(),
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for (index, conv) in conversations.iter().enumerate() {
            let Some(mapping) = conv.get("mapping").and_then(Value::as_object) else {
                out.dropped.malformed += 1;
                continue;
            };
            let thread_id = conversation_id(conv, index, &["id", "conversation_id"]);
            let title = string_field(conv, &["title"]).unwrap_or_default();
            out.titles.entry(thread_id.clone()).or_insert(title);

            // serde_json maps iterate in key order, so extraction is deterministic.
            for (key, node) in mapping {
                let node: TreeNode = match serde_json::from_value(node.clone()) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!("Skipping malformed node {key}: {e}");
                        out.dropped.malformed += 1;
                        continue;
                    }
                };
                // Structural nodes (root, branch points) carry no message.
                let Some(msg) = node.message else {
                    continue;
                };

                let role = match msg.author.and_then(|a| a.role).as_deref() {
                    Some("user") => Role::User,
                    Some("assistant") => Role::Assistant,
                    _ => {
                        out.dropped.role += 1;
                        continue;
                    }
                };
                let Some(timestamp) = msg.create_time.as_ref().and_then(to_unix) else {
                    out.dropped.timestamp += 1;
                    continue;
                };

                let node_id = msg.id.filter(|id| !id.is_empty()).unwrap_or_else(|| key.clone());
                if !seen.insert(node_id.clone()) {
                    out.dropped.duplicate += 1;
                    continue;
                }

                let text = msg.content.as_ref().map(content_text).unwrap_or_default();
                match Message::new(node_id, thread_id.clone(), role, timestamp, text) {
                    Some(m) => out.messages.push(m),
                    None => out.dropped.timestamp += 1,
                }
            }
        }
        out
    }
}

/// Join the string parts of a tree message's content.
fn content_text(content: &Value) -> String {
    if let Some(parts) = content.get("parts").and_then(Value::as_array) {
        let texts: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
        return texts.join("\n");
    }
    match content.get("text") {
        Some(Value::String(s)) => s.clone(),
        _ => content.as_str().map(String::from).unwrap_or_default(),
    }
}
