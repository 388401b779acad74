pub mod detect;
pub mod linear;
pub mod tree;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chatlens_core::model::Message;

pub use detect::{detect_conversations, detect_format, ExportFormat};
pub use linear::ListExtractor;
pub use tree::TreeExtractor;

/// Records dropped while extracting messages. Drops are never fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounts {
    /// Author role other than user/assistant (system, tool, ...).
    pub role: usize,
    /// Missing, negative or unparseable timestamp.
    pub timestamp: usize,
    /// Node id already seen earlier in the export.
    pub duplicate: usize,
    /// Structurally unusable entries (non-object conversations or messages).
    pub malformed: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.role + self.timestamp + self.duplicate + self.malformed
    }
}

/// Messages flattened out of one export, before they reach the store.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub conversations: usize,
    pub messages: Vec<Message>,
    /// Conversation titles keyed by thread id.
    pub titles: BTreeMap<String, String>,
    pub dropped: DropCounts,
}

/// One way of flattening an export shape into canonical messages.
pub trait Extractor {
    fn extract(&self, conversations: &[Value]) -> Extraction;
}

/// Extract messages from a parsed export with the extractor for `format`.
pub fn extract_messages(format: ExportFormat, conversations: &[Value]) -> Extraction {
    match format {
        ExportFormat::Tree => TreeExtractor.extract(conversations),
        ExportFormat::List => ListExtractor.extract(conversations),
    }
}

/// Thread id of a conversation object: its own id field, or a positional
/// fallback so ids stay stable across reruns of the same file.
pub(crate) fn conversation_id(conv: &Value, index: usize, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| match conv.get(*k) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| format!("conv-{index}"))
}

pub(crate) fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match value.get(*k) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    })
}

/// Convert a numeric or ISO-8601 timestamp to Unix seconds.
///
/// Naive date-times (no offset) are read as UTC. Returns `None` for
/// negative, non-finite or unparseable values.
pub fn to_unix(value: &Value) -> Option<f64> {
    let ts = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_iso(s.trim())?,
        _ => return None,
    };
    (ts.is_finite() && ts >= 0.0).then_some(ts)
}

fn parse_iso(s: &str) -> Option<f64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(epoch_seconds(dt.timestamp(), dt.timestamp_subsec_nanos()));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(epoch_seconds(dt.timestamp(), dt.timestamp_subsec_nanos()));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            let utc = naive.and_utc();
            return Some(epoch_seconds(utc.timestamp(), utc.timestamp_subsec_nanos()));
        }
    }
    None
}

fn epoch_seconds(secs: i64, nanos: u32) -> f64 {
    secs as f64 + f64::from(nanos) / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_unix_numeric() {
        assert_eq!(to_unix(&json!(1_700_000_000)), Some(1_700_000_000.0));
        assert_eq!(to_unix(&json!(1_700_000_000.25)), Some(1_700_000_000.25));
        assert_eq!(to_unix(&json!(-3)), None);
        assert_eq!(to_unix(&Value::Null), None);
    }

    #[test]
    fn test_to_unix_iso() {
        assert_eq!(to_unix(&json!("2024-03-15T12:00:00Z")), Some(1_710_504_000.0));
        assert_eq!(
            to_unix(&json!("2024-03-15T14:00:00+02:00")),
            Some(1_710_504_000.0)
        );
        assert_eq!(
            to_unix(&json!("2024-03-15T12:00:00.500000Z")),
            Some(1_710_504_000.5)
        );
        assert_eq!(to_unix(&json!("2024-03-15T12:00:00")), Some(1_710_504_000.0));
        assert_eq!(to_unix(&json!("2024-03-15 12:00:00")), Some(1_710_504_000.0));
        assert_eq!(to_unix(&json!("yesterday")), None);
        assert_eq!(to_unix(&json!("")), None);
    }

    #[test]
    fn test_conversation_id_fallback() {
        assert_eq!(conversation_id(&json!({"id": "abc"}), 3, &["id"]), "abc");
        assert_eq!(conversation_id(&json!({"id": ""}), 3, &["id"]), "conv-3");
        assert_eq!(
            conversation_id(&json!({"uuid": null, "id": 7}), 0, &["uuid", "id"]),
            "7"
        );
    }
}
