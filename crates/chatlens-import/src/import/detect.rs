use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two recognized export shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Conversations carry a `mapping` of node id -> node (ChatGPT-style).
    Tree,
    /// Conversations carry a linear `chat_messages` / `messages` list (Claude-style).
    List,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::List => "list",
        }
    }

    /// Whether a single conversation object has this shape.
    pub fn matches(&self, conversation: &Value) -> bool {
        let Some(conv) = conversation.as_object() else {
            return false;
        };
        match self {
            Self::Tree => conv.get("mapping").is_some_and(Value::is_object),
            Self::List => {
                conv.contains_key("chat_messages")
                    || conv.get("messages").is_some_and(Value::is_array)
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Tree => "found 'mapping' tree structure",
            Self::List => "found linear 'messages' list",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tree" | "chatgpt" => Ok(Self::Tree),
            "list" | "claude" => Ok(Self::List),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

/// Detect the export shape from the first conversation object.
///
/// Returns the reason for rejection when the shape is not recognized.
pub fn detect_format(data: &Value) -> Result<ExportFormat, String> {
    let Some(items) = data.as_array() else {
        return Err("top-level is not a list".into());
    };
    detect_conversations(items)
}

/// Detect the export shape of an already-unwrapped conversation list.
pub fn detect_conversations(items: &[Value]) -> Result<ExportFormat, String> {
    let Some(first) = items.first() else {
        return Err("top-level list is empty".into());
    };
    if !first.is_object() {
        return Err("first element is not an object".into());
    }
    [ExportFormat::Tree, ExportFormat::List]
        .into_iter()
        .find(|f| f.matches(first))
        .ok_or_else(|| "unrecognised structure".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_tree() {
        let data = json!([{"title": "x", "mapping": {}}]);
        assert_eq!(detect_format(&data), Ok(ExportFormat::Tree));
    }

    #[test]
    fn test_detect_list() {
        assert_eq!(
            detect_format(&json!([{"chat_messages": []}])),
            Ok(ExportFormat::List)
        );
        assert_eq!(
            detect_format(&json!([{"messages": [{"role": "user"}]}])),
            Ok(ExportFormat::List)
        );
    }

    #[test]
    fn test_detect_unknown() {
        assert!(detect_format(&json!({"mapping": {}})).is_err());
        assert!(detect_format(&json!([])).is_err());
        assert!(detect_format(&json!([1, 2])).is_err());
        assert!(detect_format(&json!([{"messages": "nope"}])).is_err());
        assert!(detect_format(&json!([{"mapping": []}])).is_err());
    }

    #[test]
    fn test_matches_single_conversation() {
        let tree = json!({"mapping": {}});
        let list = json!({"chat_messages": []});
        assert!(ExportFormat::Tree.matches(&tree));
        assert!(!ExportFormat::List.matches(&tree));
        assert!(ExportFormat::List.matches(&list));
        assert!(!ExportFormat::Tree.matches(&list));
        assert!(!ExportFormat::List.matches(&json!("chat_messages")));
    }

    #[test]
    fn test_format_names() {
        assert_eq!("chatgpt".parse::<ExportFormat>(), Ok(ExportFormat::Tree));
        assert_eq!("list".parse::<ExportFormat>(), Ok(ExportFormat::List));
        assert!("csv".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Tree.to_string(), "tree");
    }
}
