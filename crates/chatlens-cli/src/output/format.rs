use serde::Serialize;
use serde_json::Value;

use super::OutputFormat;

/// Render a stage summary: pretty JSON, or an aligned `key: value` listing
/// with nested records flattened to dotted keys.
pub fn format_summary<T: Serialize>(title: &str, summary: &T, fmt: OutputFormat) -> String {
    let value = serde_json::to_value(summary).unwrap_or(Value::Null);
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(&value).unwrap_or_default(),
        OutputFormat::Text => format_summary_text(title, &value),
    }
}

fn format_summary_text(title: &str, value: &Value) -> String {
    let mut fields = Vec::new();
    flatten("", value, &mut fields);
    let width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

    let mut out = format!("{title}\n{}\n", "=".repeat(title.len()));
    for (key, val) in fields {
        out.push_str(&format!("{key:<width$}  {val}\n"));
    }
    out
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
        }
        Value::Number(n) => out.push((prefix.to_string(), format_number(n))),
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        Value::Null => out.push((prefix.to_string(), "-".into())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

fn format_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if !n.is_i64() && !n.is_u64() => format!("{f:.4}"),
        _ => n.to_string(),
    }
}

/// Render the combined summaries of a full pipeline run.
pub fn format_run(stages: &[(&str, Value)], fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => {
            let map: serde_json::Map<String, Value> = stages
                .iter()
                .map(|(name, v)| (name.to_string(), v.clone()))
                .collect();
            serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_default()
        }
        OutputFormat::Text => stages
            .iter()
            .map(|(name, v)| format_summary_text(name, v))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_flattens_nested_fields() {
        let summary = json!({"messages": 10, "dropped": {"role": 2}, "mean": 0.123456});
        let text = format_summary("Parse", &summary, OutputFormat::Text);
        assert!(text.starts_with("Parse\n=====\n"));
        assert!(text.contains("dropped.role"));
        assert!(text.contains("0.1235"));
    }

    #[test]
    fn test_json_round_trips() {
        let summary = json!({"months": 4});
        let text = format_summary("x", &summary, OutputFormat::Json);
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, summary);
    }
}
