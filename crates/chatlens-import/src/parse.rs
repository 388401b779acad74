use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use chatlens_core::model::{Role, Thread};
use chatlens_core::storage::MessageStore;
use chatlens_core::{Progress, ProgressObserver};

use crate::error::ImportError;
use crate::import::{detect_conversations, extract_messages, DropCounts, ExportFormat};

/// Outcome of one parser run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseSummary {
    pub format: ExportFormat,
    pub conversations: usize,
    pub messages_written: usize,
    pub threads_written: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub months: usize,
    pub dropped: DropCounts,
    /// SHA-256 of the raw export bytes.
    pub source_hash: String,
}

/// Read a raw export from disk and parse it as a JSON array of conversations.
pub fn load_export(path: &Path) -> Result<(Vec<Value>, String), ImportError> {
    let bytes = std::fs::read(path)?;
    let source_hash = format!("{:x}", Sha256::digest(&bytes));
    let data: Value = serde_json::from_slice(&bytes)?;
    match data {
        Value::Array(items) => Ok((items, source_hash)),
        _ => Err(ImportError::Input(
            "top-level JSON value must be an array of conversations".into(),
        )),
    }
}

/// Parse the export at `json_path` into `store`, replacing its contents.
///
/// `format` selects the export shape; when `None` it is detected from the
/// data. Records that cannot be used are dropped and counted; only an
/// unreadable file, invalid JSON or an unrecognized shape is an error, and in
/// that case the store is left untouched.
pub fn run(
    json_path: &Path,
    store: &mut MessageStore,
    format: Option<ExportFormat>,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<ParseSummary, ImportError> {
    let mut progress = Progress::new("parse", progress);
    progress.report(0.0, "Loading export");
    let (conversations, source_hash) = load_export(json_path)?;

    progress.report(0.2, "Detecting format");
    let detected = detect_conversations(&conversations).map_err(ImportError::UnrecognizedFormat)?;
    let format = match format {
        Some(requested) if requested != detected => {
            return Err(ImportError::UnrecognizedFormat(format!(
                "requested {requested} but the export looks like {detected}"
            )));
        }
        Some(requested) => requested,
        None => detected,
    };
    if !conversations.iter().any(|c| format.matches(c)) {
        return Err(ImportError::UnrecognizedFormat(format!(
            "no conversation has the {format} shape"
        )));
    }
    tracing::info!(%format, conversations = conversations.len(), "Parsing export");

    progress.report(0.3, "Extracting messages");
    let extraction = extract_messages(format, &conversations);
    if extraction.dropped.total() > 0 {
        tracing::info!(dropped = ?extraction.dropped, "Dropped unusable records");
    }

    progress.report(0.6, "Aggregating threads");
    let threads = aggregate_threads(&extraction.messages, &extraction.titles);

    progress.report(0.7, "Writing canonical store");
    let meta = [
        ("format", format.as_str().to_string()),
        ("source_hash", source_hash.clone()),
    ];
    let counts = store.replace_all(&extraction.messages, &threads, &meta)?;

    let user_messages = extraction
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .count();
    let months: BTreeSet<&str> = extraction
        .messages
        .iter()
        .map(|m| m.year_month.as_str())
        .collect();

    let summary = ParseSummary {
        format,
        conversations: extraction.conversations,
        messages_written: counts.messages,
        threads_written: counts.threads,
        user_messages,
        assistant_messages: counts.messages - user_messages,
        months: months.len(),
        dropped: extraction.dropped,
        source_hash,
    };
    progress.finish("Parse complete");
    Ok(summary)
}

fn aggregate_threads(
    messages: &[chatlens_core::model::Message],
    titles: &BTreeMap<String, String>,
) -> Vec<Thread> {
    let mut threads: BTreeMap<&str, Thread> = BTreeMap::new();
    for m in messages {
        threads
            .entry(m.thread_id.as_str())
            .or_insert_with(|| {
                let title = titles.get(&m.thread_id).cloned().unwrap_or_default();
                Thread::empty(m.thread_id.clone(), title)
            })
            .absorb(m);
    }
    threads.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    const MONTH_STARTS: [f64; 6] = [
        1_704_067_200.0, // 2024-01-01
        1_706_745_600.0, // 2024-02-01
        1_709_251_200.0, // 2024-03-01
        1_711_929_600.0, // 2024-04-01
        1_714_521_600.0, // 2024-05-01
        1_717_200_000.0, // 2024-06-01
    ];

    /// Tree-shaped export with `per_month[i]` user/assistant exchanges in
    /// month `i`, grouped into threads of ten exchanges. The first thread also
    /// carries one system node, which the parser must drop.
    fn tree_fixture(per_month: &[usize]) -> Value {
        let mut conversations = Vec::new();
        for (mi, (&start, &count)) in MONTH_STARTS.iter().zip(per_month).enumerate() {
            let mut mapping = serde_json::Map::new();
            let mut conv_index = 0;
            if mi == 0 {
                mapping.insert(
                    "system".into(),
                    json!({"message": {"author": {"role": "system"}, "create_time": start,
                        "content": {"parts": ["You are a helpful assistant"]}}}),
                );
            }
            for i in 0..count {
                let ts = start + (i as f64) * 600.0;
                mapping.insert(
                    format!("u-{mi}-{i}"),
                    json!({"message": {"author": {"role": "user"}, "create_time": ts,
                        "content": {"parts": [format!("question {i} about topic {}", i % 7)]}}}),
                );
                mapping.insert(
                    format!("a-{mi}-{i}"),
                    json!({"message": {"author": {"role": "assistant"}, "create_time": ts + 30.0,
                        "content": {"parts": [format!("answer {i}")]}}}),
                );
                if (i + 1) % 10 == 0 || i + 1 == count {
                    conversations.push(json!({
                        "id": format!("c-{mi}-{conv_index}"),
                        "title": format!("Thread {mi}/{conv_index}"),
                        "mapping": Value::Object(std::mem::take(&mut mapping)),
                    }));
                    conv_index += 1;
                }
            }
        }
        Value::Array(conversations)
    }

    fn write_fixture(dir: &Path, data: &Value) -> std::path::PathBuf {
        let path = dir.join("conversations.json");
        fs::write(&path, serde_json::to_vec(data).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_tree_fixture_counts_and_months() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), &tree_fixture(&[417, 417, 417, 417, 416, 416]));
        let mut store = MessageStore::open_in_memory().unwrap();

        let summary = run(&path, &mut store, None, None).unwrap();
        assert_eq!(summary.format, ExportFormat::Tree);
        assert_eq!(summary.user_messages, 2_500);
        assert_eq!(summary.assistant_messages, 2_500);
        assert_eq!(summary.messages_written, 5_000);
        assert_eq!(summary.months, 6);
        assert_eq!(summary.dropped.role, 1);

        let messages = store.messages().unwrap();
        assert_eq!(messages.len(), 5_000);
        assert!(messages.iter().all(|m| m.timestamp >= 0.0));
        assert_eq!(store.months().unwrap().len(), 6);
        assert_eq!(store.meta("format").unwrap().as_deref(), Some("tree"));
        assert_eq!(
            store.meta("source_hash").unwrap().as_deref(),
            Some(summary.source_hash.as_str())
        );
    }

    #[test]
    fn test_list_export_with_explicit_format() {
        let dir = tempfile::tempdir().unwrap();
        let data = json!([{
            "uuid": "t1", "name": "Claude chat",
            "chat_messages": [
                {"uuid": "m1", "sender": "human", "text": "hi", "created_at": "2024-01-02T00:00:00Z"},
                {"uuid": "m2", "sender": "assistant", "text": "hello", "created_at": "2024-02-02T00:00:00Z"},
                {"uuid": "m3", "sender": "human", "text": "bad", "created_at": "02/03/2024"}
            ]
        }]);
        let path = write_fixture(dir.path(), &data);
        let mut store = MessageStore::open_in_memory().unwrap();
        let summary = run(&path, &mut store, Some(ExportFormat::List), None).unwrap();
        assert_eq!(summary.messages_written, 2);
        assert_eq!(summary.dropped.timestamp, 1);
        assert_eq!(summary.threads_written, 1);

        let threads = store.threads().unwrap();
        assert_eq!(threads[0].title, "Claude chat");
        assert_eq!(threads[0].user_chars, 2);
        assert_eq!(threads[0].asst_chars, 5);
    }

    #[test]
    fn test_invalid_input_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_fixture(dir.path(), &tree_fixture(&[3]));
        let mut store = MessageStore::open_in_memory().unwrap();
        run(&good, &mut store, None, None).unwrap();
        let before = store.message_count().unwrap();

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(
            run(&bad, &mut store, None, None),
            Err(ImportError::Json(_))
        ));

        fs::write(&bad, r#"[{"something": "else"}]"#).unwrap();
        assert!(matches!(
            run(&bad, &mut store, None, None),
            Err(ImportError::UnrecognizedFormat(_))
        ));

        fs::write(&bad, r#"{"mapping": {}}"#).unwrap();
        assert!(matches!(
            run(&bad, &mut store, None, None),
            Err(ImportError::Input(_))
        ));

        fs::write(&bad, "[]").unwrap();
        assert!(matches!(
            run(&bad, &mut store, Some(ExportFormat::Tree), None),
            Err(ImportError::UnrecognizedFormat(_))
        ));

        assert!(matches!(
            run(&dir.path().join("missing.json"), &mut store, None, None),
            Err(ImportError::Io(_))
        ));
        assert_eq!(store.message_count().unwrap(), before);
    }

    #[test]
    fn test_mismatched_explicit_format_keeps_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), &tree_fixture(&[1]));
        let mut store = MessageStore::open_in_memory().unwrap();
        run(&path, &mut store, None, None).unwrap();
        assert_eq!(store.message_count().unwrap(), 2);

        let err = run(&path, &mut store, Some(ExportFormat::List), None).unwrap_err();
        assert!(matches!(err, ImportError::UnrecognizedFormat(_)));
        assert_eq!(store.message_count().unwrap(), 2);
        assert_eq!(store.meta("format").unwrap().as_deref(), Some("tree"));
    }

    #[test]
    fn test_progress_is_monotonic_and_ends_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), &tree_fixture(&[2, 2]));
        let mut store = MessageStore::open_in_memory().unwrap();
        let mut seen = Vec::new();
        let mut cb = |f: f64, _: &str| seen.push(f);
        run(&path, &mut store, None, Some(&mut cb)).unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), &tree_fixture(&[4, 1, 4]));
        let mut store = MessageStore::open_in_memory().unwrap();
        let first = run(&path, &mut store, None, None).unwrap();
        let messages = store.messages().unwrap();
        let second = run(&path, &mut store, None, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(messages, store.messages().unwrap());
    }
}
