use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CoreError;
use crate::model::{Message, Role, Thread};

pub const STORE_SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS messages (
    node_id     TEXT PRIMARY KEY,
    thread_id   TEXT NOT NULL,
    role        TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
    timestamp   REAL NOT NULL CHECK (timestamp >= 0),
    year_month  TEXT NOT NULL,
    char_count  INTEGER NOT NULL,
    text        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_messages_month ON messages(year_month);

CREATE TABLE IF NOT EXISTS threads (
    thread_id   TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    created_ts  REAL NOT NULL,
    updated_ts  REAL NOT NULL,
    msg_count   INTEGER NOT NULL,
    user_chars  INTEGER NOT NULL,
    asst_chars  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
";

/// Row counts written by [`MessageStore::replace_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub messages: usize,
    pub threads: usize,
}

/// The canonical message store: one SQLite file written once by the parser
/// and read by every analysis stage.
pub struct MessageStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl MessageStore {
    /// Open (or create) the store at `path` and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an existing store, failing if it holds no messages.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CoreError::EmptyStore);
        }
        let store = Self::open(path)?;
        if store.message_count()? == 0 {
            return Err(CoreError::EmptyStore);
        }
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, path: None };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, CoreError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn migrate(&self) -> Result<(), CoreError> {
        let current = self.schema_version()?;
        if current > STORE_SCHEMA_VERSION {
            return Err(CoreError::UnsupportedSchema {
                found: current,
                supported: STORE_SCHEMA_VERSION,
            });
        }
        if current < 1 {
            self.conn.execute_batch(SCHEMA_V1)?;
            self.conn.execute("PRAGMA user_version = 1", [])?;
        }
        Ok(())
    }

    /// Replace the full contents of the store in a single transaction.
    ///
    /// While writing, an exclusive advisory lock is held on `<db>.lock`; on
    /// any error the transaction rolls back and the previous contents remain.
    pub fn replace_all(
        &mut self,
        messages: &[Message],
        threads: &[Thread],
        meta: &[(&str, String)],
    ) -> Result<WriteCounts, CoreError> {
        let lock = match &self.path {
            Some(path) => Some(acquire_lock(path)?),
            None => None,
        };

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM messages", [])?;
        tx.execute("DELETE FROM threads", [])?;
        tx.execute("DELETE FROM meta", [])?;
        {
            let mut insert_msg = tx.prepare(
                "INSERT INTO messages (node_id, thread_id, role, timestamp, year_month, char_count, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for m in messages {
                insert_msg.execute(params![
                    m.node_id,
                    m.thread_id,
                    m.role.as_str(),
                    m.timestamp,
                    m.year_month,
                    m.char_count as i64,
                    m.text,
                ])?;
            }

            let mut insert_thread = tx.prepare(
                "INSERT INTO threads (thread_id, title, created_ts, updated_ts, msg_count, user_chars, asst_chars)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for t in threads {
                insert_thread.execute(params![
                    t.thread_id,
                    t.title,
                    t.created_ts,
                    t.updated_ts,
                    t.msg_count as i64,
                    t.user_chars as i64,
                    t.asst_chars as i64,
                ])?;
            }

            let mut insert_meta = tx.prepare("INSERT INTO meta (key, value) VALUES (?1, ?2)")?;
            for (key, value) in meta {
                insert_meta.execute(params![key, value])?;
            }
        }
        tx.commit()?;

        if let Some(file) = lock {
            fs2::FileExt::unlock(&file)?;
        }

        tracing::info!(
            messages = messages.len(),
            threads = threads.len(),
            "Canonical store written"
        );
        Ok(WriteCounts {
            messages: messages.len(),
            threads: threads.len(),
        })
    }

    pub fn message_count(&self) -> Result<usize, CoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn thread_count(&self) -> Result<usize, CoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// All messages in stream order: timestamp, then node id.
    pub fn messages(&self) -> Result<Vec<Message>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT node_id, thread_id, role, timestamp, year_month, char_count, text
             FROM messages ORDER BY timestamp, node_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (node_id, thread_id, role, timestamp, year_month, char_count, text) = row?;
            let role: Role = role.parse()?;
            out.push(Message {
                node_id,
                thread_id,
                role,
                timestamp,
                year_month,
                char_count: char_count as u64,
                text,
            });
        }
        Ok(out)
    }

    pub fn threads(&self) -> Result<Vec<Thread>, CoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT thread_id, title, created_ts, updated_ts, msg_count, user_chars, asst_chars
             FROM threads ORDER BY created_ts, thread_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Thread {
                thread_id: row.get(0)?,
                title: row.get(1)?,
                created_ts: row.get(2)?,
                updated_ts: row.get(3)?,
                msg_count: row.get::<_, i64>(4)? as u64,
                user_chars: row.get::<_, i64>(5)? as u64,
                asst_chars: row.get::<_, i64>(6)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct month buckets, ascending.
    pub fn months(&self) -> Result<Vec<String>, CoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT year_month FROM messages ORDER BY year_month")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn meta(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }
}

fn acquire_lock(db_path: &Path) -> Result<fs::File, CoreError> {
    let mut lock_path = db_path.as_os_str().to_owned();
    lock_path.push(".lock");
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(PathBuf::from(lock_path))?;
    fs2::FileExt::lock_exclusive(&file)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<Message>, Vec<Thread>) {
        let messages = vec![
            Message::new("n2", "t1", Role::Assistant, 1_700_000_100.0, "Sure, here it is").unwrap(),
            Message::new("n1", "t1", Role::User, 1_700_000_000.0, "Show me the plan").unwrap(),
        ];
        let mut thread = Thread::empty("t1", "Plans");
        for m in &messages {
            thread.absorb(m);
        }
        (messages, vec![thread])
    }

    #[test]
    fn migration_sets_schema_version() {
        let store = MessageStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), STORE_SCHEMA_VERSION);
        assert_eq!(store.message_count().unwrap(), 0);
    }

    #[test]
    fn replace_all_roundtrip_orders_by_timestamp() {
        let (messages, threads) = sample();
        let mut store = MessageStore::open_in_memory().unwrap();
        let counts = store
            .replace_all(&messages, &threads, &[("format", "tree".into())])
            .unwrap();
        assert_eq!(counts, WriteCounts { messages: 2, threads: 1 });

        let read = store.messages().unwrap();
        assert_eq!(read[0].node_id, "n1");
        assert_eq!(read[1].role, Role::Assistant);
        assert_eq!(store.threads().unwrap()[0].msg_count, 2);
        assert_eq!(store.months().unwrap(), vec!["2023-11".to_string()]);
        assert_eq!(store.meta("format").unwrap().as_deref(), Some("tree"));
        assert_eq!(store.meta("missing").unwrap(), None);
    }

    #[test]
    fn replace_all_overwrites_previous_contents() {
        let (messages, threads) = sample();
        let mut store = MessageStore::open_in_memory().unwrap();
        store.replace_all(&messages, &threads, &[]).unwrap();
        store.replace_all(&messages[..1], &threads, &[]).unwrap();
        assert_eq!(store.message_count().unwrap(), 1);
    }

    #[test]
    fn failed_write_leaves_previous_contents() {
        let (messages, threads) = sample();
        let mut store = MessageStore::open_in_memory().unwrap();
        store.replace_all(&messages, &threads, &[]).unwrap();

        // Duplicate primary key aborts the transaction.
        let dup = vec![messages[0].clone(), messages[0].clone()];
        assert!(store.replace_all(&dup, &threads, &[]).is_err());
        assert_eq!(store.message_count().unwrap(), 2);
    }

    #[test]
    fn file_store_persists_and_requires_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        assert!(matches!(
            MessageStore::open_existing(&path),
            Err(CoreError::EmptyStore)
        ));

        let (messages, threads) = sample();
        {
            let mut store = MessageStore::open(&path).unwrap();
            store.replace_all(&messages, &threads, &[]).unwrap();
        }
        let reopened = MessageStore::open_existing(&path).unwrap();
        assert_eq!(reopened.thread_count().unwrap(), 1);
    }
}
