use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The two speaking parties of a conversation. Any other author role
/// (system, tool, ...) is dropped during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::User, Role::Assistant];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse an export author label. `human` is an alias for `user`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "user" | "human" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::User => Self::Assistant,
            Self::Assistant => Self::User,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| CoreError::Invalid(format!("unknown role '{s}'")))
    }
}

/// One utterance as stored in the canonical `messages` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub node_id: String,
    pub thread_id: String,
    pub role: Role,
    /// Unix seconds, UTC.
    pub timestamp: f64,
    pub year_month: String,
    pub char_count: u64,
    pub text: String,
}

impl Message {
    /// Build a message, deriving the month bucket and character count.
    /// Returns `None` for timestamps that are negative, non-finite or out of range.
    pub fn new(
        node_id: impl Into<String>,
        thread_id: impl Into<String>,
        role: Role,
        timestamp: f64,
        text: impl Into<String>,
    ) -> Option<Self> {
        let year_month = year_month(timestamp)?;
        let text = text.into();
        Some(Self {
            node_id: node_id.into(),
            thread_id: thread_id.into(),
            role,
            timestamp,
            year_month,
            char_count: text.chars().count() as u64,
            text,
        })
    }

    pub fn year_week(&self) -> String {
        year_week(self.timestamp).unwrap_or_default()
    }
}

/// One conversation, aggregated from its messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub title: String,
    pub created_ts: f64,
    pub updated_ts: f64,
    pub msg_count: u64,
    pub user_chars: u64,
    pub asst_chars: u64,
}

impl Thread {
    pub fn empty(thread_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            title: title.into(),
            created_ts: f64::INFINITY,
            updated_ts: f64::NEG_INFINITY,
            msg_count: 0,
            user_chars: 0,
            asst_chars: 0,
        }
    }

    /// Fold one message into the thread totals.
    pub fn absorb(&mut self, message: &Message) {
        self.created_ts = self.created_ts.min(message.timestamp);
        self.updated_ts = self.updated_ts.max(message.timestamp);
        self.msg_count += 1;
        match message.role {
            Role::User => self.user_chars += message.char_count,
            Role::Assistant => self.asst_chars += message.char_count,
        }
    }
}

fn to_datetime(timestamp: f64) -> Option<DateTime<Utc>> {
    if !timestamp.is_finite() || timestamp < 0.0 {
        return None;
    }
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
}

/// Calendar month bucket (`YYYY-MM`, UTC) of a Unix timestamp.
pub fn year_month(timestamp: f64) -> Option<String> {
    to_datetime(timestamp).map(|dt| dt.format("%Y-%m").to_string())
}

/// ISO week bucket (`YYYY-Www`, UTC) of a Unix timestamp.
pub fn year_week(timestamp: f64) -> Option<String> {
    to_datetime(timestamp).map(|dt| dt.format("%G-W%V").to_string())
}
