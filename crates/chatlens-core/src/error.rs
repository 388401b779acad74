use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },

    #[error("Canonical store is empty (run `chatlens parse` first)")]
    EmptyStore,

    #[error("Missing table: {0}")]
    MissingTable(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}
