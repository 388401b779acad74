use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] chatlens_core::CoreError),

    #[error("Unrecognized export format: {0}")]
    UnrecognizedFormat(String),

    #[error("Invalid export: {0}")]
    Input(String),
}
