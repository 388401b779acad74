use chatlens_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Computation error: {0}")]
    Computation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Coarse classification used by callers to decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or unreadable inputs, including absent prior-stage tables.
    Input,
    Configuration,
    Computation,
}

impl AnalysisError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) | Self::Core(CoreError::Config(_)) => ErrorClass::Configuration,
            Self::Computation(_) => ErrorClass::Computation,
            Self::Core(_) | Self::Io(_) | Self::Csv(_) => ErrorClass::Input,
        }
    }
}
