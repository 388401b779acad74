pub mod error;
pub mod import;
pub mod parse;
pub mod precheck;

pub use error::ImportError;
pub use import::{detect_format, extract_messages, ExportFormat, Extractor};
pub use parse::{load_export, ParseSummary};
pub use precheck::PrecheckReport;
