//! Analysis stages over the canonical message store. Each stage exposes a
//! `run` entry point that writes its tables into an output directory and
//! returns a small summary.

pub mod alignment;
pub mod coupling;
pub mod domains;
pub mod dynamics;
pub mod error;
pub mod profile;
pub mod robustness;
pub mod stats;
pub mod topics;

pub use error::{AnalysisError, ErrorClass};
