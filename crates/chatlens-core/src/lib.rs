//! Core data model, canonical message store and stage configuration for
//! chatlens.

pub mod config;
pub mod error;
pub mod model;
pub mod progress;
pub mod storage;

pub use error::CoreError;
pub use progress::{Progress, ProgressObserver};
