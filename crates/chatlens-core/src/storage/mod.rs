pub mod sqlite;
pub mod table;

pub use sqlite::{MessageStore, WriteCounts, STORE_SCHEMA_VERSION};
pub use table::{read_rows, write_rows};
