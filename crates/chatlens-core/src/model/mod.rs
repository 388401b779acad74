pub mod aggregate;
pub mod message;

pub use aggregate::{MonthlyShareRow, ShareTable, WeeklyShareRow};
pub use message::{year_month, year_week, Message, Role, Thread};
