//! Core types and traits for the HR AI reliability layer.
//!
//! Audit entries, trust metadata and tasks are shared by the ledger, the trust wrapper,
//! the gateway and the task executor; store traits live here so each backend crate
//! can implement them without depending on its callers.

mod audit;
mod dto;
mod task;
mod traits;
mod trust;

pub use audit::*;
pub use dto::*;
pub use task::*;
pub use traits::*;
pub use trust::*;

/// Fixed-width RFC 3339 rendering (microseconds, `Z`) so that lexical order of stored
/// timestamps equals chronological order.
pub fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
