//! Shared types and primitives for the agekeeper retention engine.
//!
//! Everything here is either a pure function over the filesystem (`fsobj`),
//! a plain data type (`record`, `config`), or a constant table (`events`).
//! No shared state lives in this crate; the daemon owns all of that.

pub mod config;
pub mod events;
pub mod fsobj;
pub mod record;

/// Current wall-clock time in epoch milliseconds.
///
/// Preservation ages must survive a restart, so records carry wall-clock
/// timestamps rather than process-local instants.
pub fn now_ms() -> i64 {
  chrono::Utc::now().timestamp_millis()
}
