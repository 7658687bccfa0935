//! Event logging adapters.

mod jsonl;

pub use jsonl::JsonlEventLog;
