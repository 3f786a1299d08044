#![forbid(unsafe_code)]
//! Atomic multi-block updates.
//!
//! Every mutating filesystem operation stages its block images in a
//! [`Transaction`], then hands them to the [`Journal`], which makes the whole
//! set durable or none of it. The journal lives in a fixed region at the tail
//! of the image: one header block followed by the payload slots.

mod journal;
mod transaction;

pub use journal::{Journal, RecoveryOutcome};
pub use transaction::Transaction;
