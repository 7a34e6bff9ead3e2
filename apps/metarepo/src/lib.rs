//! # Metarepo
//!
//! CLI, HTTP front end and configuration around [`metarepo_core`].
//!
//! The core is synchronous and clock-free; this crate owns the clock and the
//! async runtime.

pub mod api;
pub mod cli;
pub mod config;

use metarepo_core::Timestamp;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as a transaction time (epoch milliseconds).
///
/// A clock set before the epoch reads as the epoch.
pub fn transaction_time() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    Timestamp(i64::try_from(millis).unwrap_or(i64::MAX))
}
