//! Small time helpers shared by the diff, deferred-edge, and workflow
//! layers, all of which compare timestamps to decide "who wins".

use chrono::{DateTime, Utc};

/// The current UTC time.
///
/// Centralized so tests can see at a glance where wall-clock time enters
/// the system.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}
