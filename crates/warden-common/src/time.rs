//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Shared primitives and utilities for the controller runtime."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Wall-clock time between two timestamps, saturating at zero when `end` precedes `start`.
pub fn elapsed_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or_default()
}

/// Whether `timestamp` lies within `window` before `now` (inclusive).
///
/// Timestamps in the future relative to `now` are treated as inside the window.
pub fn within_window(timestamp: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    elapsed_between(timestamp, now) <= window
}
