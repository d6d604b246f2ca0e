//! Human-readable labels for the download page and the sender console.

use crate::options::SaveMinutes;
use std::time::Duration;

/// Sender label when nothing better is known.
pub const UNKNOWN_SENDER: &str = "Unknown person";

/// Resolve who a file is from.
///
/// Precedence: the sender's `from=` directive, then their verified
/// subdomain, then [`UNKNOWN_SENDER`].
pub fn sender_label<'a>(from: Option<&'a str>, subdomain: Option<&'a str>) -> &'a str {
    from.or(subdomain).unwrap_or(UNKNOWN_SENDER)
}

/// Lifetime as a bare quantity, e.g. `1 minute` or `15 minutes`.
pub fn ttl_label(ttl: SaveMinutes) -> String {
    match ttl.get() {
        1 => "1 minute".to_string(),
        n => format!("{n} minutes"),
    }
}

/// Lifetime relative to now, e.g. `in 15 minutes`.
pub fn expiry_label(ttl: SaveMinutes) -> String {
    format!("in {}", ttl_label(ttl))
}

/// Time since a link was sent, e.g. `42 seconds ago` or `3 minutes 5 seconds ago`.
pub fn elapsed_label(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (minutes, seconds) = (total / 60, total % 60);
    if minutes == 0 {
        format!("{seconds} seconds ago")
    } else {
        format!("{minutes} minutes {seconds} seconds ago")
    }
}
