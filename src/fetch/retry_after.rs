//! `Retry-After` header parsing for rate-limited page requests.

use std::time::{Duration, SystemTime};

use tracing::debug;

/// Delay used when a 429 response carries no usable `Retry-After` (60 seconds).
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Reads the delay the Codex API asked for on a 429.
///
/// Accepts delta-seconds (`120`) or an HTTP-date
/// (`Wed, 21 Oct 2025 07:28:00 GMT`). The delay is honored as given, however
/// long. Dates in the past mean "retry now".
/// Anything else, including negative seconds, yields `None` and the caller
/// falls back to [`DEFAULT_RETRY_AFTER`].
///
/// ```
/// use std::time::Duration;
/// use codex_core::fetch::parse_retry_after;
///
/// assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
/// assert_eq!(parse_retry_after("tomorrow"), None);
/// ```
#[must_use]
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let raw = raw.trim();

    match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) if raw.starts_with('-') && raw[1..].bytes().all(|b| b.is_ascii_digit()) => {
            debug!(raw, "negative Retry-After ignored");
            return None;
        }
        Err(_) => {
            let Ok(at) = httpdate::parse_http_date(raw) else {
                debug!(raw, "Retry-After is neither seconds nor an HTTP-date");
                return None;
            };
            Some(at.duration_since(SystemTime::now()).unwrap_or_default())
        }
    }
}
