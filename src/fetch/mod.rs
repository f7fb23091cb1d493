//! Page fetching from the remote Codex API.
//!
//! # Retry behavior
//!
//! | Response | Action |
//! |----------|--------|
//! | timeout / connect failure | sleep 5s, retry same page; skip page once 5 retries also time out |
//! | 429 | sleep `Retry-After` (60s default), retry same page, uncapped |
//! | other non-200 | abort section |
//! | 200 with empty or absent `data` | section exhausted |

mod client;
mod error;
mod retry_after;

pub use client::{
    ApiIdentity, DEFAULT_MAX_TIMEOUTS, DEFAULT_TIMEOUT_RETRY_DELAY, FetchSettings, PageFetcher,
    PageOutcome, PageSource, decode_page,
};
pub use error::FetchError;
pub use retry_after::{DEFAULT_RETRY_AFTER, parse_retry_after};
