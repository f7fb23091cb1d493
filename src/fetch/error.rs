//! Error types for page fetching.
//!
//! Every variant here ends the current section. Timeouts and rate limits are
//! retried inside the fetcher and never surface as errors.

use thiserror::Error;

use crate::section::Section;

/// Section-fatal failures while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// A configured header value is not a valid HTTP header.
    #[error("invalid value for header `{name}`")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
    },

    /// The API base cannot carry path segments (e.g. `mailto:` URLs).
    #[error("API base '{url}' cannot be used to build section URLs")]
    InvalidBase {
        /// The rejected base.
        url: String,
    },

    /// Transport failure other than a timeout (DNS, TLS, protocol).
    #[error("network error fetching `{section}` page {page}: {source}")]
    Network {
        section: Section,
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with a status other than 200 or 429.
    #[error("HTTP {status} fetching `{section}` page {page}")]
    HttpStatus {
        section: Section,
        page: u32,
        status: u16,
    },

    /// The body was not valid JSON.
    #[error("invalid JSON body for `{section}` page {page}: {source}")]
    Decode {
        section: Section,
        page: u32,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    /// Creates a network error.
    pub fn network(section: Section, page: u32, source: reqwest::Error) -> Self {
        Self::Network {
            section,
            page,
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(section: Section, page: u32, status: u16) -> Self {
        Self::HttpStatus {
            section,
            page,
            status,
        }
    }

    /// Creates a decode error.
    pub fn decode(section: Section, page: u32, source: serde_json::Error) -> Self {
        Self::Decode {
            section,
            page,
            source,
        }
    }
}
