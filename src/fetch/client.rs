//! HTTP page fetcher for the Codex API.
//!
//! [`PageFetcher`] issues one GET per page and owns the request-level retry
//! state machine: timeouts are retried a bounded number of times, 429
//! responses are retried after the server-directed delay, and every other
//! non-200 status aborts the section.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::error::FetchError;
use super::retry_after::{DEFAULT_RETRY_AFTER, parse_retry_after};
use crate::config::{AppConfig, Credentials};
use crate::envelope::RawRecord;
use crate::pacing::Sleeper;
use crate::section::{DEFAULT_REQUEST_TIMEOUT, Section};
use crate::user_agent::codex_user_agent;

/// Timed-out retries tolerated on one page. The next timeout skips it.
pub const DEFAULT_MAX_TIMEOUTS: u32 = 5;

/// Wait between timed-out attempts on the same page (5 seconds).
pub const DEFAULT_TIMEOUT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Connect timeout for the underlying client (10 seconds).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const API_KEY_HEADER: &str = "apikey";
const REQUEST_SOURCE_HEADER: &str = "x-request-source";

/// Sent when no `ASHES_KEY` is configured.
const ANONYMOUS_API_KEY: &str = "no-api-key-needed";

/// Sent when no `ASHES_AUTH` is configured.
const ANONYMOUS_AUTHORIZATION: &str = "Bearer none";

// Fixed query hint the API expects alongside the page number.
const QUERY_HINT: [(&str, &str); 3] = [("select", "data"), ("id", ""), ("limit", "1")];

/// Result of fetching one page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// The page carried records (possibly none usable, see below).
    ///
    /// Non-object entries in the `data` array are dropped with a warning, so
    /// this can be empty even though the API did not signal exhaustion.
    Records(Vec<RawRecord>),
    /// Empty or absent `data`: the section has no more pages.
    Exhausted,
    /// The page timed out too many times and was given up on.
    Skipped {
        /// Number of timed-out attempts.
        timeouts: u32,
    },
}

/// Source of pages for the section walker.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches one page of one section.
    ///
    /// `Err` means the whole section must stop.
    async fn fetch(&self, section: Section, page: u32) -> Result<PageOutcome, FetchError>;
}

/// Request-level settings for [`PageFetcher`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// API base, e.g. `https://api.ashescodex.com`.
    pub api_base: Url,
    /// Per-request timeout for sections without an override.
    pub default_timeout: Duration,
    /// Timeouts tolerated on one page before skipping it.
    pub max_timeouts: u32,
    /// Wait between timed-out attempts.
    pub timeout_retry_delay: Duration,
    /// Wait for 429 responses without a usable `Retry-After`.
    pub default_retry_after: Duration,
}

impl FetchSettings {
    /// Default settings against the given API base.
    #[must_use]
    pub fn new(api_base: Url) -> Self {
        Self {
            api_base,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
            timeout_retry_delay: DEFAULT_TIMEOUT_RETRY_DELAY,
            default_retry_after: DEFAULT_RETRY_AFTER,
        }
    }
}

/// Header values identifying the client to the API.
#[derive(Clone)]
pub struct ApiIdentity {
    pub api_key: String,
    pub authorization: String,
    pub user_agent: String,
    pub request_source: String,
}

impl std::fmt::Debug for ApiIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiIdentity")
            .field("api_key", &"<redacted>")
            .field("authorization", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("request_source", &self.request_source)
            .finish()
    }
}

impl ApiIdentity {
    /// Builds the identity from run configuration, falling back to the
    /// anonymous placeholders when API credentials are absent.
    #[must_use]
    pub fn from_config(config: &AppConfig, credentials: &Credentials) -> Self {
        Self {
            api_key: credentials
                .ashes_key
                .clone()
                .unwrap_or_else(|| ANONYMOUS_API_KEY.to_string()),
            authorization: credentials
                .ashes_auth
                .clone()
                .unwrap_or_else(|| ANONYMOUS_AUTHORIZATION.to_string()),
            user_agent: codex_user_agent(&config.version),
            request_source: config.request_source.clone(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, FetchError> {
        let value = |name: &'static str, raw: &str| {
            HeaderValue::from_str(raw).map_err(|_| FetchError::InvalidHeader { name })
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            value(API_KEY_HEADER, &self.api_key)?,
        );
        headers.insert(AUTHORIZATION, value("authorization", &self.authorization)?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, value("user-agent", &self.user_agent)?);
        headers.insert(
            HeaderName::from_static(REQUEST_SOURCE_HEADER),
            value(REQUEST_SOURCE_HEADER, &self.request_source)?,
        );
        Ok(headers)
    }
}

/// One raw exchange with the API, before retry decisions.
enum Attempt {
    RateLimited(Duration),
    Status(u16),
    Body(Vec<u8>),
}

/// Fetches pages of Codex sections over HTTP.
pub struct PageFetcher {
    client: Client,
    settings: FetchSettings,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFetcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PageFetcher {
    /// Creates a fetcher.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidHeader`] if an identity value cannot be
    /// sent as a header, [`FetchError::InvalidBase`] if the API base cannot
    /// take path segments, or [`FetchError::Client`] if the client fails to
    /// build.
    pub fn new(
        settings: FetchSettings,
        identity: &ApiIdentity,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, FetchError> {
        if settings.api_base.cannot_be_a_base() {
            return Err(FetchError::InvalidBase {
                url: settings.api_base.to_string(),
            });
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(identity.headers()?)
            .gzip(true)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            settings,
            sleeper,
        })
    }

    /// Builds `{api_base}/{section}?page={n}&select=data&id=&limit=1`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidBase`] if the base cannot take path
    /// segments.
    pub fn page_url(&self, section: Section, page: u32) -> Result<Url, FetchError> {
        let mut url = self.settings.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidBase {
                url: self.settings.api_base.to_string(),
            })?
            .pop_if_empty()
            .push(section.as_str());
        {
            let mut query = url.query_pairs_mut();
            query.clear().append_pair("page", &page.to_string());
            for (key, value) in QUERY_HINT {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn attempt(&self, url: &Url, timeout: Duration) -> Result<Attempt, reqwest::Error> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let delay = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after)
                .unwrap_or(self.settings.default_retry_after);
            return Ok(Attempt::RateLimited(delay));
        }
        if status != StatusCode::OK {
            return Ok(Attempt::Status(status.as_u16()));
        }
        Ok(Attempt::Body(response.bytes().await?.to_vec()))
    }
}

#[async_trait]
impl PageSource for PageFetcher {
    #[instrument(skip(self, section), fields(section = %section))]
    async fn fetch(&self, section: Section, page: u32) -> Result<PageOutcome, FetchError> {
        let url = self.page_url(section, page)?;
        let timeout = section.request_timeout(self.settings.default_timeout);
        let mut timeouts = 0_u32;

        loop {
            debug!(%url, timeout_ms = timeout.as_millis(), "requesting page");
            match self.attempt(&url, timeout).await {
                Ok(Attempt::Body(body)) => return decode_page(section, page, &body),
                Ok(Attempt::RateLimited(delay)) => {
                    warn!(
                        page,
                        retry_after_secs = delay.as_secs(),
                        "rate limited, retrying same page after delay"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Ok(Attempt::Status(status)) => {
                    return Err(FetchError::http_status(section, page, status));
                }
                Err(err) if err.is_timeout() || err.is_connect() => {
                    timeouts += 1;
                    if timeouts > self.settings.max_timeouts {
                        warn!(page, timeouts, "page timed out too many times, skipping page");
                        return Ok(PageOutcome::Skipped { timeouts });
                    }
                    warn!(
                        page,
                        timeouts,
                        retry_in_secs = self.settings.timeout_retry_delay.as_secs(),
                        error = %err,
                        "request timed out, retrying same page"
                    );
                    self.sleeper.sleep(self.settings.timeout_retry_delay).await;
                }
                Err(err) => return Err(FetchError::network(section, page, err)),
            }
        }
    }
}

/// Extracts the records of one page from a response body.
///
/// # Errors
///
/// Returns [`FetchError::Decode`] if the body is not JSON.
pub fn decode_page(section: Section, page: u32, body: &[u8]) -> Result<PageOutcome, FetchError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|source| FetchError::decode(section, page, source))?;

    let items = match value {
        Value::Object(mut root) => match root.remove("data") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => {
                info!(section = %section, page, "no more data, section exhausted");
                return Ok(PageOutcome::Exhausted);
            }
        },
        _ => {
            info!(section = %section, page, "response has no data object, section exhausted");
            return Ok(PageOutcome::Exhausted);
        }
    };

    let total = items.len();
    let records: Vec<RawRecord> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(record) => Some(record),
            _ => None,
        })
        .collect();

    if records.len() < total {
        warn!(
            section = %section,
            page,
            ignored = total - records.len(),
            "ignoring non-object entries in data array"
        );
    }

    Ok(PageOutcome::Records(records))
}
