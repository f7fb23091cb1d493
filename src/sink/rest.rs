//! PostgREST (Supabase) upsert backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{BackendError, FailureKind, SinkError, UpsertBackend};
use crate::config::RestSettings;
use crate::envelope::{Envelope, GUID_KEY};

/// Table envelopes are upserted into.
pub const REST_TABLE: &str = "codex";

/// Default request timeout for upserts (30 seconds).
pub const DEFAULT_REST_TIMEOUT: Duration = Duration::from_secs(30);

const PREFER: &str = "resolution=merge-duplicates,return=representation";

/// PostgREST error body.
#[derive(Debug, Deserialize)]
struct RestErrorBody {
    code: Option<Value>,
    message: Option<String>,
    hint: Option<String>,
    details: Option<String>,
}

/// Upserts batches with `POST /rest/v1/codex?on_conflict=guid`.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    endpoint: Url,
}

impl RestBackend {
    /// Creates a backend for the given project.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Setup`] if the URL is not a usable base, the key is
    /// not a valid header value, or the HTTP client cannot be built.
    pub fn new(
        settings: &RestSettings,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let endpoint = Self::endpoint_for(&settings.url)?;

        let key = HeaderValue::from_str(&settings.key)
            .map_err(|_| SinkError::setup("rest", "key is not a valid header value"))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.key))
            .map_err(|_| SinkError::setup("rest", "key is not a valid header value"))?;

        let mut headers = HeaderMap::new();
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static(PREFER));
        if let Ok(agent) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, agent);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| SinkError::setup("rest", e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    /// Builds `{base}/rest/v1/codex?on_conflict=guid`.
    fn endpoint_for(base: &str) -> Result<Url, SinkError> {
        let mut url = Url::parse(base.trim())
            .map_err(|e| SinkError::setup("rest", format!("invalid URL '{base}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SinkError::setup(
                "rest",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        url.path_segments_mut()
            .map_err(|()| SinkError::setup("rest", format!("'{base}' cannot be a base URL")))?
            .pop_if_empty()
            .extend(["rest", "v1", REST_TABLE]);
        url.query_pairs_mut()
            .clear()
            .append_pair("on_conflict", GUID_KEY);
        Ok(url)
    }

    /// Upsert endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl UpsertBackend for RestBackend {
    fn name(&self) -> &'static str {
        "rest"
    }

    #[instrument(skip(self, batch), fields(rows = batch.len()))]
    async fn upsert(&self, batch: &[Envelope]) -> Result<u64, BackendError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(batch)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;

        if status.is_success() {
            let rows = returned_rows(&body);
            debug!(status = status.as_u16(), rows, "upsert accepted");
            return Ok(rows);
        }

        Err(error_from_body(status, &body))
    }
}

/// Row count from a `return=representation` body.
fn returned_rows(body: &[u8]) -> u64 {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(rows)) => rows.len() as u64,
        _ => 0,
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::new(
            FailureKind::StatementTimeout,
            format!("upsert request timed out: {err}"),
        )
    } else {
        BackendError::new(FailureKind::Unknown, format!("upsert request failed: {err}"))
    }
}

fn error_from_body(status: StatusCode, body: &[u8]) -> BackendError {
    let parsed = serde_json::from_slice::<RestErrorBody>(body).ok();
    let (code, message, hint, details) = match parsed {
        Some(body) => (
            body.code.and_then(|code| match code {
                Value::String(s) if !s.trim().is_empty() => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            body.message,
            body.hint,
            body.details,
        ),
        None => (None, None, None, None),
    };

    let code = code.unwrap_or_else(|| status.as_u16().to_string());
    let mut message = message.unwrap_or_else(|| {
        let text = String::from_utf8_lossy(body).trim().to_string();
        if text.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            text
        }
    });
    if let Some(details) = details.filter(|d| !d.is_empty()) {
        message = format!("{message} ({details})");
    }

    BackendError::from_code(code, message, hint)
}
