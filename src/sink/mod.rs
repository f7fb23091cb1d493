//! Persistence sinks for normalized envelopes.
//!
//! A run picks exactly one sink up front and lends it to every section walk:
//!
//! - [`DatabaseSink`] upserts each page's batch through an [`UpsertBackend`]
//!   ([`RestBackend`] or [`PostgresBackend`]) and owns the backend retry policy.
//! - [`FileSink`] buffers a whole section and writes `{section}.json` when the
//!   section finishes.
//!
//! Batch-level failures come back as [`BatchOutcome::Skipped`]; only
//! [`SinkError`] values reach the walker, and only [`SinkError::Aborted`] stops
//! the run.

mod backend;
mod database;
mod file;
mod postgres;
mod rest;
mod retry;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::Envelope;
use crate::section::Section;

pub use backend::{BackendError, FailureKind, UpsertBackend, classify_code};
pub use database::DatabaseSink;
pub use file::FileSink;
pub use postgres::PostgresBackend;
pub use rest::{DEFAULT_REST_TIMEOUT, REST_TABLE, RestBackend};
pub use retry::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy};

/// Why a batch was dropped without being persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Unique-key conflict on `guid` (`23505`).
    DuplicateKey,
    /// The batch could not be encoded or exceeded a size limit.
    PayloadTooLarge,
    /// Two rows in one batch resolved to the same `guid` (`21000`).
    RowAffectedTwice,
    /// At least one envelope has an empty `guid`.
    MissingGuid,
    /// Statement timeouts persisted through every attempt.
    RetriesExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// Unclassified backend error, skipped under the `skip` policy.
    Unexpected {
        code: Option<String>,
        message: String,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateKey => f.write_str("duplicate key"),
            Self::PayloadTooLarge => f.write_str("payload too large"),
            Self::RowAffectedTwice => f.write_str("row affected twice"),
            Self::MissingGuid => f.write_str("missing guid"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "timed out after {attempts} attempts")
            }
            Self::Unexpected { code, message } => write!(
                f,
                "unexpected error ({}): {message}",
                code.as_deref().unwrap_or("no code")
            ),
        }
    }
}

/// Result of handing one page's envelopes to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Rows were created or updated.
    Written { rows: u64 },
    /// The datastore accepted the batch but reported no changed rows.
    Unchanged,
    /// The batch was buffered for a later flush.
    Buffered { count: usize },
    /// The batch was dropped.
    Skipped(SkipReason),
}

impl BatchOutcome {
    /// Returns `true` unless the batch was skipped.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }
}

/// Sink failures that escape the batch-level policy.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Unclassified backend error under the `abort` policy. Stops the run.
    #[error(
        "aborted on `{section}` page {page}: backend error ({code_label}): {message}",
        code_label = .code.as_deref().unwrap_or("no code")
    )]
    Aborted {
        section: Section,
        page: u32,
        code: Option<String>,
        message: String,
    },

    /// Writing a section file failed.
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serializing a section buffer failed.
    #[error("failed to serialize `{section}` for output: {source}")]
    Serialize {
        section: Section,
        #[source]
        source: serde_json::Error,
    },

    /// A backend could not be constructed.
    #[error("failed to set up {backend} backend: {message}")]
    Setup {
        backend: &'static str,
        message: String,
    },
}

impl SinkError {
    /// Creates an abort error from the backend error that triggered it.
    pub fn aborted(section: Section, page: u32, error: &BackendError) -> Self {
        Self::Aborted {
            section,
            page,
            code: error.code.clone(),
            message: error.message.clone(),
        }
    }

    /// Creates a file I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a backend setup error.
    pub fn setup(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Setup {
            backend,
            message: message.into(),
        }
    }

    /// Returns `true` when the whole run must stop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Persistence strategy consuming envelope batches.
#[async_trait]
pub trait Sink: Send {
    /// Short name for logs (`database`, `file`).
    fn name(&self) -> &'static str;

    /// Persists or buffers one page's envelopes.
    async fn write_batch(
        &mut self,
        section: Section,
        page: u32,
        batch: Vec<Envelope>,
    ) -> Result<BatchOutcome, SinkError>;

    /// Called once after a section's walk ends, whether it finished or aborted.
    ///
    /// Returns the written file when the sink produced one.
    async fn finish_section(&mut self, section: Section) -> Result<Option<PathBuf>, SinkError>;
}
