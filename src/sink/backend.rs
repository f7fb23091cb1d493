//! Upsert backend seam and datastore error classification.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::Envelope;

/// Classified cause of a failed upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Server-side statement timeout or client-side request timeout.
    StatementTimeout,
    DuplicateKey,
    PayloadTooLarge,
    RowAffectedTwice,
    MissingGuid,
    /// Anything not listed above.
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StatementTimeout => "statement timeout",
            Self::DuplicateKey => "duplicate key",
            Self::PayloadTooLarge => "payload too large",
            Self::RowAffectedTwice => "row affected twice",
            Self::MissingGuid => "missing guid",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Maps a datastore error code to a [`FailureKind`].
///
/// | Code | Kind |
/// |------|------|
/// | `57014` | `StatementTimeout` (query canceled) |
/// | `23505` | `DuplicateKey` (unique violation) |
/// | `520`, `54000` | `PayloadTooLarge` (JSON generation failed, program limit exceeded) |
/// | `21000` | `RowAffectedTwice` (cardinality violation) |
/// | `23502` | `MissingGuid` (not-null violation) |
/// | other | `Unknown` |
#[must_use]
pub fn classify_code(code: &str) -> FailureKind {
    match code.trim() {
        "57014" => FailureKind::StatementTimeout,
        "23505" => FailureKind::DuplicateKey,
        "520" | "54000" => FailureKind::PayloadTooLarge,
        "21000" => FailureKind::RowAffectedTwice,
        "23502" => FailureKind::MissingGuid,
        _ => FailureKind::Unknown,
    }
}

/// A failed upsert as reported by a backend.
#[derive(Debug, Clone, Error)]
#[error("{kind} ({code_label}): {message}", code_label = .code.as_deref().unwrap_or("no code"))]
pub struct BackendError {
    pub kind: FailureKind,
    /// Datastore code (SQLSTATE or PostgREST code), when one was reported.
    pub code: Option<String>,
    pub message: String,
    pub hint: Option<String>,
}

impl BackendError {
    /// Creates an error classified from a datastore code.
    pub fn from_code(
        code: impl Into<String>,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        let code = code.into();
        Self {
            kind: classify_code(&code),
            code: Some(code),
            message: message.into(),
            hint,
        }
    }

    /// Creates an error without a datastore code.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            hint: None,
        }
    }
}

/// Datastore client behind the database sink.
///
/// Implementations upsert keyed on `guid` and return the number of rows the
/// datastore reports as created or updated.
#[async_trait]
pub trait UpsertBackend: Send + Sync {
    /// Short name for logs (`rest`, `postgres`).
    fn name(&self) -> &'static str;

    /// Upserts one batch.
    async fn upsert(&self, batch: &[Envelope]) -> Result<u64, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_code_known_codes() {
        assert_eq!(classify_code("57014"), FailureKind::StatementTimeout);
        assert_eq!(classify_code("23505"), FailureKind::DuplicateKey);
        assert_eq!(classify_code("520"), FailureKind::PayloadTooLarge);
        assert_eq!(classify_code("54000"), FailureKind::PayloadTooLarge);
        assert_eq!(classify_code("21000"), FailureKind::RowAffectedTwice);
        assert_eq!(classify_code("23502"), FailureKind::MissingGuid);
    }

    #[test]
    fn test_classify_code_unknown() {
        assert_eq!(classify_code("42P01"), FailureKind::Unknown);
        assert_eq!(classify_code("500"), FailureKind::Unknown);
        assert_eq!(classify_code(""), FailureKind::Unknown);
    }

    #[test]
    fn test_backend_error_display_with_and_without_code() {
        let coded = BackendError::from_code("23505", "duplicate key value", None);
        assert_eq!(coded.kind, FailureKind::DuplicateKey);
        assert_eq!(
            coded.to_string(),
            "duplicate key (23505): duplicate key value"
        );

        let bare = BackendError::new(FailureKind::StatementTimeout, "request timed out");
        assert_eq!(
            bare.to_string(),
            "statement timeout (no code): request timed out"
        );
    }
}
