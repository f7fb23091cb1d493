//! Database sink: per-batch upserts with the backend error policy.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use super::{
    BackendError, BatchOutcome, FailureKind, RetryDecision, RetryPolicy, Sink, SinkError,
    SkipReason, UpsertBackend,
};
use crate::config::UnknownErrorPolicy;
use crate::envelope::Envelope;
use crate::pacing::Sleeper;
use crate::section::Section;

/// Upserts every batch through an [`UpsertBackend`].
pub struct DatabaseSink<B> {
    backend: B,
    policy: RetryPolicy,
    on_unknown: UnknownErrorPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<B: UpsertBackend> DatabaseSink<B> {
    /// Creates a sink with the default retry policy.
    pub fn new(backend: B, on_unknown: UnknownErrorPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            backend,
            policy: RetryPolicy::default(),
            on_unknown,
            sleeper,
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[instrument(skip(self, section, batch), fields(section = %section, backend = self.backend.name(), size = batch.len()))]
    async fn upsert_batch(
        &self,
        section: Section,
        page: u32,
        batch: &[Envelope],
    ) -> Result<BatchOutcome, SinkError> {
        if batch.is_empty() {
            debug!("empty batch, nothing to upsert");
            return Ok(BatchOutcome::Unchanged);
        }

        let missing = batch.iter().filter(|e| e.is_missing_guid()).count();
        if missing > 0 {
            warn!(missing, "batch contains records without a guid, skipping");
            return Ok(BatchOutcome::Skipped(SkipReason::MissingGuid));
        }

        let mut attempt = 1;
        loop {
            let err = match self.backend.upsert(batch).await {
                Ok(0) => {
                    info!("no rows changed, data may already exist");
                    return Ok(BatchOutcome::Unchanged);
                }
                Ok(rows) => {
                    info!(rows, "rows created or updated");
                    return Ok(BatchOutcome::Written { rows });
                }
                Err(err) => err,
            };

            if err.kind != FailureKind::StatementTimeout {
                return self.classify_failure(section, page, &err);
            }

            match self.policy.should_retry(err.kind, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        code = err.code.as_deref(),
                        "statement timeout, backing off"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(attempt, %reason, "statement timeouts exhausted retries, skipping batch");
                    return Ok(BatchOutcome::Skipped(SkipReason::RetriesExhausted {
                        attempts: attempt,
                    }));
                }
            }
        }
    }

    fn classify_failure(
        &self,
        section: Section,
        page: u32,
        err: &BackendError,
    ) -> Result<BatchOutcome, SinkError> {
        let code = err.code.as_deref();
        let reason = match err.kind {
            FailureKind::DuplicateKey => SkipReason::DuplicateKey,
            FailureKind::PayloadTooLarge => SkipReason::PayloadTooLarge,
            FailureKind::RowAffectedTwice => SkipReason::RowAffectedTwice,
            FailureKind::MissingGuid => SkipReason::MissingGuid,
            FailureKind::StatementTimeout | FailureKind::Unknown => {
                return match self.on_unknown {
                    UnknownErrorPolicy::Skip => {
                        error!(code, message = %err.message, hint = err.hint.as_deref(), "unexpected backend error, skipping batch");
                        Ok(BatchOutcome::Skipped(SkipReason::Unexpected {
                            code: err.code.clone(),
                            message: err.message.clone(),
                        }))
                    }
                    UnknownErrorPolicy::Abort => {
                        error!(code, message = %err.message, hint = err.hint.as_deref(), "unexpected backend error, aborting run");
                        Err(SinkError::aborted(section, page, err))
                    }
                };
            }
        };
        warn!(code, message = %err.message, %reason, "skipping batch");
        Ok(BatchOutcome::Skipped(reason))
    }
}

#[async_trait]
impl<B: UpsertBackend + 'static> Sink for DatabaseSink<B> {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn write_batch(
        &mut self,
        section: Section,
        page: u32,
        batch: Vec<Envelope>,
    ) -> Result<BatchOutcome, SinkError> {
        self.upsert_batch(section, page, &batch).await
    }

    async fn finish_section(&mut self, _section: Section) -> Result<Option<PathBuf>, SinkError> {
        Ok(None)
    }
}
