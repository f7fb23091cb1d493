//! Direct PostgreSQL upsert backend.

use async_trait::async_trait;
use sqlx::postgres::{PgDatabaseError, Postgres};
use sqlx::types::Json;
use sqlx::QueryBuilder;
use tracing::{debug, instrument};

use super::{BackendError, FailureKind, UpsertBackend};
use crate::db::Database;
use crate::envelope::Envelope;

const UPSERT_PREFIX: &str = "INSERT INTO codex (guid, section, data) ";
const UPSERT_SUFFIX: &str =
    " ON CONFLICT (guid) DO UPDATE SET section = EXCLUDED.section, data = EXCLUDED.data";

/// Upserts batches with a single multi-row `INSERT ... ON CONFLICT`.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    db: Database,
}

impl PostgresBackend {
    /// Creates a backend over an open pool.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Builds the upsert statement. Empty guids are bound as NULL so the
/// `NOT NULL` constraint reports them.
fn upsert_query(batch: &[Envelope]) -> QueryBuilder<'_, Postgres> {
    let mut query = QueryBuilder::new(UPSERT_PREFIX);
    query.push_values(batch, |mut row, envelope| {
        let guid = (!envelope.guid.is_empty()).then_some(envelope.guid.as_str());
        row.push_bind(guid)
            .push_bind(envelope.section.as_str())
            .push_bind(Json(&envelope.data));
    });
    query.push(UPSERT_SUFFIX);
    query
}

#[async_trait]
impl UpsertBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self, batch), fields(rows = batch.len()))]
    async fn upsert(&self, batch: &[Envelope]) -> Result<u64, BackendError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let result = upsert_query(batch)
            .build()
            .execute(self.db.pool())
            .await
            .map_err(|err| classify_sqlx(&err))?;
        debug!(affected = result.rows_affected(), "upsert executed");
        Ok(result.rows_affected())
    }
}

/// Maps a sqlx error onto the backend failure taxonomy.
fn classify_sqlx(err: &sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::Database(db_err) => {
            let hint = db_err
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(PgDatabaseError::hint)
                .map(str::to_string);
            match db_err.code() {
                Some(code) => BackendError::from_code(code.into_owned(), db_err.message(), hint),
                None => BackendError::new(FailureKind::Unknown, db_err.message()),
            }
        }
        sqlx::Error::Encode(source) => BackendError::new(
            FailureKind::PayloadTooLarge,
            format!("failed to encode batch: {source}"),
        ),
        sqlx::Error::PoolTimedOut => BackendError::new(
            FailureKind::StatementTimeout,
            "timed out waiting for a database connection",
        ),
        sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            BackendError::new(FailureKind::StatementTimeout, err.to_string())
        }
        _ => BackendError::new(FailureKind::Unknown, err.to_string()),
    }
}
