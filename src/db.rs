//! PostgreSQL connection pool management.
//!
//! Used by the direct postgres upsert backend and by the `init-db` command.
//!
//! # Example
//!
//! ```no_run
//! use codex_core::{Credentials, Database};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Credentials::from_env().postgres_settings()?;
//! let db = Database::connect(&settings).await?;
//! sqlx::query("SELECT 1").execute(db.pool()).await?;
//! db.close().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::PostgresSettings;

/// Maximum connections in the pool. Upserts run one at a time.
const DEFAULT_MAX_CONNECTIONS: u32 = 2;

/// How long to wait for a pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Application name reported to the server.
const APPLICATION_NAME: &str = "codex-scraper";

/// Errors opening the PostgreSQL pool.
#[derive(Error, Debug)]
pub enum DbError {
    /// The server was unreachable or refused the credentials.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),
}

/// Shared handle to the `codex` database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connects to the configured PostgreSQL server.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails.
    #[instrument(skip(settings), fields(host = %settings.host, port = settings.port, database = %settings.database))]
    pub async fn connect(settings: &PostgresSettings) -> Result<Self, DbError> {
        let pool = pool_options()
            .connect_with(connect_options(settings))
            .await?;
        info!("connected to database");
        Ok(Self { pool })
    }

    /// Pool for running sqlx queries.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Waits for in-flight queries, then closes every connection.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(DEFAULT_MAX_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

fn connect_options(settings: &PostgresSettings) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(&settings.password)
        .database(&settings.database)
        .application_name(APPLICATION_NAME)
}
