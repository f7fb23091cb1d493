//! Table installation from the bundled SQL schema script.
//!
//! The script is split on a literal `-- ###BREAK` line. The first part
//! bootstraps the database (extensions, roles) and is left to an operator;
//! the second part creates the tables and is what `init-db` executes.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, instrument};

use crate::db::Database;

/// Separator between the bootstrap and table parts.
pub const SCHEMA_BREAK_MARKER: &str = "-- ###BREAK";

/// Default location of the schema script.
pub const DEFAULT_SCHEMA_FILE: &str = "sql/schemas.sql";

/// Schema loading and installation errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The script could not be read.
    #[error("failed to read schema file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The script has no break marker.
    #[error("schema script has no `-- ###BREAK` marker")]
    MissingMarker,

    /// The table part after the marker is blank.
    #[error("schema script has no statements after `-- ###BREAK`")]
    EmptyTables,

    /// Executing the table part failed.
    #[error("failed to install tables: {0}")]
    Execute(#[from] sqlx::Error),
}

/// A schema script split into its two parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaScript {
    /// Statements before the marker.
    pub bootstrap: String,
    /// Statements after the marker.
    pub tables: String,
}

/// Splits a schema script on [`SCHEMA_BREAK_MARKER`].
///
/// Anything after a second marker is ignored.
///
/// # Errors
///
/// Returns [`SchemaError::MissingMarker`] or [`SchemaError::EmptyTables`].
pub fn split_schema(script: &str) -> Result<SchemaScript, SchemaError> {
    let mut parts = script.split(SCHEMA_BREAK_MARKER);
    let bootstrap = parts.next().unwrap_or_default().trim();
    let tables = parts.next().ok_or(SchemaError::MissingMarker)?.trim();
    if tables.is_empty() {
        return Err(SchemaError::EmptyTables);
    }
    Ok(SchemaScript {
        bootstrap: bootstrap.to_string(),
        tables: tables.to_string(),
    })
}

/// Reads and splits a schema script from disk.
///
/// # Errors
///
/// Returns [`SchemaError::Read`] or any [`split_schema`] error.
pub async fn load_schema(path: &Path) -> Result<SchemaScript, SchemaError> {
    let script = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SchemaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    split_schema(&script)
}

/// Executes the table part of the script.
///
/// # Errors
///
/// Returns [`SchemaError::Execute`] if any statement fails.
#[instrument(skip_all)]
pub async fn install_tables(db: &Database, schema: &SchemaScript) -> Result<(), SchemaError> {
    sqlx::raw_sql(&schema.tables).execute(db.pool()).await?;
    info!("tables created");
    Ok(())
}
