//! Codex Core Library
//!
//! This library paginates the Ashes Codex API section by section, gives every
//! record a stable identity, and persists the results through a pluggable
//! sink (PostgREST, direct PostgreSQL, or JSON files).
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - `config.json` settings and environment credentials
//! - [`section`] - The known API sections and their per-section rules
//! - [`envelope`] - Identity resolution and the persisted `{guid, section, data}` unit
//! - [`fetch`] - Page fetcher with timeout and rate-limit handling
//! - [`sink`] - Database and file sinks, upsert backends, backend retry policy
//! - [`pipeline`] - Section walker and run orchestration
//! - [`db`] - PostgreSQL connection pool
//! - [`schema`] - Table installation from the schema script
//! - [`pacing`] - Injectable sleeping for every delay in the pipeline

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod envelope;
pub mod fetch;
pub mod pacing;
pub mod pipeline;
pub mod schema;
pub mod section;
pub mod sink;
pub mod user_agent;

// Re-export commonly used types
pub use config::{
    AppConfig, ConfigError, CredentialScope, Credentials, DbBackend, SinkMode, UnknownErrorPolicy,
};
pub use db::{Database, DbError};
pub use envelope::{Envelope, RawRecord, resolve};
pub use fetch::{ApiIdentity, FetchError, FetchSettings, PageFetcher, PageOutcome, PageSource};
pub use pacing::{RecordingSleeper, Sleeper, TokioSleeper};
pub use pipeline::{
    NoopObserver, Pipeline, PipelineError, PipelineObserver, RunSummary, SectionReport,
    SectionWalker, WalkSettings,
};
pub use schema::{SchemaError, SchemaScript, install_tables, load_schema, split_schema};
pub use section::Section;
pub use sink::{
    BackendError, BatchOutcome, DatabaseSink, FailureKind, FileSink, PostgresBackend,
    RestBackend, RetryPolicy, Sink, SinkError, SkipReason, UpsertBackend,
};
pub use user_agent::codex_user_agent;
