//! Run configuration: the JSON config file and environment credentials.
//!
//! Both are read once at startup into immutable values ([`AppConfig`],
//! [`Credentials`]) and passed by reference into every component that needs
//! them. Validation happens here, never mid-run.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::pipeline::{DEFAULT_INTER_PAGE_DELAY, DEFAULT_MAX_CONSECUTIVE_SKIPS, WalkSettings};
use crate::section::{Section, UnknownSection};
use crate::sink::{DEFAULT_MAX_RETRIES, RetryPolicy};

/// Default config file path, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default remote API base.
pub const DEFAULT_API_BASE: &str = "https://api.ashescodex.com";

/// Default directory for the file sink.
pub const DEFAULT_OUTPUT_DIR: &str = "data";

/// Default value of the `X-Request-Source` header.
pub const DEFAULT_REQUEST_SOURCE: &str = "CodexScraper";

/// Default PostgreSQL port.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default PostgreSQL database name.
pub const DEFAULT_DB_NAME: &str = "postgres";

pub const ENV_ASHES_KEY: &str = "ASHES_KEY";
pub const ENV_ASHES_AUTH: &str = "ASHES_AUTH";
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_KEY";
pub const ENV_DB_HOST: &str = "DB_HOST";
pub const ENV_DB_PORT: &str = "DB_PORT";
pub const ENV_DB_USER: &str = "DB_USER";
pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_DB_NAME: &str = "DB_NAME";

/// Configuration and credential errors. All of them are startup-fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON or has unexpected keys.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// A configured section is not one of the known sections.
    #[error(transparent)]
    UnknownSection(#[from] UnknownSection),

    /// The section list is empty.
    #[error("`SECTIONS` must name at least one section")]
    NoSections,

    /// The section list names a section twice.
    #[error("section '{0}' is listed more than once in `SECTIONS`")]
    DuplicateSection(Section),

    /// A value is present but unusable.
    #[error("invalid config value for `{field}`: {reason}")]
    InvalidValue {
        /// Offending key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// One or more required credentials are missing from the environment.
    #[error("missing required config: {}", .missing.join(", "))]
    MissingCredentials {
        /// Every missing variable name, in check order.
        missing: Vec<&'static str>,
    },
}

/// Where envelopes are persisted for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkMode {
    /// Upsert into the `codex` table.
    #[default]
    Database,
    /// One JSON file per section.
    File,
}

/// Which datastore client the database sink uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    /// Hosted PostgREST endpoint (`SUPABASE_URL` / `SUPABASE_KEY`).
    #[default]
    Rest,
    /// Direct PostgreSQL connection (`DB_*` variables).
    Postgres,
}

/// What the database sink does with an unclassified backend error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownErrorPolicy {
    /// Log the error, skip the batch and keep going.
    #[default]
    Skip,
    /// Stop the whole pipeline.
    Abort,
}

/// Raw shape of `config.json`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
struct FileConfig {
    sections: Option<Vec<String>>,
    mode: Option<SinkMode>,
    db_backend: Option<DbBackend>,
    on_unknown_error: Option<UnknownErrorPolicy>,
    api_base: Option<String>,
    output_dir: Option<PathBuf>,
    request_source: Option<String>,
    version: Option<String>,
    max_retries: Option<u32>,
    inter_page_delay_ms: Option<u64>,
    max_consecutive_skips: Option<u32>,
    #[serde(default)]
    texts: BTreeMap<String, String>,
}

/// Validated run configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Sections to scrape, in order.
    pub sections: Vec<Section>,
    /// Selected sink.
    pub mode: SinkMode,
    /// Datastore client for the database sink.
    pub db_backend: DbBackend,
    /// Policy for unclassified backend errors.
    pub on_unknown_error: UnknownErrorPolicy,
    /// Remote API base URL.
    pub api_base: Url,
    /// Output directory for the file sink.
    pub output_dir: PathBuf,
    /// Value of the `X-Request-Source` header.
    pub request_source: String,
    /// Release version reported in the User-Agent.
    pub version: String,
    /// Upsert attempts per batch on statement timeouts, the first one included.
    pub max_retries: u32,
    /// Pause between page requests.
    pub inter_page_delay: Duration,
    /// Consecutive skipped pages after which a section is abandoned.
    pub max_consecutive_skips: u32,
    /// Display strings (e.g. `WELCOME`).
    pub texts: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sections: Section::ALL.to_vec(),
            mode: SinkMode::default(),
            db_backend: DbBackend::default(),
            on_unknown_error: UnknownErrorPolicy::default(),
            api_base: default_api_base(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            request_source: DEFAULT_REQUEST_SOURCE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            inter_page_delay: DEFAULT_INTER_PAGE_DELAY,
            max_consecutive_skips: DEFAULT_MAX_CONSECUTIVE_SKIPS,
            texts: BTreeMap::new(),
        }
    }
}

#[allow(clippy::expect_used)]
fn default_api_base() -> Url {
    Url::parse(DEFAULT_API_BASE).expect("default API base is a valid URL")
}

impl AppConfig {
    /// Loads and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or any
    /// validation error from [`AppConfig::from_json_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses and validates config JSON. Absent keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for malformed JSON, unknown keys, unknown or
    /// duplicate sections, an empty section list, an unusable API base, or a
    /// zero `MAX_RETRIES` / `MAX_CONSECUTIVE_SKIPS`.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = serde_json::from_str(raw)?;
        let defaults = Self::default();

        let sections = match file.sections {
            Some(names) => parse_sections(&names)?,
            None => defaults.sections,
        };

        let api_base = match file.api_base {
            Some(raw_base) => parse_api_base(&raw_base)?,
            None => defaults.api_base,
        };

        let request_source = match file.request_source {
            Some(source) if source.trim().is_empty() => {
                return Err(ConfigError::InvalidValue {
                    field: "REQUEST_SOURCE",
                    reason: "must not be blank".to_string(),
                });
            }
            Some(source) => source,
            None => defaults.request_source,
        };

        let max_retries = at_least_one("MAX_RETRIES", file.max_retries, defaults.max_retries)?;
        let max_consecutive_skips = at_least_one(
            "MAX_CONSECUTIVE_SKIPS",
            file.max_consecutive_skips,
            defaults.max_consecutive_skips,
        )?;

        Ok(Self {
            sections,
            mode: file.mode.unwrap_or(defaults.mode),
            db_backend: file.db_backend.unwrap_or(defaults.db_backend),
            on_unknown_error: file.on_unknown_error.unwrap_or(defaults.on_unknown_error),
            api_base,
            output_dir: file.output_dir.unwrap_or(defaults.output_dir),
            request_source,
            version: file
                .version
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.version),
            max_retries,
            inter_page_delay: file
                .inter_page_delay_ms
                .map_or(defaults.inter_page_delay, Duration::from_millis),
            max_consecutive_skips,
            texts: file.texts,
        })
    }

    /// Pacing and give-up settings for the section walker.
    #[must_use]
    pub fn walk_settings(&self) -> WalkSettings {
        WalkSettings {
            inter_page_delay: self.inter_page_delay,
            max_consecutive_skips: self.max_consecutive_skips,
        }
    }

    /// Statement-timeout retry policy for the database sink.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.max_retries)
    }

    /// Returns the credential groups a scrape with this config requires.
    #[must_use]
    pub fn scrape_scopes(&self) -> Vec<CredentialScope> {
        match (self.mode, self.db_backend) {
            (SinkMode::File, _) => Vec::new(),
            (SinkMode::Database, DbBackend::Rest) => vec![CredentialScope::Rest],
            (SinkMode::Database, DbBackend::Postgres) => vec![CredentialScope::Postgres],
        }
    }
}

fn parse_sections(names: &[String]) -> Result<Vec<Section>, ConfigError> {
    if names.is_empty() {
        return Err(ConfigError::NoSections);
    }
    let mut seen = HashSet::new();
    let mut sections = Vec::with_capacity(names.len());
    for name in names {
        let section: Section = name.parse()?;
        if !seen.insert(section) {
            return Err(ConfigError::DuplicateSection(section));
        }
        sections.push(section);
    }
    Ok(sections)
}

fn at_least_one(field: &'static str, value: Option<u32>, default: u32) -> Result<u32, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::InvalidValue {
            field,
            reason: "must be at least 1".to_string(),
        }),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}

fn parse_api_base(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidValue {
        field: "API_BASE",
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            field: "API_BASE",
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}

/// A group of credentials needed by one kind of datastore access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    /// PostgREST upserts.
    Rest,
    /// Direct PostgreSQL access (postgres backend, `init-db`).
    Postgres,
}

impl CredentialScope {
    fn required(self) -> &'static [&'static str] {
        match self {
            Self::Rest => &[ENV_SUPABASE_URL, ENV_SUPABASE_KEY],
            Self::Postgres => &[ENV_DB_HOST, ENV_DB_USER, ENV_DB_PASSWORD],
        }
    }
}

/// PostgREST endpoint settings.
#[derive(Clone)]
pub struct RestSettings {
    /// Project URL, e.g. `https://abc.supabase.co`.
    pub url: String,
    /// Service or anon key.
    pub key: String,
}

impl fmt::Debug for RestSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestSettings")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Direct PostgreSQL connection settings.
#[derive(Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for PostgresSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Credentials sourced from the environment once at startup.
///
/// Empty values are treated as missing.
#[derive(Clone, Default)]
pub struct Credentials {
    pub ashes_key: Option<String>,
    pub ashes_auth: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_name: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("ashes_key", &mask(&self.ashes_key))
            .field("ashes_auth", &mask(&self.ashes_auth))
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &mask(&self.supabase_key))
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_password", &mask(&self.db_password))
            .field("db_name", &self.db_name)
            .finish()
    }
}

impl Credentials {
    /// Reads credentials from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads credentials through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            ashes_key: get(ENV_ASHES_KEY),
            ashes_auth: get(ENV_ASHES_AUTH),
            supabase_url: get(ENV_SUPABASE_URL),
            supabase_key: get(ENV_SUPABASE_KEY),
            db_host: get(ENV_DB_HOST),
            db_port: get(ENV_DB_PORT),
            db_user: get(ENV_DB_USER),
            db_password: get(ENV_DB_PASSWORD),
            db_name: get(ENV_DB_NAME),
        }
    }

    fn value(&self, name: &str) -> Option<&str> {
        match name {
            ENV_ASHES_KEY => self.ashes_key.as_deref(),
            ENV_ASHES_AUTH => self.ashes_auth.as_deref(),
            ENV_SUPABASE_URL => self.supabase_url.as_deref(),
            ENV_SUPABASE_KEY => self.supabase_key.as_deref(),
            ENV_DB_HOST => self.db_host.as_deref(),
            ENV_DB_PORT => self.db_port.as_deref(),
            ENV_DB_USER => self.db_user.as_deref(),
            ENV_DB_PASSWORD => self.db_password.as_deref(),
            ENV_DB_NAME => self.db_name.as_deref(),
            _ => None,
        }
    }

    /// Checks that every credential the given scopes need is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredentials`] naming every missing
    /// variable across all scopes, or [`ConfigError::InvalidValue`] when
    /// `DB_PORT` is set but not a port number.
    pub fn validate(&self, scopes: &[CredentialScope]) -> Result<(), ConfigError> {
        let mut missing: Vec<&'static str> = Vec::new();
        for scope in scopes {
            for name in scope.required() {
                if self.value(name).is_none() && !missing.contains(name) {
                    missing.push(name);
                }
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingCredentials { missing });
        }
        if scopes.contains(&CredentialScope::Postgres) {
            self.db_port()?;
        }
        Ok(())
    }

    /// Returns true when both Codex API credentials are present.
    #[must_use]
    pub fn has_api_credentials(&self) -> bool {
        self.ashes_key.is_some() && self.ashes_auth.is_some()
    }

    /// Returns PostgREST settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredentials`] if either value is absent.
    pub fn rest_settings(&self) -> Result<RestSettings, ConfigError> {
        self.validate(&[CredentialScope::Rest])?;
        match (&self.supabase_url, &self.supabase_key) {
            (Some(url), Some(key)) => Ok(RestSettings {
                url: url.clone(),
                key: key.clone(),
            }),
            _ => Err(ConfigError::MissingCredentials {
                missing: vec![ENV_SUPABASE_URL, ENV_SUPABASE_KEY],
            }),
        }
    }

    /// Returns direct PostgreSQL settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredentials`] if host, user or password
    /// are absent, or [`ConfigError::InvalidValue`] for a bad port.
    pub fn postgres_settings(&self) -> Result<PostgresSettings, ConfigError> {
        self.validate(&[CredentialScope::Postgres])?;
        let port = self.db_port()?;
        match (&self.db_host, &self.db_user, &self.db_password) {
            (Some(host), Some(user), Some(password)) => Ok(PostgresSettings {
                host: host.clone(),
                port,
                user: user.clone(),
                password: password.clone(),
                database: self
                    .db_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
            }),
            _ => Err(ConfigError::MissingCredentials {
                missing: vec![ENV_DB_HOST, ENV_DB_USER, ENV_DB_PASSWORD],
            }),
        }
    }

    fn db_port(&self) -> Result<u16, ConfigError> {
        match &self.db_port {
            None => Ok(DEFAULT_DB_PORT),
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                field: ENV_DB_PORT,
                reason: format!("'{raw}' is not a port number"),
            }),
        }
    }
}
