use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use codex_core::config::DEFAULT_CONFIG_FILE;
use codex_core::sink::DEFAULT_REST_TIMEOUT;
use codex_core::{
    ApiIdentity, AppConfig, CredentialScope, Credentials, Database, DatabaseSink, DbBackend,
    FetchSettings, FileSink, PageFetcher, Pipeline, PostgresBackend, RestBackend, SectionWalker,
    Sink, SinkMode, Sleeper, TokioSleeper, codex_user_agent, install_tables, load_schema,
};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{exit_handler, progress::SectionProgress, terminal};
use crate::cli::{Args, Command, ScrapeArgs};

const WELCOME_TEXT: &str = "WELCOME";

pub(crate) async fn run(args: &Args) -> Result<ProcessExit> {
    match args.command() {
        Command::Scrape(scrape) => run_scrape(args, &scrape).await,
        Command::InitDb { schema } => run_init_db(&schema).await,
    }
}

async fn run_scrape(args: &Args, scrape: &ScrapeArgs) -> Result<ProcessExit> {
    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, scrape);
    debug!(?config, "configuration resolved");

    let credentials = Credentials::from_env();
    credentials.validate(&config.scrape_scopes())?;
    if !credentials.has_api_credentials() {
        warn!("ASHES_KEY / ASHES_AUTH not set, requesting the API anonymously");
    }

    if !args.quiet {
        if let Some(welcome) = config.texts.get(WELCOME_TEXT) {
            println!("{welcome}");
        }
    }

    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let identity = ApiIdentity::from_config(&config, &credentials);
    let fetcher = PageFetcher::new(
        FetchSettings::new(config.api_base.clone()),
        &identity,
        Arc::clone(&sleeper),
    )
    .context("failed to set up the API client")?;

    let sink = build_sink(&config, &credentials, Arc::clone(&sleeper)).await?;
    info!(
        sink = sink.name(),
        sections = config.sections.len(),
        api = %config.api_base,
        "Scraper starting"
    );

    let walker =
        SectionWalker::new(Arc::new(fetcher), sleeper).with_settings(config.walk_settings());
    let mut pipeline = Pipeline::new(walker, sink, config.sections.clone());

    let use_progress = terminal::should_use_progress(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let progress = SectionProgress::new(use_progress, config.sections.len());
    let result = pipeline.run(&progress).await;
    progress.finish();
    let summary = result?;

    for report in &summary.sections {
        match &report.failure {
            Some(cause) => warn!(section = %report.section, %cause, records = report.records, "section incomplete"),
            None => debug!(section = %report.section, records = report.records, "section ok"),
        }
    }

    Ok(exit_handler::determine_exit_outcome(&summary))
}

async fn run_init_db(schema_path: &Path) -> Result<ProcessExit> {
    let credentials = Credentials::from_env();
    credentials.validate(&[CredentialScope::Postgres])?;

    let schema = load_schema(schema_path).await?;
    if !schema.bootstrap.is_empty() {
        info!("bootstrap statements before the break marker are not executed");
    }

    let db = Database::connect(&credentials.postgres_settings()?).await?;
    let installed = install_tables(&db, &schema).await;
    db.close().await;
    installed?;

    info!(schema = %schema_path.display(), "Tables installed");
    Ok(ProcessExit::Success)
}

/// Explicit path must exist; otherwise `./config.json` is used when present.
fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return AppConfig::load(path)
            .with_context(|| format!("invalid config file {}", path.display()));
    }
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        AppConfig::load(default_path).context("invalid config file config.json")
    } else {
        debug!("no config.json found, using defaults");
        Ok(AppConfig::default())
    }
}

fn apply_overrides(config: &mut AppConfig, scrape: &ScrapeArgs) {
    if let Some(mode) = scrape.sink {
        config.mode = mode;
    }
    if !scrape.sections.is_empty() {
        let mut sections = Vec::with_capacity(scrape.sections.len());
        for section in &scrape.sections {
            if !sections.contains(section) {
                sections.push(*section);
            }
        }
        config.sections = sections;
    }
    if let Some(dir) = &scrape.output_dir {
        config.output_dir.clone_from(dir);
    }
}

async fn build_sink(
    config: &AppConfig,
    credentials: &Credentials,
    sleeper: Arc<dyn Sleeper>,
) -> Result<Box<dyn Sink>> {
    let sink: Box<dyn Sink> = match (config.mode, config.db_backend) {
        (SinkMode::File, _) => Box::new(FileSink::new(&config.output_dir)),
        (SinkMode::Database, DbBackend::Rest) => {
            let backend = RestBackend::new(
                &credentials.rest_settings()?,
                &codex_user_agent(&config.version),
                DEFAULT_REST_TIMEOUT,
            )?;
            Box::new(
                DatabaseSink::new(backend, config.on_unknown_error, sleeper)
                    .with_retry_policy(config.retry_policy()),
            )
        }
        (SinkMode::Database, DbBackend::Postgres) => {
            let db = Database::connect(&credentials.postgres_settings()?).await?;
            Box::new(
                DatabaseSink::new(PostgresBackend::new(db), config.on_unknown_error, sleeper)
                    .with_retry_policy(config.retry_policy()),
            )
        }
    };
    Ok(sink)
}
