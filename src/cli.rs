//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use codex_core::schema::DEFAULT_SCHEMA_FILE;
use codex_core::{Section, SinkMode};

/// Scrape the Ashes Codex API into a database or JSON files.
///
/// Credentials are read from the environment (`ASHES_KEY`, `ASHES_AUTH`,
/// `SUPABASE_URL`, `SUPABASE_KEY`, `DB_HOST`, `DB_PORT`, `DB_USER`,
/// `DB_PASSWORD`, `DB_NAME`); everything else comes from `config.json`.
///
/// Migrating an older `.env`: the PostgreSQL variables now carry the `DB_`
/// prefix, so rename `HOST`, `PORT`, `USER` and `PASSWORD` to `DB_HOST`,
/// `DB_PORT`, `DB_USER` and `DB_PASSWORD`.
#[derive(Parser, Debug)]
#[command(name = "codex-scraper")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the JSON config file (defaults to ./config.json when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Args {
    /// The requested command; a bare invocation scrapes.
    #[must_use]
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Scrape(ScrapeArgs::default()))
    }
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scrape every configured section (default)
    Scrape(ScrapeArgs),

    /// Create the codex table from the schema script
    InitDb {
        /// Schema script split by a `-- ###BREAK` line
        #[arg(long, value_name = "FILE", default_value = DEFAULT_SCHEMA_FILE)]
        schema: PathBuf,
    },
}

/// Options for a scrape run.
#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeArgs {
    /// Where to persist records (overrides MODE)
    #[arg(long, value_enum)]
    pub sink: Option<SinkMode>,

    /// Only scrape these sections, comma separated (overrides SECTIONS)
    #[arg(long, value_delimiter = ',', value_name = "SECTION")]
    pub sections: Vec<Section>,

    /// Directory for section files (overrides OUTPUT_DIR)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}
