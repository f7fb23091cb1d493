//! Section orchestration: walk every configured section into one sink.
//!
//! A [`Pipeline`] owns the sink chosen for the run and the [`SectionWalker`]
//! that drives the page fetcher. Sections run one after another in configured
//! order. A section that fails is recorded in its [`SectionReport`] and the
//! run moves on; only a fatal sink error ends the run early.

mod observer;
mod report;
mod walker;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::section::Section;
use crate::sink::{Sink, SinkError};

pub use observer::{NoopObserver, PipelineObserver};
pub use report::{RunSummary, SectionReport};
pub use walker::{
    DEFAULT_INTER_PAGE_DELAY, DEFAULT_MAX_CONSECUTIVE_SKIPS, SectionWalker, WalkSettings,
};

/// Errors that stop a whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The sink refused to continue.
    #[error("run aborted during `{section}` page {page}: {source}")]
    Aborted {
        section: Section,
        page: u32,
        #[source]
        source: SinkError,
    },
}

impl PipelineError {
    /// Creates an abort error.
    pub fn aborted(section: Section, page: u32, source: SinkError) -> Self {
        Self::Aborted {
            section,
            page,
            source,
        }
    }
}

/// One scrape run over a fixed list of sections.
pub struct Pipeline {
    walker: SectionWalker,
    sink: Box<dyn Sink>,
    sections: Vec<Section>,
}

impl Pipeline {
    /// Creates a pipeline.
    pub fn new(walker: SectionWalker, sink: Box<dyn Sink>, sections: Vec<Section>) -> Self {
        Self {
            walker,
            sink,
            sections,
        }
    }

    /// Walks every section.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Aborted`] when the sink reports a fatal error;
    /// sections after it are not walked.
    #[instrument(skip_all, fields(sink = self.sink.name(), sections = self.sections.len()))]
    pub async fn run(
        &mut self,
        observer: &dyn PipelineObserver,
    ) -> Result<RunSummary, PipelineError> {
        let total = self.sections.len();
        let mut summary = RunSummary::default();

        for (index, &section) in self.sections.iter().enumerate() {
            observer.section_started(section, index, total);
            info!(%section, index = index + 1, total, "processing section");

            let report = self
                .walker
                .walk(section, &mut *self.sink, observer)
                .await?;

            match &report.failure {
                Some(cause) => warn!(%section, %cause, "section finished with errors"),
                None => info!(
                    %section,
                    pages = report.pages_fetched,
                    records = report.records,
                    "section finished"
                ),
            }
            observer.section_finished(&report);
            summary.sections.push(report);
        }

        info!(
            sections = summary.sections.len(),
            failed = summary.sections_failed(),
            records = summary.records(),
            rows = summary.rows_written(),
            batches_skipped = summary.batches_skipped(),
            pages_skipped = summary.pages_skipped(),
            "all sections processed"
        );
        Ok(summary)
    }
}
