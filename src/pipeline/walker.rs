//! Page-by-page traversal of one section.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use super::{PipelineError, PipelineObserver, SectionReport};
use crate::envelope::Envelope;
use crate::fetch::{PageOutcome, PageSource};
use crate::pacing::Sleeper;
use crate::section::Section;
use crate::sink::Sink;

/// Pause between consecutive page requests (250ms).
pub const DEFAULT_INTER_PAGE_DELAY: Duration = Duration::from_millis(250);

/// Consecutive skipped pages after which a section is abandoned.
pub const DEFAULT_MAX_CONSECUTIVE_SKIPS: u32 = 3;

/// Pacing and give-up settings for a walk.
#[derive(Debug, Clone)]
pub struct WalkSettings {
    pub inter_page_delay: Duration,
    pub max_consecutive_skips: u32,
}

impl Default for WalkSettings {
    fn default() -> Self {
        Self {
            inter_page_delay: DEFAULT_INTER_PAGE_DELAY,
            max_consecutive_skips: DEFAULT_MAX_CONSECUTIVE_SKIPS,
        }
    }
}

/// How the page loop ended.
enum WalkEnd {
    Exhausted,
    Stopped,
}

/// Walks pages 1, 2, 3, ... of a section until the API runs dry.
pub struct SectionWalker {
    source: Arc<dyn PageSource>,
    sleeper: Arc<dyn Sleeper>,
    settings: WalkSettings,
}

impl SectionWalker {
    /// Creates a walker with default settings.
    pub fn new(source: Arc<dyn PageSource>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            source,
            sleeper,
            settings: WalkSettings::default(),
        }
    }

    /// Replaces the walk settings.
    #[must_use]
    pub fn with_settings(mut self, settings: WalkSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Walks one section into `sink`.
    ///
    /// `finish_section` is always called once the page loop ends, including
    /// after a run-stopping sink error.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Aborted`] when the sink reports a fatal error.
    /// Every other failure is recorded in the returned report.
    #[instrument(skip(self, section, sink, observer), fields(section = %section, sink = sink.name()))]
    pub async fn walk(
        &self,
        section: Section,
        sink: &mut dyn Sink,
        observer: &dyn PipelineObserver,
    ) -> Result<SectionReport, PipelineError> {
        let mut report = SectionReport::new(section);
        let walked = self.walk_pages(section, sink, observer, &mut report).await;

        match sink.finish_section(section).await {
            Ok(saved_to) => report.saved_to = saved_to,
            Err(err) => {
                error!(error = %err, "failed to finish section");
                report.fail(err.to_string());
            }
        }

        match walked? {
            WalkEnd::Exhausted => info!(records = report.records, "section complete"),
            WalkEnd::Stopped => warn!(
                records = report.records,
                cause = report.failure.as_deref().unwrap_or("unknown"),
                "section stopped early"
            ),
        }
        Ok(report)
    }

    async fn walk_pages(
        &self,
        section: Section,
        sink: &mut dyn Sink,
        observer: &dyn PipelineObserver,
        report: &mut SectionReport,
    ) -> Result<WalkEnd, PipelineError> {
        let mut page: u32 = 1;
        let mut consecutive_skips = 0;

        loop {
            let started = Instant::now();
            match self.source.fetch(section, page).await {
                Ok(PageOutcome::Exhausted) => {
                    debug!(page, "no more data");
                    return Ok(WalkEnd::Exhausted);
                }
                Ok(PageOutcome::Skipped { timeouts }) => {
                    report.pages_skipped += 1;
                    consecutive_skips += 1;
                    warn!(page, timeouts, consecutive_skips, "page skipped");
                    observer.page_skipped(section, page);
                    if consecutive_skips >= self.settings.max_consecutive_skips {
                        let cause = format!("{consecutive_skips} consecutive pages skipped");
                        error!(page, %cause, "abandoning section");
                        report.fail(cause);
                        return Ok(WalkEnd::Stopped);
                    }
                }
                Ok(PageOutcome::Records(records)) => {
                    consecutive_skips = 0;
                    let count = records.len();
                    let batch: Vec<Envelope> = records
                        .into_iter()
                        .map(|record| Envelope::wrap(section, record))
                        .collect();

                    let missing = batch.iter().filter(|e| e.is_missing_guid()).count();
                    for envelope in batch.iter().filter(|e| e.is_missing_guid()) {
                        warn!(
                            page,
                            keys = ?envelope.data.keys().collect::<Vec<_>>(),
                            "record has no identity field"
                        );
                    }

                    report.pages_fetched += 1;
                    report.records += count;
                    report.missing_guid += missing;

                    let outcome = match sink.write_batch(section, page, batch).await {
                        Ok(outcome) => outcome,
                        Err(err) if err.is_fatal() => {
                            error!(page, error = %err, "sink aborted the run");
                            report.fail(err.to_string());
                            return Err(PipelineError::aborted(section, page, err));
                        }
                        Err(err) => {
                            error!(page, error = %err, "sink failed, stopping section");
                            report.fail(err.to_string());
                            return Ok(WalkEnd::Stopped);
                        }
                    };
                    report.record_batch(&outcome);

                    info!(
                        page,
                        records = count,
                        elapsed_ms = started.elapsed().as_millis(),
                        ?outcome,
                        "page processed"
                    );
                    observer.page_completed(section, page, count, &outcome);
                }
                Err(err) => {
                    error!(page, error = %err, "fetch failed, aborting section");
                    report.fail(err.to_string());
                    return Ok(WalkEnd::Stopped);
                }
            }

            self.sleeper.sleep(self.settings.inter_page_delay).await;
            let Some(next) = page.checked_add(1) else {
                report.fail("page counter overflow");
                return Ok(WalkEnd::Stopped);
            };
            debug!(next, "advancing");
            page = next;
        }
    }
}
