//! Progress UI for scrape runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use codex_core::sink::BatchOutcome;
use codex_core::{PipelineObserver, Section, SectionReport};
use indicatif::{ProgressBar, ProgressStyle};

/// Section-level progress bar fed by pipeline events.
///
/// When disabled the bar is hidden and every update is a no-op.
pub(crate) struct SectionProgress {
    bar: ProgressBar,
    section_records: AtomicUsize,
}

impl SectionProgress {
    pub(crate) fn new(enabled: bool, total_sections: usize) -> Self {
        let bar = if enabled {
            let bar = ProgressBar::new(total_sections as u64);
            bar.set_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            bar,
            section_records: AtomicUsize::new(0),
        }
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }

    #[cfg(test)]
    fn position(&self) -> u64 {
        self.bar.position()
    }

    #[cfg(test)]
    fn message(&self) -> String {
        self.bar.message()
    }
}

impl PipelineObserver for SectionProgress {
    fn section_started(&self, section: Section, _index: usize, _total: usize) {
        self.section_records.store(0, Ordering::Relaxed);
        self.bar.set_message(format!("{section}: starting"));
    }

    fn page_completed(&self, section: Section, page: u32, records: usize, _outcome: &BatchOutcome) {
        let so_far = self.section_records.fetch_add(records, Ordering::Relaxed) + records;
        self.bar
            .set_message(format!("{section}: page {page} ({so_far} records)"));
    }

    fn page_skipped(&self, section: Section, page: u32) {
        self.bar.set_message(format!("{section}: page {page} skipped"));
    }

    fn section_finished(&self, _report: &SectionReport) {
        self.bar.inc(1);
    }
}
