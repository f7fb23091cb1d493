//! Per-section and per-run result tallies.

use std::path::PathBuf;

use crate::section::Section;
use crate::sink::BatchOutcome;

/// What happened while walking one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionReport {
    pub section: Section,
    /// Pages that returned records.
    pub pages_fetched: u32,
    /// Pages given up on after repeated timeouts.
    pub pages_skipped: u32,
    /// Records received across all pages.
    pub records: usize,
    /// Records whose identity could not be resolved.
    pub missing_guid: usize,
    pub batches_written: usize,
    pub batches_unchanged: usize,
    pub batches_buffered: usize,
    pub batches_skipped: usize,
    /// Rows reported as created or updated by the datastore.
    pub rows_written: u64,
    /// Section file produced by the sink, if any.
    pub saved_to: Option<PathBuf>,
    /// Why the section stopped early, if it did.
    pub failure: Option<String>,
}

impl SectionReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(section: Section) -> Self {
        Self {
            section,
            pages_fetched: 0,
            pages_skipped: 0,
            records: 0,
            missing_guid: 0,
            batches_written: 0,
            batches_unchanged: 0,
            batches_buffered: 0,
            batches_skipped: 0,
            rows_written: 0,
            saved_to: None,
            failure: None,
        }
    }

    /// Tallies a batch outcome.
    pub fn record_batch(&mut self, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Written { rows } => {
                self.batches_written += 1;
                self.rows_written += rows;
            }
            BatchOutcome::Unchanged => self.batches_unchanged += 1,
            BatchOutcome::Buffered { .. } => self.batches_buffered += 1,
            BatchOutcome::Skipped(_) => self.batches_skipped += 1,
        }
    }

    /// Records the first failure; later ones are ignored.
    pub fn fail(&mut self, cause: impl Into<String>) {
        if self.failure.is_none() {
            self.failure = Some(cause.into());
        }
    }

    /// Returns `true` if the section walked to exhaustion.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Reports for every section of a run, in walk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sections: Vec<SectionReport>,
}

impl RunSummary {
    /// Report for one section, if it was walked.
    #[must_use]
    pub fn section(&self, section: Section) -> Option<&SectionReport> {
        self.sections.iter().find(|r| r.section == section)
    }

    #[must_use]
    pub fn sections_failed(&self) -> usize {
        self.sections.iter().filter(|r| !r.is_success()).count()
    }

    #[must_use]
    pub fn records(&self) -> usize {
        self.sections.iter().map(|r| r.records).sum()
    }

    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.sections.iter().map(|r| r.rows_written).sum()
    }

    #[must_use]
    pub fn batches_skipped(&self) -> usize {
        self.sections.iter().map(|r| r.batches_skipped).sum()
    }

    #[must_use]
    pub fn pages_skipped(&self) -> u32 {
        self.sections.iter().map(|r| r.pages_skipped).sum()
    }
}
