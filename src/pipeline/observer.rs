//! Progress hooks for a pipeline run.
//!
//! The pipeline reports through [`PipelineObserver`] so rendering (an
//! `indicatif` bar, plain logs, nothing) stays outside the library.

use crate::section::Section;
use crate::sink::BatchOutcome;

use super::SectionReport;

/// Receives progress events. Every hook defaults to a no-op.
pub trait PipelineObserver: Send + Sync {
    /// A section walk is about to start. `index` is 0-based.
    fn section_started(&self, _section: Section, _index: usize, _total: usize) {}

    /// A page's batch was handed to the sink.
    fn page_completed(
        &self,
        _section: Section,
        _page: u32,
        _records: usize,
        _outcome: &BatchOutcome,
    ) {
    }

    /// A page was skipped after repeated timeouts.
    fn page_skipped(&self, _section: Section, _page: u32) {}

    /// A section walk ended, successfully or not.
    fn section_finished(&self, _report: &SectionReport) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}
