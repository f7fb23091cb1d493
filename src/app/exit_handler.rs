//! Exit code logic for the scraper process.
//!
//! Single responsibility: map section outcomes to the process exit outcome.

use codex_core::RunSummary;

use crate::ProcessExit;

/// Determines the process exit outcome from a run summary.
pub(crate) fn determine_exit_outcome(summary: &RunSummary) -> ProcessExit {
    let failed = summary.sections_failed();
    if failed == 0 {
        ProcessExit::Success
    } else if failed < summary.sections.len() {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
