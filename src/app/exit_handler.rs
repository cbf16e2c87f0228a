//! Exit code logic for the downloader process.
//!
//! Single responsibility: map a run report to the process exit outcome.

use jacow_core::DownloadReport;

use crate::ProcessExit;

/// Determines the process exit outcome from a finished run.
///
/// Oversize rejections and resumed skips are expected results, not failures.
/// An interrupted run always fails so scripts notice it needs a rerun.
pub(crate) fn determine_exit_outcome(report: &DownloadReport) -> ProcessExit {
    if report.interrupted {
        return ProcessExit::Failure;
    }
    let done = report.succeeded + report.skipped_resumed + report.rejected_oversize;
    if report.failed == 0 {
        ProcessExit::Success
    } else if done > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
