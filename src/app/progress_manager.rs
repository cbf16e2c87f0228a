//! Progress bar for download runs, fed by the engine's outcome callback.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use jacow_core::download::{OutcomeCallback, OutcomeKind, TaskOutcome};

/// Creates the bar when requested. Returns the bar (so the caller can clear
/// it) and the callback to hand to the engine.
pub(crate) fn spawn_progress_ui(
    use_bar: bool,
    total: usize,
) -> (Option<ProgressBar>, Option<OutcomeCallback>) {
    if !use_bar {
        return (None, None);
    }
    let bar = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {bar:30} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let handle = bar.clone();
    let callback: OutcomeCallback = Arc::new(move |outcome: &TaskOutcome| {
        handle.inc(1);
        handle.set_message(progress_message(outcome));
    });
    (Some(bar), Some(callback))
}

fn progress_message(outcome: &TaskOutcome) -> String {
    let verb = match &outcome.kind {
        OutcomeKind::Succeeded { .. } => "saved",
        OutcomeKind::SkippedResumed => "already done",
        OutcomeKind::Rejected(_) => "too large",
        OutcomeKind::Failed { .. } => "failed",
        OutcomeKind::Cancelled => "cancelled",
        OutcomeKind::Planned => "planned",
    };
    let name = outcome
        .url
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(&outcome.url);
    format!("{verb} {name}")
}
