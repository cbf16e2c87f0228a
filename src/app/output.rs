//! CLI output formatting and display helpers.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use jacow_core::{DownloadReport, ErrorKind};

/// Message when no input was provided at all.
pub(crate) const NO_INPUT_GUIDANCE: &str =
    "No input provided. Pass a candidate file or pipe candidate links via stdin.";

/// Example for piping input.
pub(crate) const INPUT_PIPE_EXAMPLE: &str = "Example: echo 'https://proceedings.jacow.org/ipac2023/pdf/MOPA001.pdf' | jacow-downloader --conference IPAC";

/// Returns terminal width from COLUMNS, or 80 if unset/invalid.
pub(crate) fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub(crate) fn truncate_to_width(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

/// End-of-run summary.
pub(crate) fn summary_lines(report: &DownloadReport, output_root: &Path, width: usize) -> Vec<String> {
    let mut lines = vec![format!(
        "Downloaded {} of {} target(s) into {} ({:.1}% success)",
        report.succeeded,
        report.attempted,
        output_root.display(),
        report.success_rate()
    )];

    let mut extras = Vec::new();
    if report.skipped_resumed > 0 {
        extras.push(format!("{} already done", report.skipped_resumed));
    }
    if report.rejected_oversize > 0 {
        extras.push(format!("{} over the size limit", report.rejected_oversize));
    }
    if report.duplicates > 0 {
        extras.push(format!("{} duplicate link(s)", report.duplicates));
    }
    if report.cancelled > 0 {
        extras.push(format!("{} cancelled", report.cancelled));
    }
    if !extras.is_empty() {
        lines.push(format!("  Also: {}", extras.join(", ")));
    }

    lines.extend(failure_summary_lines(report, width));
    if report.interrupted {
        lines.push("Interrupted. Run again to resume.".to_string());
    }
    lines.into_iter().map(|l| truncate_to_width(&l, width)).collect()
}

/// Failed targets grouped by error kind, with one example each.
pub(crate) fn failure_summary_lines(report: &DownloadReport, width: usize) -> Vec<String> {
    let failures: Vec<_> = report
        .errors
        .iter()
        .filter(|e| !matches!(e.kind, ErrorKind::OversizeDeclared | ErrorKind::OversizeStreamed))
        .collect();
    if failures.is_empty() {
        return Vec::new();
    }

    let mut grouped: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for error in failures {
        grouped
            .entry(error.kind.to_string())
            .or_default()
            .push(error.url.as_str());
    }

    let mut lines = vec!["Failures by kind:".to_string()];
    for (kind, urls) in &grouped {
        lines.push(truncate_to_width(&format!("- {kind}: {}", urls.len()), width));
        if let Some(first) = urls.first() {
            lines.push(truncate_to_width(&format!("  e.g. {first}"), width));
        }
    }
    lines
}

/// Dry-run plan summary.
pub(crate) fn dry_run_lines(report: &DownloadReport) -> Vec<String> {
    vec![
        format!("Would download: {}", report.planned),
        format!("Already done: {}", report.skipped_resumed),
        format!("Over the size limit: {}", report.rejected_oversize),
        format!("Duplicates: {}", report.duplicates),
        format!(
            "Classified: {} paper(s), {} proceedings, {} unknown",
            report.classification.individual,
            report.classification.proceedings,
            report.classification.unknown
        ),
    ]
}

/// Writes the report as pretty JSON.
pub(crate) fn write_report_json(path: &Path, report: &DownloadReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("cannot serialize run report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    fs::write(path, json).with_context(|| format!("cannot write report to {}", path.display()))
}
