use std::collections::HashSet;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use jacow_core::config::load_config_file;
use jacow_core::input::{load_candidates, parse_candidates};
use jacow_core::{
    DownloadConfig, DownloadEngine, HttpClient, Organizer, ParsedCandidates, ResumeStore,
    RunOptions,
};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{exit_handler, output, progress_manager, terminal};
use crate::cli::Args;

/// Resume database file name inside the output root.
const RESUME_DB_NAME: &str = ".resume.db";

pub(crate) async fn run_downloader() -> Result<ProcessExit> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    terminal::init_tracing(terminal::resolve_default_log_level(&args));
    debug!(?args, "CLI arguments parsed");

    let file_config = load_config_file(args.config.as_deref())?.unwrap_or_default();
    let config = DownloadConfig::resolve(args.to_overrides().or(file_config))
        .context("invalid configuration")?;
    debug!(?config, "configuration resolved");

    let Some(parsed) = read_candidates(&args)? else {
        println!("{}", output::NO_INPUT_GUIDANCE);
        println!("{}", output::INPUT_PIPE_EXAMPLE);
        return Ok(ProcessExit::Success);
    };
    for skipped in &parsed.skipped {
        warn!(skipped = %skipped, "Skipped unusable input line");
    }
    if parsed.is_empty() {
        info!("No usable candidate links found in input");
        return Ok(ProcessExit::Success);
    }
    info!(
        candidates = parsed.len(),
        skipped = parsed.skipped.len(),
        "Parsed input"
    );

    let engine = DownloadEngine::new(
        config.concurrency,
        config.retry_policy(),
        Arc::new(config.rate_limiter()),
        config.gate(),
    )
    .context("invalid download engine configuration")?
    .with_classifier(config.classifier()?)
    .with_size_probe(config.probe_unknown_sizes);

    let resume_db = args
        .resume_db
        .clone()
        .unwrap_or_else(|| config.output_root.join(RESUME_DB_NAME));

    if args.dry_run {
        return run_dry(&args, &engine, parsed, resume_db).await;
    }

    let store = ResumeStore::open(&resume_db)
        .await
        .with_context(|| format!("cannot open resume store {}", resume_db.display()))?;
    let organizer = Organizer::new(&config.output_root, config.layout);
    let client = HttpClient::with_timeouts(config.connect_timeout, config.read_timeout)
        .context("cannot create HTTP client")?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let unique_targets = parsed
        .candidates
        .iter()
        .map(jacow_core::CandidateLink::target_key)
        .collect::<HashSet<_>>()
        .len();
    let use_bar = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let (bar, callback) = progress_manager::spawn_progress_ui(use_bar, unique_targets);

    let mut options = RunOptions::with_interrupt(Arc::clone(&interrupted));
    if let Some(callback) = callback {
        options = options.with_callback(callback);
    }

    let result = engine
        .run(
            parsed.candidates,
            &store,
            Arc::new(client),
            &organizer,
            options,
        )
        .await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    store.close().await;
    let report = result.context("download run aborted")?;

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        skipped_resumed = report.skipped_resumed,
        rejected_oversize = report.rejected_oversize,
        retries = report.retries,
        bytes = report.bytes_transferred,
        "Download complete"
    );

    if !args.quiet {
        for line in output::summary_lines(&report, &config.output_root, output::terminal_width()) {
            println!("{line}");
        }
    }
    if let Some(path) = &args.report {
        output::write_report_json(path, &report)?;
        info!(path = %path.display(), "Wrote run report");
    }

    Ok(exit_handler::determine_exit_outcome(&report))
}

/// Plans without touching the network. Reads the resume store only if it
/// already exists so a dry run never creates files.
async fn run_dry(
    args: &Args,
    engine: &DownloadEngine,
    parsed: ParsedCandidates,
    resume_db: PathBuf,
) -> Result<ProcessExit> {
    let store = if resume_db.exists() {
        Some(
            ResumeStore::open(&resume_db)
                .await
                .with_context(|| format!("cannot open resume store {}", resume_db.display()))?,
        )
    } else {
        None
    };

    let report = engine.dry_run(parsed.candidates, store.as_ref()).await?;
    if let Some(store) = store {
        store.close().await;
    }

    for line in output::dry_run_lines(&report) {
        println!("{line}");
    }
    if let Some(path) = &args.report {
        output::write_report_json(path, &report)?;
    }
    Ok(ProcessExit::Success)
}

/// Reads candidates from the input file, or from stdin when it is piped.
/// Returns `None` when there is no input at all.
fn read_candidates(args: &Args) -> Result<Option<ParsedCandidates>> {
    let defaults = args.source_context();
    if let Some(path) = args.input_path() {
        return Ok(Some(load_candidates(path, &defaults)?));
    }
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("cannot read candidates from stdin")?;
    if buffer.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(parse_candidates(&buffer, &defaults)))
}
