//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use jacow_core::config::FileConfig;
use jacow_core::{Layout, Precedence, SourceContext};

/// Download conference proceedings papers into an organized tree.
///
/// Reads candidate links (JSON Lines or one URL per line) from INPUT or
/// stdin, skips anything a previous run already finished, and files each
/// paper under conference/year/session.
#[derive(Parser, Debug)]
#[command(name = "jacow-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Candidate file; "-" or omitted reads stdin
    pub input: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Root directory for organized papers [default: ./data/papers]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Largest file to download, in MB (1-100000) [default: 100]
    #[arg(short = 's', long, value_parser = clap::value_parser!(u64).range(1..=100_000))]
    pub max_size: Option<u64>,

    /// Maximum concurrent downloads (1-100) [default: 3]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Seconds to wait between requests to the same host (0 disables) [default: 1.0]
    #[arg(short = 'd', long)]
    pub delay: Option<f64>,

    /// Total attempts per target for transient failures (1-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,

    /// Base backoff in seconds, doubled per attempt [default: 2.0]
    #[arg(long)]
    pub backoff_base: Option<f64>,

    /// Output layout: session or topic
    #[arg(long)]
    pub layout: Option<Layout>,

    /// Which classifier rule wins when both match: pattern-first or keyword-first
    #[arg(long)]
    pub precedence: Option<Precedence>,

    /// Do not send HEAD requests to learn undeclared sizes
    #[arg(long)]
    pub no_probe: bool,

    /// Conference acronym for candidates that carry none (e.g. IPAC)
    #[arg(long)]
    pub conference: Option<String>,

    /// Conference year for candidates that carry none
    #[arg(long, value_parser = clap::value_parser!(u16).range(1980..=2100))]
    pub year: Option<u16>,

    /// Session code for candidates that carry none (e.g. MOPA)
    #[arg(long)]
    pub session: Option<String>,

    /// Classify and plan without downloading anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Write the run report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Resume database path [default: <output-dir>/.resume.db]
    #[arg(long)]
    pub resume_db: Option<PathBuf>,

    /// Config file path [default: $XDG_CONFIG_HOME/jacow-downloader/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Settings given on the command line, for layering over the config file.
    pub fn to_overrides(&self) -> FileConfig {
        FileConfig {
            output_dir: self.output_dir.clone(),
            max_size_mb: self.max_size,
            concurrency: self.concurrency.map(usize::from),
            delay_secs: self.delay,
            max_attempts: self.max_attempts,
            backoff_base_secs: self.backoff_base,
            probe_unknown_sizes: self.no_probe.then_some(false),
            layout: self.layout,
            precedence: self.precedence,
            ..FileConfig::default()
        }
    }

    /// Context applied to candidates that do not carry their own.
    pub fn source_context(&self) -> SourceContext {
        SourceContext::new(
            self.conference.clone().unwrap_or_default(),
            self.year,
            self.session.as_deref(),
        )
    }

    /// Input file, or `None` for stdin.
    pub fn input_path(&self) -> Option<&PathBuf> {
        self.input.as_ref().filter(|p| p.as_os_str() != "-")
    }
}
