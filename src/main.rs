//! CLI entry point for the proceedings downloader.

use std::process::ExitCode;

use anyhow::Result;

mod app;
mod cli;

/// How the process should exit once a run is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Nothing failed.
    Success,
    /// Some targets failed, some succeeded.
    Partial,
    /// Everything failed, or the run was interrupted.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Failure => ExitCode::from(1),
            ProcessExit::Partial => ExitCode::from(2),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let exit = app::runtime::run_downloader().await?;
    Ok(exit.into())
}
