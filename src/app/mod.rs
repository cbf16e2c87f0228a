//! Binary-side wiring: terminal setup, progress, summary and exit codes.

pub(crate) mod exit_handler;
pub(crate) mod output;
pub(crate) mod progress_manager;
pub(crate) mod runtime;
pub(crate) mod terminal;
