//! Tracing subscriber setup for the arbiter.
//!
//! The daemon decides where logs go through its `--log-file` flag; the level
//! comes from `ARBITER_LOG_LEVEL` and defaults to info.

use std::io;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_LEVEL_ENV_VAR: &str = "ARBITER_LOG_LEVEL";

/// Install the global subscriber, logging to stdout or, when `log_file` is
/// set, to that file with daily rotation. The returned guard must be held for
/// the lifetime of the process so buffered lines are flushed on exit.
pub fn init(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_env(LOG_LEVEL_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stdout))
            .init();
        return Ok(None);
    };

    let prefix = path
        .file_name()
        .with_context(|| format!("log file path {path:?} has no file name"))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, prefix));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(Some(guard))
}
