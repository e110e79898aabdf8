use std::fs;
use std::io;

use airdocs_installer::UpdateLayout;
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Overrides the stderr filter, e.g. `AIRDOCS_LOG=debug`.
pub const LOG_ENV: &str = "AIRDOCS_LOG";

/// Installs the process-wide subscriber: stderr filtered by `AIRDOCS_LOG`
/// (falling back to `default_directive`) plus an info-level file log under
/// the user directory. Keep the guard alive until exit.
pub fn init_logging(layout: &UpdateLayout, default_directive: &str) -> Result<WorkerGuard> {
    let logs_dir = layout.logs_dir();
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("failed to create {}", logs_dir.display()))?;

    let stderr_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_directive))
        .with_context(|| format!("invalid log directive '{default_directive}'"))?;
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let file_appender = tracing_appender::rolling::never(&logs_dir, "updater.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer)
        .with_filter(LevelFilter::INFO);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(guard)
}
