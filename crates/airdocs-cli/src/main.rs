use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use airdocs_core::{
    parse_version, Channel, InstallMethod, PendingUpdate, ProgressEvent, ReleaseInfo,
    UpdateHistoryRecord,
};
use airdocs_installer::{
    default_user_dir, ApplyJournal, HistorySink, JsonlHistory, PendingLedger, UpdateLayout,
};
use airdocs_updater::{
    build_release_source, init_logging, CancelToken, ProgressStage, StartupReport, UpdateEvent,
    Updater, UpdaterConfig,
};
use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(name = "airdocs-update")]
#[command(about = "Check for, stage and apply AirDocs updates", long_about = None)]
struct Cli {
    /// Installation directory (defaults to the directory of this executable).
    #[arg(long, global = true)]
    app_dir: Option<PathBuf>,
    /// Per-user data directory holding the ledger, cache and logs.
    #[arg(long, global = true)]
    user_dir: Option<PathBuf>,
    /// Version of the running installation.
    #[arg(long, global = true)]
    current_version: Option<String>,
    #[arg(long, global = true, value_enum)]
    channel: Option<CliChannel>,
    /// Disable badges and progress bars.
    #[arg(long, global = true)]
    plain: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask the release source whether a newer version exists.
    Check,
    /// Download, verify and stage the newest release.
    Install {
        #[arg(long)]
        yes: bool,
    },
    /// Apply a staged update now.
    Apply,
    /// Run the before-UI startup hook: recovery, apply, then a background check.
    Startup,
    Status,
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    ClearPending,
    Doctor,
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliChannel {
    Latest,
    Stable,
}

impl From<CliChannel> for Channel {
    fn from(value: CliChannel) -> Self {
        match value {
            CliChannel::Latest => Channel::Latest,
            CliChannel::Stable => Channel::Stable,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum OutputStyle {
    Plain,
    Rich,
}

/// Exit status when the previous installation could not be restored.
const EXIT_FATAL_ROLLBACK: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

include!("dispatch.rs");
include!("render.rs");
include!("completion.rs");
include!("tests.rs");
