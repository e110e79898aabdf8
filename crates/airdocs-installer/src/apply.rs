use airdocs_core::{ArchiveType, InstallMethod, PendingUpdate, UpdateHistoryRecord};
use chrono::Utc;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::fs_utils::{merge_dir_keep_existing, remove_dir_if_exists, remove_file_if_exists};
use crate::{ApplyJournal, ApplyStep, FsOps, HistorySink, PendingLedger, RealFs, StepState};
use crate::UpdateLayout;

/// What a healthy installation must contain, relative to `app_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallCheck {
    pub entry_executable: String,
    pub required_resources: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to move {app_dir} aside to {app_dir_old}: {source}")]
    Backup {
        app_dir: PathBuf,
        app_dir_old: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("staged update files are missing: {path}")]
    StagedMissing { path: PathBuf },
    #[error("failed to copy staged update from {from} to {to}: {reason}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },
    #[error("failed to restore user data from {path}: {reason}")]
    Preserve { path: PathBuf, reason: String },
    #[error("installation verification failed at {path}: {reason}")]
    Verify { path: PathBuf, reason: String },
}

/// The restore of the previous installation failed. Both trees are left
/// where they are for manual recovery.
#[derive(Debug, Error)]
#[error(
    "rollback failed ({reason}); the previous installation is at {} and must be moved back to {} by hand (update error: {cause})",
    app_dir_old.display(),
    app_dir.display()
)]
pub struct FatalRollbackError {
    pub app_dir: PathBuf,
    pub app_dir_old: PathBuf,
    pub cause: String,
    pub reason: String,
}

#[derive(Debug)]
pub enum ApplyOutcome {
    NothingPending,
    /// `app_dir` could not be moved aside. Nothing changed; the staged
    /// update stays pending for the next start.
    Deferred { version: String, error: ApplyError },
    /// The staged files were gone. The record was dropped without touching
    /// `app_dir`.
    Discarded { version: String, error: ApplyError },
    Applied { version: String },
    RolledBack { version: String, error: ApplyError },
    Fatal(FatalRollbackError),
}

/// User data carried over from the previous installation. Only used when
/// the user data directory sits inside `app_dir`, since otherwise the swap
/// never touches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDataRestore {
    /// Files copied back over whatever the new package ships.
    pub overwrite_files: Vec<String>,
    /// Directories merged back; files the new package ships are kept.
    pub merge_dirs: Vec<String>,
}

impl Default for UserDataRestore {
    fn default() -> Self {
        Self {
            overwrite_files: ["awb_dispatcher.db", "config_override.yaml"]
                .map(String::from)
                .to_vec(),
            merge_dirs: ["logs", "output", "backups", "updates", "awb_editor_exchange"]
                .map(String::from)
                .to_vec(),
        }
    }
}

pub struct ApplyContext<'a> {
    pub layout: &'a UpdateLayout,
    pub check: &'a InstallCheck,
    pub user_data: &'a UserDataRestore,
    pub current_version: &'a str,
    pub install_method: InstallMethod,
    pub history: &'a dyn HistorySink,
}

pub fn apply_pending_update(ctx: &ApplyContext<'_>) -> ApplyOutcome {
    apply_pending_update_with_fs(ctx, &RealFs)
}

/// Swaps the staged update into `app_dir`. Must run before anything else
/// in the process opens files under `app_dir`.
pub fn apply_pending_update_with_fs(ctx: &ApplyContext<'_>, fs_ops: &dyn FsOps) -> ApplyOutcome {
    let layout = ctx.layout;
    let ledger = PendingLedger::for_layout(layout);
    let journal = ApplyJournal::for_layout(layout);

    let Some(pending) = ledger.read() else {
        return ApplyOutcome::NothingPending;
    };
    let version = pending.version.clone();
    info!(version = %version, "applying staged update");

    let staged = layout.resolve_user_path(&pending.extracted_path);
    if !staged.is_dir() {
        let error = ApplyError::StagedMissing {
            path: staged.clone(),
        };
        warn!(error = %error, "dropping pending update");
        clear_ledger(&ledger);
        record_history(ctx, &pending, false, false, Some(error.to_string()));
        return ApplyOutcome::Discarded { version, error };
    }

    let app_dir = layout.app_dir().to_path_buf();
    let app_dir_old = layout.app_dir_old();
    if app_dir_old.exists() {
        let error = ApplyError::Backup {
            app_dir: app_dir.clone(),
            app_dir_old: app_dir_old.clone(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "backup location is occupied"),
        };
        warn!(error = %error, "could not move installation aside; update retry pending");
        return ApplyOutcome::Deferred { version, error };
    }

    journal_step(&journal, ApplyStep::Backup, StepState::Started, &version);
    if let Err(source) = fs_ops.rename(&app_dir, &app_dir_old) {
        let error = ApplyError::Backup {
            app_dir: app_dir.clone(),
            app_dir_old: app_dir_old.clone(),
            source,
        };
        warn!(error = %error, "could not move installation aside; update retry pending");
        clear_journal(&journal);
        return ApplyOutcome::Deferred { version, error };
    }
    journal_step(&journal, ApplyStep::Backup, StepState::Done, &version);

    let staged = layout.rebase_into_old(&staged);
    match install_staged(ctx, fs_ops, &journal, &staged, &version) {
        Ok(()) => {
            commit(ctx, fs_ops, &journal, &ledger, &pending, &staged);
            ApplyOutcome::Applied { version }
        }
        Err(error) => {
            error!(error = %error, "update failed, restoring previous installation");
            journal_step(&journal, ApplyStep::Rollback, StepState::Started, &version);
            match roll_back(layout, fs_ops, &error.to_string()) {
                Ok(()) => {
                    clear_journal(&journal);
                    clear_ledger(&ledger);
                    discard_staged(layout, &pending);
                    record_history(ctx, &pending, false, true, Some(error.to_string()));
                    info!(version = %version, "previous installation restored");
                    ApplyOutcome::RolledBack { version, error }
                }
                Err(fatal) => {
                    journal_step(&journal, ApplyStep::Rollback, StepState::Failed, &version);
                    error!(
                        app_dir = %fatal.app_dir.display(),
                        app_dir_old = %fatal.app_dir_old.display(),
                        error = %fatal,
                        "rollback failed"
                    );
                    clear_ledger(&ledger);
                    record_history(ctx, &pending, false, false, Some(fatal.to_string()));
                    ApplyOutcome::Fatal(fatal)
                }
            }
        }
    }
}

fn install_staged(
    ctx: &ApplyContext<'_>,
    fs_ops: &dyn FsOps,
    journal: &ApplyJournal,
    staged: &Path,
    version: &str,
) -> Result<(), ApplyError> {
    let app_dir = ctx.layout.app_dir();

    journal_step(journal, ApplyStep::Copy, StepState::Started, version);
    fs_ops
        .copy_dir(staged, app_dir)
        .map_err(|err| ApplyError::Copy {
            from: staged.to_path_buf(),
            to: app_dir.to_path_buf(),
            reason: format!("{err:#}"),
        })?;
    journal_step(journal, ApplyStep::Copy, StepState::Done, version);

    journal_step(journal, ApplyStep::RestorePreserved, StepState::Started, version);
    restore_user_data(ctx.layout, ctx.user_data)?;
    journal_step(journal, ApplyStep::RestorePreserved, StepState::Done, version);

    journal_step(journal, ApplyStep::Verify, StepState::Started, version);
    verify_installation(app_dir, ctx.check)?;
    journal_step(journal, ApplyStep::Verify, StepState::Done, version);
    Ok(())
}

fn commit(
    ctx: &ApplyContext<'_>,
    fs_ops: &dyn FsOps,
    journal: &ApplyJournal,
    ledger: &PendingLedger,
    pending: &PendingUpdate,
    staged: &Path,
) {
    let app_dir_old = ctx.layout.app_dir_old();
    journal_step(journal, ApplyStep::Commit, StepState::Started, &pending.version);
    match fs_ops.remove_dir_all(&app_dir_old) {
        Ok(()) => {
            journal_step(journal, ApplyStep::Commit, StepState::Done, &pending.version);
            clear_journal(journal);
        }
        Err(err) => warn!(
            path = %app_dir_old.display(),
            error = %err,
            "failed to remove previous installation; it will be removed on next start"
        ),
    }

    clear_ledger(ledger);
    let _ = remove_dir_if_exists(staged);
    discard_staged(ctx.layout, pending);
    record_history(ctx, pending, true, false, None);
    info!(version = %pending.version, "update applied");
}

/// Restores `app_dir_old` as `app_dir`, discarding whatever partial tree
/// sits at `app_dir`.
pub(crate) fn roll_back(
    layout: &UpdateLayout,
    fs_ops: &dyn FsOps,
    cause: &str,
) -> Result<(), FatalRollbackError> {
    let app_dir = layout.app_dir();
    let app_dir_old = layout.app_dir_old();
    let fatal = |reason: String| FatalRollbackError {
        app_dir: app_dir.to_path_buf(),
        app_dir_old: app_dir_old.clone(),
        cause: cause.to_string(),
        reason,
    };

    if fs::symlink_metadata(app_dir).is_ok() {
        fs_ops
            .remove_dir_all(app_dir)
            .map_err(|err| fatal(format!("could not remove {}: {err}", app_dir.display())))?;
    }
    fs_ops.rename(&app_dir_old, app_dir).map_err(|err| {
        fatal(format!(
            "could not move {} back to {}: {err}",
            app_dir_old.display(),
            app_dir.display()
        ))
    })
}

/// Checks that `app_dir` holds a runnable installation: the entry
/// executable and every required resource exist and can be read.
pub fn verify_installation(app_dir: &Path, check: &InstallCheck) -> Result<(), ApplyError> {
    if !app_dir.is_dir() {
        return Err(ApplyError::Verify {
            path: app_dir.to_path_buf(),
            reason: "installation directory is missing".to_string(),
        });
    }

    verify_readable_file(&app_dir.join(&check.entry_executable), "entry executable")?;
    for resource in &check.required_resources {
        let path = app_dir.join(resource);
        let metadata = fs::metadata(&path).map_err(|err| ApplyError::Verify {
            path: path.clone(),
            reason: format!("required resource is missing: {err}"),
        })?;
        if metadata.is_dir() {
            fs::read_dir(&path).map_err(|err| ApplyError::Verify {
                path: path.clone(),
                reason: format!("required directory is unreadable: {err}"),
            })?;
        } else {
            verify_readable_file(&path, "required resource")?;
        }
    }
    Ok(())
}

fn verify_readable_file(path: &Path, what: &str) -> Result<(), ApplyError> {
    let verify_err = |reason: String| ApplyError::Verify {
        path: path.to_path_buf(),
        reason,
    };
    let metadata = fs::metadata(path).map_err(|err| verify_err(format!("{what} is missing: {err}")))?;
    if !metadata.is_file() {
        return Err(verify_err(format!("{what} is not a file")));
    }
    if metadata.len() == 0 {
        return Err(verify_err(format!("{what} is empty")));
    }
    let mut first_byte = [0_u8; 1];
    File::open(path)
        .and_then(|mut file| file.read(&mut first_byte))
        .map_err(|err| verify_err(format!("{what} is unreadable: {err}")))?;
    Ok(())
}

/// Brings the user's data from the backed-up tree into the fresh one.
/// Hidden marker files are kept unless the new package ships them; the
/// pending-update record and the apply journal are never carried over.
fn restore_user_data(layout: &UpdateLayout, rules: &UserDataRestore) -> Result<(), ApplyError> {
    let user_dir = layout.user_dir();
    if !user_dir.starts_with(layout.app_dir()) {
        debug!(
            path = %user_dir.display(),
            "user data lives outside the installation; nothing to restore"
        );
        return Ok(());
    }
    let old_data = layout.rebase_into_old(user_dir);
    if !old_data.is_dir() {
        return Ok(());
    }

    let preserve_err = |path: &Path, err: &dyn std::fmt::Display| ApplyError::Preserve {
        path: path.to_path_buf(),
        reason: err.to_string(),
    };
    fs::create_dir_all(user_dir).map_err(|err| preserve_err(user_dir, &err))?;

    for name in &rules.overwrite_files {
        let source = old_data.join(name);
        if !source.is_file() {
            continue;
        }
        fs::copy(&source, user_dir.join(name)).map_err(|err| preserve_err(&source, &err))?;
        info!(file = %name, "restored user file");
    }

    let internal = [layout.ledger_path(), layout.journal_path()];
    let entries = fs::read_dir(&old_data).map_err(|err| preserve_err(&old_data, &err))?;
    for entry in entries {
        let entry = entry.map_err(|err| preserve_err(&old_data, &err))?;
        let name = entry.file_name();
        let target = user_dir.join(&name);
        let is_marker = name.to_string_lossy().starts_with('.')
            && entry.file_type().is_ok_and(|kind| kind.is_file());
        if !is_marker || internal.contains(&target) || target.exists() {
            continue;
        }
        fs::copy(entry.path(), &target).map_err(|err| preserve_err(&entry.path(), &err))?;
        info!(file = %name.to_string_lossy(), "restored marker file");
    }

    for dir in &rules.merge_dirs {
        let source = old_data.join(dir);
        if !source.is_dir() {
            continue;
        }
        let copied = merge_dir_keep_existing(&source, &user_dir.join(dir))
            .map_err(|err| preserve_err(&source, &format!("{err:#}")))?;
        info!(dir = %dir, files = copied, "restored user directory");
    }
    Ok(())
}

/// Best-effort removal of the extracted tree and the cached package.
pub(crate) fn discard_staged(layout: &UpdateLayout, pending: &PendingUpdate) {
    let mut paths = vec![
        layout.resolve_user_path(&pending.extracted_path),
        layout.extracted_dir(&pending.version),
    ];
    for archive_type in ArchiveType::ALL {
        paths.push(layout.package_path(&pending.version, archive_type));
    }

    for path in paths {
        let result = if path.is_dir() {
            remove_dir_if_exists(&path)
        } else {
            remove_file_if_exists(&path)
        };
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "failed to remove update artifact");
        }
    }
}

pub(crate) fn record_history(
    ctx: &ApplyContext<'_>,
    pending: &PendingUpdate,
    success: bool,
    rollback_occurred: bool,
    error_message: Option<String>,
) {
    let record = UpdateHistoryRecord {
        version: pending.version.clone(),
        previous_version: ctx.current_version.to_string(),
        channel: pending.channel,
        install_method: ctx.install_method,
        download_size: pending.size_bytes,
        download_duration: 0,
        install_success: success,
        error_message,
        rollback_occurred,
        installed_at: Utc::now(),
    };
    if let Err(err) = ctx.history.append(&record) {
        warn!(error = %format!("{err:#}"), "failed to record update history");
    }
}

pub(crate) fn clear_ledger(ledger: &PendingLedger) {
    if let Err(err) = ledger.clear() {
        warn!(error = %err, "failed to clear pending update record");
    }
}

pub(crate) fn clear_journal(journal: &ApplyJournal) {
    if let Err(err) = journal.clear() {
        warn!(error = %format!("{err:#}"), "failed to clear apply journal");
    }
}

pub(crate) fn journal_step(journal: &ApplyJournal, step: ApplyStep, state: StepState, version: &str) {
    if let Err(err) = journal.record(step, state, version) {
        warn!(error = %format!("{err:#}"), "failed to write apply journal");
    }
}
