use std::fs;
use tracing::{error, info, warn};

use crate::apply::{
    clear_journal, clear_ledger, discard_staged, record_history, roll_back, verify_installation,
};
use crate::{
    ApplyContext, ApplyJournal, ApplyStep, FatalRollbackError, FsOps, PendingLedger, RealFs,
};

#[derive(Debug)]
pub enum RecoveryOutcome {
    /// No interrupted apply was found.
    Clean,
    /// The swap had passed verification; the leftover backup was removed.
    RolledForward,
    /// The swap had not been verified; the backup was restored.
    RolledBack,
    /// A backup without any journal was left next to a healthy install.
    RemovedStale,
    Fatal(FatalRollbackError),
}

pub fn recover_interrupted_apply(ctx: &ApplyContext<'_>) -> RecoveryOutcome {
    recover_interrupted_apply_with_fs(ctx, &RealFs)
}

/// Settles an apply that was cut short by a crash or power loss. Runs at
/// startup before any pending update is considered.
pub fn recover_interrupted_apply_with_fs(
    ctx: &ApplyContext<'_>,
    fs_ops: &dyn FsOps,
) -> RecoveryOutcome {
    let layout = ctx.layout;
    let journal = ApplyJournal::for_layout(layout);
    let app_dir_old = layout.app_dir_old();

    if fs::symlink_metadata(&app_dir_old).is_err() {
        if journal.path().exists() {
            clear_journal(&journal);
        }
        return RecoveryOutcome::Clean;
    }

    let verified = journal
        .has_completed(ApplyStep::Verify)
        .unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "apply journal is unreadable");
            false
        });

    if verified {
        info!(path = %app_dir_old.display(), "finishing interrupted update");
        if let Err(err) = fs_ops.remove_dir_all(&app_dir_old) {
            warn!(
                path = %app_dir_old.display(),
                error = %err,
                "failed to remove previous installation"
            );
            return RecoveryOutcome::RolledForward;
        }
        clear_journal(&journal);
        let ledger = PendingLedger::for_layout(layout);
        if let Some(pending) = ledger.read() {
            clear_ledger(&ledger);
            discard_staged(layout, &pending);
            record_history(ctx, &pending, true, false, None);
        }
        return RecoveryOutcome::RolledForward;
    }

    let app_dir_healthy = verify_installation(layout.app_dir(), ctx.check).is_ok();
    let journal_empty = journal.is_empty().unwrap_or(true);
    if journal_empty && app_dir_healthy {
        info!(path = %app_dir_old.display(), "removing stale previous installation");
        if let Err(err) = fs_ops.remove_dir_all(&app_dir_old) {
            warn!(
                path = %app_dir_old.display(),
                error = %err,
                "failed to remove stale previous installation"
            );
        }
        return RecoveryOutcome::RemovedStale;
    }

    let cause = "update was interrupted before verification";
    warn!(path = %app_dir_old.display(), "restoring previous installation after interrupted update");
    if let Err(fatal) = roll_back(layout, fs_ops, cause) {
        error!(
            app_dir = %fatal.app_dir.display(),
            app_dir_old = %fatal.app_dir_old.display(),
            error = %fatal,
            "rollback failed"
        );
        return RecoveryOutcome::Fatal(fatal);
    }
    clear_journal(&journal);

    // The ledger may have travelled with the backup when it lives under app_dir.
    let ledger = PendingLedger::for_layout(layout);
    if let Some(pending) = ledger.read() {
        clear_ledger(&ledger);
        discard_staged(layout, &pending);
        record_history(ctx, &pending, false, true, Some(cause.to_string()));
    }
    RecoveryOutcome::RolledBack
}
