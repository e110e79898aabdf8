mod apply;
mod extract;
mod fs_utils;
mod history;
mod journal;
mod layout;
mod ledger;
mod recovery;

pub use apply::{
    apply_pending_update, apply_pending_update_with_fs, verify_installation, ApplyContext,
    ApplyError, ApplyOutcome, FatalRollbackError, InstallCheck, UserDataRestore,
};
pub use extract::{extract, Extraction, ExtractionError};
pub use fs_utils::{
    copy_dir_recursive, merge_dir_keep_existing, remove_dir_if_exists, remove_file_if_exists,
    write_atomic, FsOps, RealFs,
};
pub use history::{HistorySink, JsonlHistory, MemoryHistory};
#[cfg(feature = "sqlite")]
pub use history::SqliteHistory;
pub use journal::{ApplyJournal, ApplyStep, JournalEntry, StepState};
pub use layout::{default_user_dir, UpdateLayout};
pub use ledger::{LedgerError, PendingLedger};
pub use recovery::{recover_interrupted_apply, recover_interrupted_apply_with_fs, RecoveryOutcome};
