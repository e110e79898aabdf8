use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use airdocs_core::{
    is_newer_version, parse_version, ArchiveType, InstallMethod, PendingUpdate, ProgressEvent,
    ReleaseInfo,
};
use airdocs_installer::{
    apply_pending_update_with_fs, extract, recover_interrupted_apply_with_fs,
    remove_dir_if_exists, remove_file_if_exists, ApplyContext, ApplyOutcome, FsOps, HistorySink,
    PendingLedger, RealFs, RecoveryOutcome, UpdateLayout,
};
use airdocs_release::{build_http_client, download, ReleaseSource};
use airdocs_security::{verify_with_policy, DigestCheck, DigestPolicy, IntegrityError};
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::blocking::Client;
use semver::Version;
use tracing::{debug, error, info, warn};

use crate::{CancelToken, ProgressStage, UpdateError, UpdateEvent, UpdateState, UpdaterConfig};

/// Result of the before-UI startup hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupReport {
    NothingPending,
    Applied { version: String },
    RolledBack { version: String, error: String },
    /// The installation could not be moved aside; the update stays staged.
    Deferred { version: String, error: String },
    Discarded { version: String, error: String },
    /// An earlier apply was interrupted and has now been settled.
    Recovered { rolled_back: bool },
    FatalRollback {
        app_dir: PathBuf,
        app_dir_old: PathBuf,
        message: String,
    },
}

/// Drives the check, stage and apply flow for one installation. All
/// methods take `&self`; the update flow is serialized by the state.
pub struct Updater {
    config: UpdaterConfig,
    layout: UpdateLayout,
    current_version: Mutex<Version>,
    source: Option<Box<dyn ReleaseSource>>,
    history: Arc<dyn HistorySink>,
    fs_ops: Box<dyn FsOps + Send + Sync>,
    download_client: Client,
    state: Mutex<UpdateState>,
    subscribers: Mutex<Vec<Sender<UpdateEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Updater {
    pub fn new(
        config: UpdaterConfig,
        layout: UpdateLayout,
        current_version: Version,
        source: Option<Box<dyn ReleaseSource>>,
        history: Arc<dyn HistorySink>,
    ) -> Result<Self> {
        let download_client = build_http_client(&config.download_http_settings())
            .context("failed to build HTTP client for downloads")?;
        Ok(Self {
            config,
            layout,
            current_version: Mutex::new(current_version),
            source,
            history,
            fs_ops: Box::new(RealFs),
            download_client,
            state: Mutex::new(UpdateState::Idle),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Replaces the filesystem primitives used by the startup apply.
    pub fn with_fs_ops(mut self, fs_ops: impl FsOps + Send + Sync + 'static) -> Self {
        self.fs_ops = Box::new(fs_ops);
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn layout(&self) -> &UpdateLayout {
        &self.layout
    }

    pub fn state(&self) -> UpdateState {
        *lock(&self.state)
    }

    pub fn current_version(&self) -> Version {
        lock(&self.current_version).clone()
    }

    /// Reflects an apply that completed in this process.
    pub fn mark_current_version(&self, version: Version) {
        info!(version = %version, "running version updated");
        *lock(&self.current_version) = version;
    }

    /// Events are delivered in order. A receiver that is dropped stops
    /// receiving without affecting the others.
    pub fn subscribe(&self) -> Receiver<UpdateEvent> {
        let (sender, receiver) = mpsc::channel();
        lock(&self.subscribers).push(sender);
        receiver
    }

    fn emit(&self, event: UpdateEvent) {
        lock(&self.subscribers).retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Moves into `next` only from a state that accepts a new flow.
    fn claim(&self, next: UpdateState) -> Result<(), UpdateState> {
        let previous = {
            let mut state = lock(&self.state);
            if !state.accepts_new_flow() {
                return Err(*state);
            }
            std::mem::replace(&mut *state, next)
        };
        info!(from = %previous, to = %next, "update state changed");
        self.emit(UpdateEvent::StateChanged(next));
        Ok(())
    }

    fn set_state(&self, next: UpdateState) {
        let previous = {
            let mut state = lock(&self.state);
            std::mem::replace(&mut *state, next)
        };
        if previous != next {
            info!(from = %previous, to = %next, "update state changed");
            self.emit(UpdateEvent::StateChanged(next));
        }
    }

    /// Asks the release source for something newer than the running
    /// version. Failures are logged and read as "no update".
    pub fn check(&self) -> Option<ReleaseInfo> {
        if let Err(state) = self.claim(UpdateState::Checking) {
            debug!(state = %state, "skipping update check while busy");
            return None;
        }

        let Some(source) = &self.source else {
            info!("no release source configured; skipping update check");
            self.set_state(UpdateState::Idle);
            return None;
        };

        let channel = self.config.channel;
        let current = self.current_version();
        match source.check_latest(channel) {
            Ok(release) if is_newer_version(&current, &release.version) => {
                info!(
                    current = %current,
                    available = %release.version,
                    channel = %channel,
                    "update available"
                );
                self.emit(UpdateEvent::Message(format!(
                    "AirDocs {} is available (running {current})",
                    release.version
                )));
                self.set_state(UpdateState::UpdateAvailable);
                Some(release)
            }
            Ok(release) => {
                info!(
                    current = %current,
                    latest = %release.version,
                    channel = %channel,
                    "already up to date"
                );
                self.set_state(UpdateState::Idle);
                None
            }
            Err(err) => {
                warn!(source = %source.describe(), error = %err, "update check failed");
                self.set_state(UpdateState::Idle);
                None
            }
        }
    }

    /// The background check at process start, unless disabled by config.
    pub fn startup_check(&self) -> Option<ReleaseInfo> {
        if !self.config.check_on_startup {
            info!("startup update check disabled");
            return None;
        }
        self.check()
    }

    /// Downloads, verifies and extracts `release`, then records it as
    /// pending. On any failure the updater returns to idle with nothing
    /// staged.
    pub fn stage(
        &self,
        release: &ReleaseInfo,
        cancel: &CancelToken,
    ) -> Result<PendingUpdate, UpdateError> {
        self.claim(UpdateState::Downloading)
            .map_err(|state| UpdateError::Busy { state })?;

        match self.stage_release(release, cancel) {
            Ok(pending) => {
                info!(
                    version = %pending.version,
                    path = %pending.extracted_path.display(),
                    "update staged; it will be applied on next start"
                );
                self.set_state(UpdateState::Staged);
                Ok(pending)
            }
            Err(err) => {
                match &err {
                    UpdateError::Cancelled => info!(version = %release.version, "update cancelled"),
                    other => error!(version = %release.version, error = %other, "update failed"),
                }
                self.set_state(UpdateState::Idle);
                Err(err)
            }
        }
    }

    fn stage_release(
        &self,
        release: &ReleaseInfo,
        cancel: &CancelToken,
    ) -> Result<PendingUpdate, UpdateError> {
        let archive_type =
            release
                .archive_type()
                .ok_or_else(|| UpdateError::UnsupportedPackage {
                    url: release.download_url.clone(),
                })?;
        let version = release.version.to_string();
        let package = self.layout.package_path(&version, archive_type);
        let extracted = self.layout.extracted_dir(&version);

        if !release.has_digest() {
            if self.config.digest_policy() == DigestPolicy::Require {
                return Err(IntegrityError::DigestRequired { path: package }.into());
            }
            warn!(
                version = %version,
                "release publishes no sha256; the package will be installed unverified"
            );
        }

        let result = self.run_pipeline(release, archive_type, &package, &extracted, cancel);
        if result.is_err() {
            discard_artifacts(&package, &extracted);
        }
        result
    }

    fn run_pipeline(
        &self,
        release: &ReleaseInfo,
        archive_type: ArchiveType,
        package: &Path,
        extracted: &Path,
        cancel: &CancelToken,
    ) -> Result<PendingUpdate, UpdateError> {
        let updates_dir = self.layout.updates_dir();
        fs::create_dir_all(&updates_dir).map_err(|source| UpdateError::Io {
            path: updates_dir.clone(),
            source,
        })?;

        self.fetch_package(release, package, cancel)?;
        ensure_not_cancelled(cancel)?;

        self.set_state(UpdateState::Verifying);
        match verify_with_policy(
            package,
            release.sha256.as_deref(),
            self.config.digest_policy(),
        )? {
            DigestCheck::Verified { sha256 } => {
                info!(version = %release.version, sha256 = %sha256, "package digest verified")
            }
            DigestCheck::Skipped => {}
        }
        ensure_not_cancelled(cancel)?;

        self.set_state(UpdateState::Extracting);
        debug!(
            path = %package.display(),
            format = archive_type.as_str(),
            "extracting update package"
        );
        let extraction = extract(
            package,
            archive_type,
            extracted,
            self.config.strip_components,
        )?;
        for event in extraction {
            if cancel.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }
            self.emit(UpdateEvent::Progress {
                stage: ProgressStage::Extract,
                event: event?,
            });
        }
        ensure_not_cancelled(cancel)?;

        let pending = PendingUpdate::from_release(release, extracted.to_path_buf(), Utc::now());
        PendingLedger::for_layout(&self.layout).write(&pending)?;
        Ok(pending)
    }

    fn fetch_package(
        &self,
        release: &ReleaseInfo,
        package: &Path,
        cancel: &CancelToken,
    ) -> Result<(), UpdateError> {
        if self.reuse_cached_package(release, package) {
            self.emit(UpdateEvent::Progress {
                stage: ProgressStage::Download,
                event: ProgressEvent::new(
                    release.size_bytes,
                    Some(release.size_bytes),
                ),
            });
            return Ok(());
        }

        let attempts = self.config.download_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            ensure_not_cancelled(cancel)?;
            info!(
                version = %release.version,
                url = %release.download_url,
                attempt,
                attempts,
                "downloading update package"
            );
            let err = match self.download_once(release, package, cancel) {
                Ok(()) => return Ok(()),
                Err(UpdateError::Fetch(err)) => err,
                Err(other) => return Err(other),
            };
            if attempt >= attempts || !err.is_retryable() {
                return Err(err.into());
            }
            let delay = self.config.retry_delay(attempt);
            warn!(
                attempt,
                delay_secs = delay.as_secs(),
                error = %err,
                "download failed; retrying"
            );
            if cancel.wait(delay) {
                return Err(UpdateError::Cancelled);
            }
        }
    }

    fn download_once(
        &self,
        release: &ReleaseInfo,
        package: &Path,
        cancel: &CancelToken,
    ) -> Result<(), UpdateError> {
        let transfer = download(&self.download_client, &release.download_url, package)?;
        for event in transfer {
            if cancel.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }
            self.emit(UpdateEvent::Progress {
                stage: ProgressStage::Download,
                event: event?,
            });
        }
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        Ok(())
    }

    /// A cached package whose size matches the declared size is used as-is.
    /// Anything else at that path is deleted.
    fn reuse_cached_package(&self, release: &ReleaseInfo, package: &Path) -> bool {
        let Ok(metadata) = fs::metadata(package) else {
            return false;
        };
        if release.size_bytes > 0 && metadata.is_file() && metadata.len() == release.size_bytes {
            info!(path = %package.display(), "reusing cached update package");
            return true;
        }
        info!(
            path = %package.display(),
            size = metadata.len(),
            expected = release.size_bytes,
            "discarding cached update package"
        );
        if let Err(err) = remove_file_if_exists(package) {
            warn!(path = %package.display(), error = %err, "failed to remove cached package");
        }
        false
    }

    /// Settles any interrupted apply, then applies a staged update. Call
    /// before anything opens files under `app_dir`. Never panics.
    pub fn run_startup(&self, method: InstallMethod) -> StartupReport {
        let check = self.config.install_check();
        let user_data = self.config.user_data_restore();
        let current = self.current_version().to_string();
        let ctx = ApplyContext {
            layout: &self.layout,
            check: &check,
            user_data: &user_data,
            current_version: &current,
            install_method: method,
            history: &*self.history,
        };

        let recovered = match recover_interrupted_apply_with_fs(&ctx, &*self.fs_ops) {
            RecoveryOutcome::Clean => None,
            RecoveryOutcome::Fatal(fatal) => {
                return StartupReport::FatalRollback {
                    app_dir: fatal.app_dir.clone(),
                    app_dir_old: fatal.app_dir_old.clone(),
                    message: fatal.to_string(),
                };
            }
            RecoveryOutcome::RolledBack => {
                info!("interrupted update rolled back");
                Some(true)
            }
            RecoveryOutcome::RolledForward => {
                info!("interrupted update completed");
                Some(false)
            }
            RecoveryOutcome::RemovedStale => {
                info!("stale backup removed");
                Some(false)
            }
        };

        if PendingLedger::for_layout(&self.layout).exists() {
            self.set_state(UpdateState::Applying);
        }
        let outcome = apply_pending_update_with_fs(&ctx, &*self.fs_ops);
        let report = self.report_apply(outcome, recovered);
        self.set_state(UpdateState::Idle);
        report
    }

    fn report_apply(
        &self,
        outcome: ApplyOutcome,
        recovered: Option<bool>,
    ) -> StartupReport {
        match outcome {
            ApplyOutcome::NothingPending => match recovered {
                Some(rolled_back) => StartupReport::Recovered { rolled_back },
                None => StartupReport::NothingPending,
            },
            ApplyOutcome::Applied { version } => {
                self.set_state(UpdateState::Applied);
                match parse_version(&version) {
                    Ok(parsed) => self.mark_current_version(parsed),
                    Err(err) => warn!(version = %version, error = %err, "applied version is not semver"),
                }
                self.emit(UpdateEvent::Message(format!("AirDocs updated to {version}")));
                StartupReport::Applied { version }
            }
            ApplyOutcome::RolledBack { version, error } => {
                self.set_state(UpdateState::RolledBack);
                self.emit(UpdateEvent::Message(format!(
                    "Update to {version} failed and was rolled back"
                )));
                StartupReport::RolledBack {
                    version,
                    error: error.to_string(),
                }
            }
            ApplyOutcome::Deferred { version, error } => StartupReport::Deferred {
                version,
                error: error.to_string(),
            },
            ApplyOutcome::Discarded { version, error } => StartupReport::Discarded {
                version,
                error: error.to_string(),
            },
            ApplyOutcome::Fatal(fatal) => {
                self.emit(UpdateEvent::Message(fatal.to_string()));
                StartupReport::FatalRollback {
                    app_dir: fatal.app_dir.clone(),
                    app_dir_old: fatal.app_dir_old.clone(),
                    message: fatal.to_string(),
                }
            }
        }
    }

    /// Staged update awaiting the next start, if any.
    pub fn pending(&self) -> Option<PendingUpdate> {
        PendingLedger::for_layout(&self.layout).read()
    }

    /// Drops a staged update and its files without applying it.
    pub fn clear_pending(&self) -> Result<Option<PendingUpdate>> {
        let ledger = PendingLedger::for_layout(&self.layout);
        let pending = ledger.read();
        ledger.clear()?;
        if let Some(pending) = &pending {
            let extracted = self.layout.resolve_user_path(&pending.extracted_path);
            let archive = ArchiveType::infer_from_url(&pending.source_url)
                .map(|archive_type| self.layout.package_path(&pending.version, archive_type));
            remove_dir_if_exists(&extracted)
                .with_context(|| format!("failed to remove {}", extracted.display()))?;
            if let Some(archive) = archive {
                remove_file_if_exists(&archive)
                    .with_context(|| format!("failed to remove {}", archive.display()))?;
            }
            info!(version = %pending.version, "pending update cleared");
        }
        if *lock(&self.state) == UpdateState::Staged {
            self.set_state(UpdateState::Idle);
        }
        Ok(pending)
    }
}

fn ensure_not_cancelled(cancel: &CancelToken) -> Result<(), UpdateError> {
    if cancel.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }
    Ok(())
}

fn discard_artifacts(package: &Path, extracted: &Path) {
    if let Err(err) = remove_file_if_exists(package) {
        warn!(path = %package.display(), error = %err, "failed to remove update package");
    }
    if let Err(err) = remove_dir_if_exists(extracted) {
        warn!(path = %extracted.display(), error = %err, "failed to remove extracted update");
    }
}
