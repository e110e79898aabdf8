use airdocs_core::{ArchiveType, ProgressEvent};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tar::EntryType;
use thiserror::Error;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::fs_utils::remove_dir_if_exists;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("package archive {archive} is corrupt: {source}")]
    Corrupt {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archive entry escapes the target directory: {entry}")]
    PathTraversal { entry: PathBuf },
    #[error("archive entry {entry} has unsupported type {kind}")]
    UnsupportedEntry { entry: PathBuf, kind: String },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("package archive {archive} contains no files")]
    Empty { archive: PathBuf },
    #[error("extraction worker stopped unexpectedly")]
    WorkerLost,
}

enum Message {
    Progress(ProgressEvent),
    Failed(ExtractionError),
    Done,
}

/// A running extraction. Iterating yields progress in bytes of entry
/// payload written; the sequence ends once every entry is on disk.
///
/// Dropping an unfinished extraction stops the worker and removes
/// `target_dir`.
pub struct Extraction {
    receiver: Receiver<Message>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    target_dir: PathBuf,
    finished: bool,
    completed: bool,
}

/// Starts unpacking `archive_path` into `target_dir` on a worker thread.
/// Any previous contents of `target_dir` are discarded first. The leading
/// `strip_components` path components of every entry are dropped.
pub fn extract(
    archive_path: &Path,
    archive_type: ArchiveType,
    target_dir: &Path,
    strip_components: usize,
) -> Result<Extraction, ExtractionError> {
    if !archive_path.is_file() {
        return Err(ExtractionError::Corrupt {
            archive: archive_path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "archive not found"),
        });
    }

    let (sender, receiver) = mpsc::channel();
    let cancel = Arc::new(AtomicBool::new(false));
    let job = Job {
        archive: archive_path.to_path_buf(),
        archive_type,
        target_dir: target_dir.to_path_buf(),
        strip_components,
        cancel: Arc::clone(&cancel),
    };

    let worker = thread::Builder::new()
        .name("airdocs-extract".to_string())
        .spawn(move || job.run(sender))
        .map_err(|source| ExtractionError::Write {
            path: target_dir.to_path_buf(),
            source,
        })?;

    Ok(Extraction {
        receiver,
        cancel,
        worker: Some(worker),
        target_dir: target_dir.to_path_buf(),
        finished: false,
        completed: false,
    })
}

impl Extraction {
    /// Drains the extraction, handing each event to `on_progress`.
    pub fn run(
        mut self,
        mut on_progress: impl FnMut(ProgressEvent),
    ) -> Result<PathBuf, ExtractionError> {
        for event in self.by_ref() {
            on_progress(event?);
        }
        Ok(self.target_dir.clone())
    }

    fn stop_worker(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("extraction worker panicked");
            }
        }
    }
}

impl Iterator for Extraction {
    type Item = Result<ProgressEvent, ExtractionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.receiver.recv() {
            Ok(Message::Progress(event)) => Some(Ok(event)),
            Ok(Message::Failed(err)) => {
                self.finished = true;
                self.stop_worker();
                Some(Err(err))
            }
            Ok(Message::Done) => {
                self.finished = true;
                self.completed = true;
                self.stop_worker();
                None
            }
            Err(_) => {
                self.finished = true;
                self.stop_worker();
                let _ = remove_dir_if_exists(&self.target_dir);
                Some(Err(ExtractionError::WorkerLost))
            }
        }
    }
}

impl Drop for Extraction {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        self.stop_worker();
        if let Err(err) = remove_dir_if_exists(&self.target_dir) {
            warn!(
                path = %self.target_dir.display(),
                error = %err,
                "failed to remove abandoned extraction directory"
            );
        }
    }
}

struct Job {
    archive: PathBuf,
    archive_type: ArchiveType,
    target_dir: PathBuf,
    strip_components: usize,
    cancel: Arc<AtomicBool>,
}

enum Stop {
    Cancelled,
    Failed(ExtractionError),
}

impl Job {
    fn run(self, sender: Sender<Message>) {
        match self.unpack(&sender) {
            Ok(()) => {
                let _ = sender.send(Message::Done);
            }
            Err(stop) => {
                if let Err(err) = remove_dir_if_exists(&self.target_dir) {
                    warn!(
                        path = %self.target_dir.display(),
                        error = %err,
                        "failed to remove failed extraction directory"
                    );
                }
                if let Stop::Failed(err) = stop {
                    let _ = sender.send(Message::Failed(err));
                } else {
                    debug!(path = %self.target_dir.display(), "extraction cancelled");
                }
            }
        }
    }

    fn unpack(&self, sender: &Sender<Message>) -> Result<(), Stop> {
        let total = match self.archive_type {
            ArchiveType::Zip => self.measure_zip(),
            ArchiveType::TarGz | ArchiveType::Tar => self.measure_tar(),
        }
        .map_err(Stop::Failed)?;

        remove_dir_if_exists(&self.target_dir)
            .and_then(|()| fs::create_dir_all(&self.target_dir))
            .map_err(|source| {
                Stop::Failed(ExtractionError::Write {
                    path: self.target_dir.clone(),
                    source,
                })
            })?;
        debug!(
            archive = %self.archive.display(),
            format = self.archive_type.as_str(),
            bytes = total,
            "unpacking update package"
        );

        let mut progress = Tally {
            sender,
            done: 0,
            total,
            files: 0,
        };
        progress.report();
        match self.archive_type {
            ArchiveType::Zip => self.unpack_zip(&mut progress)?,
            ArchiveType::TarGz | ArchiveType::Tar => self.unpack_tar(&mut progress)?,
        }

        if progress.files == 0 {
            return Err(Stop::Failed(ExtractionError::Empty {
                archive: self.archive.clone(),
            }));
        }
        Ok(())
    }

    fn unpack_tar(&self, progress: &mut Tally<'_>) -> Result<(), Stop> {
        let mut archive = self.open_tar().map_err(Stop::Failed)?;
        let entries = archive.entries().map_err(|err| Stop::Failed(self.corrupt(err)))?;
        for entry in entries {
            self.check_cancel()?;

            let mut entry = entry.map_err(|err| Stop::Failed(self.corrupt(err)))?;
            let raw_path = entry
                .path()
                .map_err(|err| Stop::Failed(self.corrupt(err)))?
                .into_owned();
            let kind = entry.header().entry_type();
            let size = entry.header().size().unwrap_or(0);

            let Some(dest) = self.destination(&raw_path)? else {
                continue;
            };

            match kind {
                EntryType::Directory => create_dir(&dest)?,
                EntryType::Regular | EntryType::Continuous => {
                    create_parent(&dest)?;
                    entry.unpack(&dest).map_err(|source| {
                        Stop::Failed(ExtractionError::Write {
                            path: dest.clone(),
                            source,
                        })
                    })?;
                    progress.file_written(size);
                }
                EntryType::XGlobalHeader | EntryType::XHeader => continue,
                other => {
                    return Err(Stop::Failed(ExtractionError::UnsupportedEntry {
                        entry: raw_path,
                        kind: format!("{other:?}"),
                    }));
                }
            }
        }
        Ok(())
    }

    fn unpack_zip(&self, progress: &mut Tally<'_>) -> Result<(), Stop> {
        let mut archive = self.open_zip().map_err(Stop::Failed)?;
        for index in 0..archive.len() {
            self.check_cancel()?;

            let mut file = archive
                .by_index(index)
                .map_err(|err| Stop::Failed(self.corrupt_zip(err)))?;
            let raw_path = PathBuf::from(file.name());
            let kind = zip_entry_kind(file.is_dir(), file.unix_mode());

            let Some(dest) = self.destination(&raw_path)? else {
                continue;
            };

            match kind {
                ZipEntryKind::Directory => create_dir(&dest)?,
                ZipEntryKind::File => {
                    create_parent(&dest)?;
                    let written = File::create(&dest)
                        .and_then(|mut out| io::copy(&mut file, &mut out))
                        .map_err(|source| {
                            if source.kind() == io::ErrorKind::InvalidData {
                                Stop::Failed(self.corrupt(source))
                            } else {
                                Stop::Failed(ExtractionError::Write {
                                    path: dest.clone(),
                                    source,
                                })
                            }
                        })?;
                    #[cfg(unix)]
                    if let Some(mode) = file.unix_mode() {
                        use std::os::unix::fs::PermissionsExt;
                        fs::set_permissions(&dest, fs::Permissions::from_mode(mode & 0o777))
                            .map_err(|source| {
                                Stop::Failed(ExtractionError::Write {
                                    path: dest.clone(),
                                    source,
                                })
                            })?;
                    }
                    progress.file_written(written);
                }
                ZipEntryKind::Unsupported(kind) => {
                    return Err(Stop::Failed(ExtractionError::UnsupportedEntry {
                        entry: raw_path,
                        kind: kind.to_string(),
                    }));
                }
            }
        }
        Ok(())
    }

    /// Sums the payload size of every entry, which also rejects archives
    /// whose stream cannot be read to the end.
    fn measure_tar(&self) -> Result<u64, ExtractionError> {
        let mut archive = self.open_tar()?;
        let mut total = 0_u64;
        for entry in archive.entries().map_err(|err| self.corrupt(err))? {
            let entry = entry.map_err(|err| self.corrupt(err))?;
            if matches!(
                entry.header().entry_type(),
                EntryType::Regular | EntryType::Continuous
            ) {
                total += entry.header().size().map_err(|err| self.corrupt(err))?;
            }
        }
        Ok(total)
    }

    /// Reads the central directory; payload sizes come from there.
    fn measure_zip(&self) -> Result<u64, ExtractionError> {
        let mut archive = self.open_zip()?;
        let mut total = 0_u64;
        for index in 0..archive.len() {
            let file = archive
                .by_index(index)
                .map_err(|err| self.corrupt_zip(err))?;
            if !file.is_dir() {
                total += file.size();
            }
        }
        Ok(total)
    }

    fn open_tar(&self) -> Result<tar::Archive<Box<dyn Read>>, ExtractionError> {
        let file = File::open(&self.archive).map_err(|err| self.corrupt(err))?;
        let reader: Box<dyn Read> = match self.archive_type {
            ArchiveType::TarGz => Box::new(GzDecoder::new(BufReader::new(file))),
            _ => Box::new(BufReader::new(file)),
        };
        Ok(tar::Archive::new(reader))
    }

    fn open_zip(&self) -> Result<ZipArchive<BufReader<File>>, ExtractionError> {
        let file = File::open(&self.archive).map_err(|err| self.corrupt(err))?;
        ZipArchive::new(BufReader::new(file)).map_err(|err| self.corrupt_zip(err))
    }

    fn destination(&self, raw_path: &Path) -> Result<Option<PathBuf>, Stop> {
        let rel = checked_relative_path(raw_path, self.strip_components).map_err(Stop::Failed)?;
        Ok(rel.map(|rel| self.target_dir.join(rel)))
    }

    fn check_cancel(&self) -> Result<(), Stop> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(Stop::Cancelled);
        }
        Ok(())
    }

    fn corrupt(&self, source: io::Error) -> ExtractionError {
        ExtractionError::Corrupt {
            archive: self.archive.clone(),
            source,
        }
    }

    fn corrupt_zip(&self, err: ZipError) -> ExtractionError {
        match err {
            ZipError::Io(source) => self.corrupt(source),
            other => self.corrupt(io::Error::new(io::ErrorKind::InvalidData, other)),
        }
    }
}

struct Tally<'a> {
    sender: &'a Sender<Message>,
    done: u64,
    total: u64,
    files: usize,
}

impl Tally<'_> {
    fn file_written(&mut self, bytes: u64) {
        self.files += 1;
        self.done += bytes;
        self.report();
    }

    fn report(&self) {
        let _ = self
            .sender
            .send(Message::Progress(ProgressEvent::new(self.done, Some(self.total))));
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ZipEntryKind {
    Directory,
    File,
    Unsupported(&'static str),
}

/// Classifies a zip entry from its name and the unix mode bits in its
/// external attributes. Archives written on Windows carry no mode.
fn zip_entry_kind(is_dir: bool, unix_mode: Option<u32>) -> ZipEntryKind {
    const S_IFMT: u32 = 0o170_000;
    match unix_mode.map(|mode| mode & S_IFMT) {
        Some(0o120_000) => ZipEntryKind::Unsupported("Symlink"),
        Some(0o040_000) => ZipEntryKind::Directory,
        _ if is_dir => ZipEntryKind::Directory,
        None | Some(0) | Some(0o100_000) => ZipEntryKind::File,
        Some(_) => ZipEntryKind::Unsupported("special file"),
    }
}

fn create_dir(path: &Path) -> Result<(), Stop> {
    fs::create_dir_all(path).map_err(|source| {
        Stop::Failed(ExtractionError::Write {
            path: path.to_path_buf(),
            source,
        })
    })
}

fn create_parent(path: &Path) -> Result<(), Stop> {
    match path.parent() {
        Some(parent) => create_dir(parent),
        None => Ok(()),
    }
}

/// Normalizes an entry path and drops its leading components. Returns
/// `None` for entries that vanish after stripping.
fn checked_relative_path(
    raw: &Path,
    strip_components: usize,
) -> Result<Option<PathBuf>, ExtractionError> {
    let mut parts = Vec::new();
    for component in raw.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractionError::PathTraversal {
                    entry: raw.to_path_buf(),
                });
            }
        }
    }

    if parts.len() <= strip_components {
        return Ok(None);
    }
    Ok(Some(parts[strip_components..].iter().collect()))
}

#[cfg(test)]
pub(crate) fn classify_zip_entry(is_dir: bool, unix_mode: Option<u32>) -> &'static str {
    match zip_entry_kind(is_dir, unix_mode) {
        ZipEntryKind::Directory => "directory",
        ZipEntryKind::File => "file",
        ZipEntryKind::Unsupported(kind) => kind,
    }
}

#[cfg(test)]
pub(crate) fn relative_entry_path(
    raw: &Path,
    strip_components: usize,
) -> Result<Option<PathBuf>, ExtractionError> {
    checked_relative_path(raw, strip_components)
}
