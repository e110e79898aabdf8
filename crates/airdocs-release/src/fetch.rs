use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use airdocs_core::ProgressEvent;
use reqwest::blocking::{Client, Response};
use tracing::{debug, info, warn};

use crate::FetchError;

const CHUNK_SIZE: usize = 64 * 1024;

/// An in-flight transfer. Each call to `next` moves one chunk from the
/// response body into `<destination>.part`; the part file is renamed onto
/// `destination` only after the body is fully received. Dropping the
/// download before it completes removes the part file.
pub struct Download {
    url: String,
    destination: PathBuf,
    part_path: PathBuf,
    response: Response,
    writer: Option<BufWriter<File>>,
    buffer: Vec<u8>,
    bytes_done: u64,
    bytes_total: Option<u64>,
    announced: bool,
    finished: bool,
    completed: bool,
}

pub fn download(client: &Client, url: &str, destination: &Path) -> Result<Download, FetchError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|source| FetchError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let part_path = part_path_for(destination);
    remove_if_exists(&part_path).map_err(|source| FetchError::Write {
        path: part_path.clone(),
        source,
    })?;

    info!(url, destination = %destination.display(), "starting download");
    let response = client
        .get(url)
        .send()
        .map_err(|err| FetchError::from_request(url, err))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let bytes_total = response.content_length().filter(|length| *length > 0);
    let file = File::create(&part_path).map_err(|source| FetchError::Write {
        path: part_path.clone(),
        source,
    })?;

    Ok(Download {
        url: url.to_string(),
        destination: destination.to_path_buf(),
        part_path,
        response,
        writer: Some(BufWriter::new(file)),
        buffer: vec![0_u8; CHUNK_SIZE],
        bytes_done: 0,
        bytes_total,
        announced: false,
        finished: false,
        completed: false,
    })
}

/// `<name>.part` next to the destination; never mistaken for a finished
/// package because nothing reads that name.
pub(crate) fn part_path_for(destination: &Path) -> PathBuf {
    let file_name = destination
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("package");
    destination.with_file_name(format!("{file_name}.part"))
}

impl Download {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    pub fn bytes_total(&self) -> Option<u64> {
        self.bytes_total
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Drives the transfer to completion, reporting every event.
    pub fn run<F>(mut self, mut on_progress: F) -> Result<PathBuf, FetchError>
    where
        F: FnMut(ProgressEvent),
    {
        for event in self.by_ref() {
            on_progress(event?);
        }
        Ok(self.destination.clone())
    }

    fn pump(&mut self) -> Result<Option<ProgressEvent>, FetchError> {
        let read = loop {
            match self.response.read(&mut self.buffer) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    return Err(FetchError::Timeout {
                        url: self.url.clone(),
                    });
                }
                Err(source) => {
                    return Err(FetchError::Read {
                        url: self.url.clone(),
                        source,
                    });
                }
            }
        };

        if read == 0 {
            self.finalize()?;
            return Ok(None);
        }

        let Some(writer) = self.writer.as_mut() else {
            return Ok(None);
        };
        writer
            .write_all(&self.buffer[..read])
            .map_err(|source| FetchError::Write {
                path: self.part_path.clone(),
                source,
            })?;
        self.bytes_done += read as u64;
        Ok(Some(ProgressEvent::new(self.bytes_done, self.bytes_total)))
    }

    fn finalize(&mut self) -> Result<(), FetchError> {
        if let Some(expected) = self.bytes_total {
            if expected != self.bytes_done {
                return Err(FetchError::Truncated {
                    url: self.url.clone(),
                    expected,
                    actual: self.bytes_done,
                });
            }
        }

        if let Some(writer) = self.writer.take() {
            let write_error = |source| FetchError::Write {
                path: self.part_path.clone(),
                source,
            };
            let file = writer
                .into_inner()
                .map_err(|err| write_error(err.into_error()))?;
            file.sync_all().map_err(write_error)?;
        }

        if self.destination.exists() {
            fs::remove_file(&self.destination).map_err(|source| FetchError::Finalize {
                path: self.destination.clone(),
                source,
            })?;
        }
        fs::rename(&self.part_path, &self.destination).map_err(|source| FetchError::Finalize {
            path: self.destination.clone(),
            source,
        })?;

        self.completed = true;
        info!(
            url = %self.url,
            destination = %self.destination.display(),
            bytes = self.bytes_done,
            "download complete"
        );
        Ok(())
    }

    fn discard_partial(&mut self) {
        self.writer.take();
        if let Err(err) = remove_if_exists(&self.part_path) {
            warn!(path = %self.part_path.display(), error = %err, "failed to remove partial download");
        }
    }
}

impl Iterator for Download {
    type Item = Result<ProgressEvent, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if !self.announced {
            self.announced = true;
            return Some(Ok(ProgressEvent::new(0, self.bytes_total)));
        }

        match self.pump() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                self.discard_partial();
                Some(Err(err))
            }
        }
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        if !self.completed {
            debug!(url = %self.url, "download dropped before completion");
            self.discard_partial();
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
