use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::fs_utils::remove_file_if_exists;
use crate::UpdateLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStep {
    Backup,
    Copy,
    RestorePreserved,
    Verify,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Started,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub step: ApplyStep,
    pub state: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Append-only step log for the apply currently in flight. Lets the next
/// start tell a finished swap from an interrupted one.
#[derive(Debug, Clone)]
pub struct ApplyJournal {
    path: PathBuf,
}

impl ApplyJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_layout(layout: &UpdateLayout) -> Self {
        Self::new(layout.journal_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, step: ApplyStep, state: StepState, version: &str) -> Result<()> {
        let seq = self.entries()?.last().map(|entry| entry.seq + 1).unwrap_or(1);
        self.append(&JournalEntry {
            seq,
            step,
            state,
            version: Some(version.to_string()),
        })
    }

    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut line = serde_json::to_string(entry).context("failed to encode journal entry")?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open apply journal: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append apply journal: {}", self.path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to flush apply journal: {}", self.path.display()))?;
        Ok(())
    }

    /// Lines that fail to parse are skipped; a crash can leave a torn
    /// final line.
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read apply journal: {}", self.path.display())
                })
            }
        };

        let mut entries = Vec::new();
        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => debug!(error = %err, "skipping torn apply journal line"),
            }
        }
        Ok(entries)
    }

    pub fn has_completed(&self, step: ApplyStep) -> Result<bool> {
        Ok(self
            .entries()?
            .iter()
            .any(|entry| entry.step == step && entry.state == StepState::Done))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries()?.is_empty())
    }

    pub fn clear(&self) -> Result<()> {
        remove_file_if_exists(&self.path)
            .with_context(|| format!("failed to clear apply journal: {}", self.path.display()))
    }
}
