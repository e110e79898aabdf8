use airdocs_core::UpdateHistoryRecord;
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// Append-only destination for apply outcomes. Nothing in the update
/// pipeline reads history back to make a decision.
pub trait HistorySink: Send + Sync {
    fn append(&self, record: &UpdateHistoryRecord) -> Result<()>;
}

/// One JSON object per line under the user directory.
#[derive(Debug, Clone)]
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads every parseable record, oldest first. Used for reporting.
    pub fn read_all(&self) -> Result<Vec<UpdateHistoryRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", self.path.display()))
            }
        };

        let mut records = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).with_context(|| {
                format!(
                    "failed parsing history line {} in {}",
                    index + 1,
                    self.path.display()
                )
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl HistorySink for JsonlHistory {
    fn append(&self, record: &UpdateHistoryRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record).context("failed to encode history record")?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(())
    }
}

/// Keeps records in memory; for embedding hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<UpdateHistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UpdateHistoryRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl HistorySink for MemoryHistory {
    fn append(&self, record: &UpdateHistoryRecord) -> Result<()> {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push(record.clone());
        Ok(())
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteHistory;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::HistorySink;
    use airdocs_core::{Channel, InstallMethod, UpdateHistoryRecord};
    use anyhow::{anyhow, Context, Result};
    use chrono::{DateTime, Utc};
    use rusqlite::{params, Connection, OpenFlags};
    use std::path::PathBuf;
    use tracing::warn;

    /// Writes into the `update_history` table of the application database.
    /// The application owns the schema; when its database has not been
    /// created yet nothing is written.
    #[derive(Debug, Clone)]
    pub struct SqliteHistory {
        path: PathBuf,
    }

    impl SqliteHistory {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        fn open_existing(&self) -> Result<Option<Connection>> {
            if !self.path.is_file() {
                return Ok(None);
            }
            let connection =
                Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_WRITE)
                    .with_context(|| format!("failed to open {}", self.path.display()))?;
            Ok(Some(connection))
        }

        /// Newest first.
        pub fn recent(&self, limit: usize) -> Result<Vec<UpdateHistoryRecord>> {
            let Some(connection) = self.open_existing()? else {
                return Ok(Vec::new());
            };
            let mut stmt = connection.prepare(
                "SELECT version, previous_version, channel, install_method, download_size,
                        download_duration, install_success, error_message, rollback_occurred,
                        installed_at
                 FROM update_history ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (
                    version,
                    previous_version,
                    channel,
                    install_method,
                    download_size,
                    download_duration,
                    install_success,
                    error_message,
                    rollback_occurred,
                    installed_at,
                ) = row?;
                let install_method = match install_method.as_str() {
                    "auto" => InstallMethod::Auto,
                    "manual" => InstallMethod::Manual,
                    other => return Err(anyhow!("unknown install method '{other}'")),
                };
                records.push(UpdateHistoryRecord {
                    version,
                    previous_version,
                    channel: channel.parse::<Channel>()?,
                    install_method,
                    download_size: download_size.max(0) as u64,
                    download_duration: download_duration.max(0.0) as u64,
                    install_success: install_success != 0,
                    error_message,
                    rollback_occurred: rollback_occurred != 0,
                    installed_at: DateTime::parse_from_rfc3339(&installed_at)
                        .with_context(|| format!("invalid installed_at '{installed_at}'"))?
                        .with_timezone(&Utc),
                });
            }
            Ok(records)
        }
    }

    impl HistorySink for SqliteHistory {
        fn append(&self, record: &UpdateHistoryRecord) -> Result<()> {
            let Some(connection) = self.open_existing()? else {
                warn!(
                    path = %self.path.display(),
                    version = %record.version,
                    "application database not found; update history not recorded"
                );
                return Ok(());
            };
            connection
                .execute(
                    "INSERT INTO update_history
                     (version, previous_version, channel, install_method, download_size,
                      download_duration, install_success, error_message, rollback_occurred,
                      installed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.version,
                        record.previous_version,
                        record.channel.as_str(),
                        record.install_method.as_str(),
                        record.download_size as i64,
                        record.download_duration as f64,
                        record.install_success as i64,
                        record.error_message,
                        record.rollback_occurred as i64,
                        record.installed_at.to_rfc3339(),
                    ],
                )
                .with_context(|| {
                    format!("failed to insert history into {}", self.path.display())
                })?;
            Ok(())
        }
    }
}
