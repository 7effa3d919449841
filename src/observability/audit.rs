//! Append-only audit trail of resilience events.
//!
//! Each line of the log is a JSON object `{timestamp, event, data, prev_hash, hash}`.
//! `hash` is the hex SHA-256 of the entry's other fields, so every entry
//! commits to its predecessor and tampering breaks the chain.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::events::{EventObserver, ResilienceEvent};

/// `prev_hash` of the first entry in a log.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Event name.
    pub event: String,
    /// Event payload.
    pub data: Value,
    /// Hash of the previous entry, or [`GENESIS_HASH`].
    pub prev_hash: String,
    /// Hash of this entry.
    pub hash: String,
}

#[derive(Serialize)]
struct HashInput<'a> {
    timestamp: &'a DateTime<Utc>,
    event: &'a str,
    data: &'a Value,
    prev_hash: &'a str,
}

impl AuditEntry {
    fn new(timestamp: DateTime<Utc>, event: &str, data: Value, prev_hash: String) -> Result<Self, AuditError> {
        let hash = compute_hash(&timestamp, event, &data, &prev_hash)?;
        Ok(Self {
            timestamp,
            event: event.to_string(),
            data,
            prev_hash,
            hash,
        })
    }

    /// Recomputes the hash and compares it with the stored one.
    pub fn is_intact(&self) -> bool {
        compute_hash(&self.timestamp, &self.event, &self.data, &self.prev_hash)
            .map(|hash| hash == self.hash)
            .unwrap_or(false)
    }
}

fn compute_hash(
    timestamp: &DateTime<Utc>,
    event: &str,
    data: &Value,
    prev_hash: &str,
) -> Result<String, AuditError> {
    let input = serde_json::to_vec(&HashInput {
        timestamp,
        event,
        data,
        prev_hash,
    })?;
    Ok(hex::encode(Sha256::digest(&input)))
}

/// Audit log failures.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Reading or writing the log file failed.
    #[error("Audit log I/O error: {0}")]
    Io(#[from] io::Error),

    /// An entry could not be encoded or decoded.
    #[error("Audit log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A line is not a valid entry.
    #[error("Malformed audit entry on line {line}: {message}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Parser message.
        message: String,
    },

    /// An entry's hash or back-link does not match.
    #[error("Audit chain broken on line {line}")]
    BrokenChain {
        /// 1-based line number of the first bad entry.
        line: usize,
    },
}

struct Writer {
    file: File,
    last_hash: String,
}

/// Hash-chained JSON-lines audit log.
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl AuditLog {
    /// Opens (or creates) the log at `path`.
    ///
    /// An existing log is continued: new entries link to its last entry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let last_hash = match File::open(&path) {
            Ok(file) => last_hash_in(file)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => GENESIS_HASH.to_string(),
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "Audit log opened");

        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, last_hash }),
        })
    }

    /// Appends an entry stamped with the current time.
    pub fn log(&self, event: &str, data: Value) -> Result<AuditEntry, AuditError> {
        self.append(Utc::now(), event, data)
    }

    /// Appends an entry with an explicit timestamp.
    pub fn append(
        &self,
        timestamp: DateTime<Utc>,
        event: &str,
        data: Value,
    ) -> Result<AuditEntry, AuditError> {
        let mut writer = self.writer.lock();

        let entry = AuditEntry::new(timestamp, event, data, writer.last_hash.clone())?;
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        writer.file.write_all(&line)?;

        writer.last_hash = entry.hash.clone();
        Ok(entry)
    }

    /// Hash of the most recent entry, or [`GENESIS_HASH`] for an empty log.
    pub fn last_hash(&self) -> String {
        self.writer.lock().last_hash.clone()
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verifies the hash chain of the log at `path`.
    ///
    /// Returns the number of entries on success.
    pub fn verify(path: impl AsRef<Path>) -> Result<usize, AuditError> {
        let reader = BufReader::new(File::open(path)?);
        let mut prev_hash = GENESIS_HASH.to_string();
        let mut count = 0;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| AuditError::Malformed {
                line: index + 1,
                message: e.to_string(),
            })?;

            if entry.prev_hash != prev_hash || !entry.is_intact() {
                return Err(AuditError::BrokenChain { line: index + 1 });
            }
            prev_hash = entry.hash;
            count += 1;
        }

        Ok(count)
    }
}

fn last_hash_in(file: File) -> Result<String, AuditError> {
    let mut last = None;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }

    match last {
        Some(line) => {
            let entry: AuditEntry = serde_json::from_str(&line)?;
            Ok(entry.hash)
        }
        None => Ok(GENESIS_HASH.to_string()),
    }
}

impl EventObserver for AuditLog {
    fn on_event(&self, event: &ResilienceEvent) {
        if let Err(e) = self.append(event.timestamp, event.event_type.as_str(), event.detail.clone()) {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to write audit entry");
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .finish()
    }
}
