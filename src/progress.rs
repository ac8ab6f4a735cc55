use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::credentials::Credential;

/// Durable flush cadence: one write per this many newly tried combinations.
/// A crash loses at most the last partial batch.
pub const FLUSH_INTERVAL: usize = 10;

const RECORD_VERSION: u32 = 1;

/// Persisted sweep state, keyed by a content fingerprint of the target
/// database. The tried list stores credentials structurally so membership
/// checks survive option-list changes between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(default)]
    pub version: u32,
    pub database_file: String,
    pub database_hash: String,
    pub started_at: String,
    pub last_updated: String,
    pub total_combinations: usize,
    pub attempts_made: usize,
    pub tried_combinations: Vec<Credential>,
    #[serde(default)]
    pub success: Option<Credential>,
}

/// Snapshot for the resume banner.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub attempts_made: usize,
    pub total_combinations: usize,
    pub percent: f64,
    pub started_at: String,
    pub last_updated: String,
}

/// Summary written next to the progress file once the database opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessSummary {
    pub database_file: String,
    pub database_hash: String,
    pub success_credential: Credential,
    pub completed_at: String,
    pub total_attempts: usize,
}

/// Owns the working progress file, its `.backup` sibling and the one-shot
/// success summary. In-memory state is authoritative between flushes;
/// durability failures are logged and swallowed.
pub struct ProgressStore {
    path: PathBuf,
    record: Option<ProgressRecord>,
    tried_index: HashSet<Credential>,
}

impl ProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            record: None,
            tried_index: HashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".backup");
        PathBuf::from(name)
    }

    fn success_path(&self) -> PathBuf {
        self.path.with_extension("success.json")
    }

    /// Streaming SHA-256 of the target file, hex-encoded.
    pub fn fingerprint(path: &Path) -> Result<String> {
        let file = File::open(path)
            .with_context(|| format!("failed to open database: {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Load a prior record for `database`. Anything wrong with the stored
    /// file (absent, unparseable, wrong version, fingerprint or path
    /// mismatch) discards it and returns `Ok(false)`: the caller starts
    /// fresh. Only an unreadable *database* is an error.
    pub fn load(&mut self, database: &Path) -> Result<bool> {
        self.record = None;
        self.tried_index.clear();

        if !self.path.exists() {
            return Ok(false);
        }

        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) => {
                warn!("unreadable progress file {}: {}", self.path.display(), e);
                return Ok(false);
            }
        };

        let record: ProgressRecord = match serde_json::from_str(&data) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "invalid progress file {}: {} -- starting fresh",
                    self.path.display(),
                    e
                );
                return Ok(false);
            }
        };

        if record.version != RECORD_VERSION {
            warn!(
                "progress record version {} not supported -- starting fresh",
                record.version
            );
            return Ok(false);
        }

        let current_hash = Self::fingerprint(database)?;
        if record.database_hash != current_hash {
            warn!(
                "database content changed since the recorded sweep (was {}, now {}) -- starting fresh",
                record.database_hash, current_hash
            );
            return Ok(false);
        }

        if record.database_file != database.display().to_string() {
            warn!(
                "progress file was recorded for {} not {} -- starting fresh",
                record.database_file,
                database.display()
            );
            return Ok(false);
        }

        self.tried_index = record.tried_combinations.iter().cloned().collect();
        self.record = Some(record);
        Ok(true)
    }

    /// Start a new record for `database` and write it out immediately.
    pub fn create_fresh(&mut self, database: &Path, total_combinations: usize) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let database_hash = Self::fingerprint(database)?;

        self.tried_index.clear();
        self.record = Some(ProgressRecord {
            version: RECORD_VERSION,
            database_file: database.display().to_string(),
            database_hash,
            started_at: now.clone(),
            last_updated: now,
            total_combinations,
            attempts_made: 0,
            tried_combinations: Vec::new(),
            success: None,
        });
        self.flush();
        Ok(())
    }

    pub fn is_already_tried(&self, credential: &Credential) -> bool {
        self.tried_index.contains(credential)
    }

    /// Record one attempt. Idempotent: a structurally identical credential
    /// is counted once. Every [`FLUSH_INTERVAL`]th new attempt flushes.
    pub fn mark_tried(&mut self, credential: &Credential) {
        let Some(record) = self.record.as_mut() else {
            return;
        };
        if !self.tried_index.insert(credential.clone()) {
            return;
        }
        record.tried_combinations.push(credential.clone());
        record.attempts_made += 1;
        record.last_updated = Utc::now().to_rfc3339();
        let attempts_made = record.attempts_made;

        if attempts_made % FLUSH_INTERVAL == 0 {
            self.flush();
        }
    }

    /// Record the winning credential. Always flushes: success must not be
    /// lost to batching.
    pub fn mark_success(&mut self, credential: &Credential) {
        let Some(record) = self.record.as_mut() else {
            return;
        };
        record.success = Some(credential.clone());
        record.last_updated = Utc::now().to_rfc3339();
        self.flush();
    }

    /// Combinations already covered by the loaded record; the driver skips
    /// this many positions before consulting the membership check.
    pub fn skip_count(&self) -> usize {
        self.record.as_ref().map_or(0, |r| r.attempts_made)
    }

    pub fn progress_info(&self) -> Option<ProgressInfo> {
        self.record.as_ref().map(|record| ProgressInfo {
            attempts_made: record.attempts_made,
            total_combinations: record.total_combinations,
            percent: (record.attempts_made as f64 / record.total_combinations.max(1) as f64)
                * 100.0,
            started_at: record.started_at.clone(),
            last_updated: record.last_updated.clone(),
        })
    }

    /// Best-effort durable write: the previous file becomes the backup, the
    /// new content is written fresh under an exclusive lock. Failures weaken
    /// durability for this cycle but never abort the run.
    fn flush(&self) {
        let Some(record) = self.record.as_ref() else {
            return;
        };

        if self.path.exists() {
            if let Err(e) = fs::rename(&self.path, self.backup_path()) {
                warn!("could not back up previous progress file: {}", e);
            }
        }

        if let Err(e) = self.write_record(record) {
            warn!(
                "failed to save progress to {}: {}",
                self.path.display(),
                e
            );
        }
    }

    fn write_record(&self, record: &ProgressRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&self.path)?;
        file.lock_exclusive()?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.flush()?;
        Ok(())
    }

    /// After a declared success: write the one-shot summary, then remove the
    /// working and backup files so no stale resume state survives. All
    /// failures here are logged and swallowed.
    pub fn cleanup(&mut self) {
        let summary = self.record.as_ref().and_then(|record| {
            record.success.as_ref().map(|credential| SuccessSummary {
                database_file: record.database_file.clone(),
                database_hash: record.database_hash.clone(),
                success_credential: credential.clone(),
                completed_at: Utc::now().to_rfc3339(),
                total_attempts: record.attempts_made,
            })
        });

        if let Some(summary) = summary {
            let path = self.success_path();
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => {
                    if let Err(e) = fs::write(&path, json) {
                        warn!("failed to write success summary {}: {}", path.display(), e);
                    }
                }
                Err(e) => warn!("failed to encode success summary: {}", e),
            }
        }

        for path in [self.path.clone(), self.backup_path()] {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("failed to remove {}: {}", path.display(), e);
                }
            }
        }

        self.record = None;
        self.tried_index.clear();
    }
}
