//! Transaction log for a single table.
//!
//! The log is the table's source of truth. It is an append-only sequence of
//! versions, each stored as its own file under `<table>/_log/`:
//!
//! ```text
//! _log/
//!   00000000000000000000.commit
//!   00000000000000000001.commit
//!   ...
//!   00000000000000000010.checkpoint
//! ```
//!
//! ## Commit File Format
//!
//! ```text
//! +------------------+
//! | Header (32 bytes)|  magic, format version, table version
//! +------------------+
//! | len:u32          |
//! | bincode(entry)   |
//! | crc32:u32        |
//! +------------------+
//! ```
//!
//! ## Atomic Commit
//!
//! A commit is first written and synced to a hidden temporary file, then
//! hard-linked to its version name. `link` fails if the target exists, so
//! exactly one writer can publish each version and readers never observe a
//! partially written commit. This is the compare-and-swap that optimistic
//! concurrency control in [`crate::table`] is built on.
//!
//! ## Checkpoints
//!
//! A checkpoint stores the folded state (schema and live files) at a version.
//! It is written with temp file + rename and only ever shortens replay; a
//! missing or unreadable checkpoint falls back to replaying commits.

pub mod entry;
pub mod header;

use crate::encoding::{self, bincode};
use crate::error::{Error, Result};

pub use entry::{render_history, Checkpoint, CommitEntry, Operation, WriteMode};
use header::{LogFileKind, LogHeader, HEADER_SIZE};

use std::fs::{self, OpenOptions};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const LOG_DIR: &str = "_log";
const COMMIT_SUFFIX: &str = "commit";
const CHECKPOINT_SUFFIX: &str = "checkpoint";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct TransactionLog {
    dir: PathBuf,
}

impl TransactionLog {
    /// Opens the log directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn commit_path(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{:020}.{}", version, COMMIT_SUFFIX))
    }

    fn checkpoint_path(&self, version: u64) -> PathBuf {
        self.dir.join(format!("{:020}.{}", version, CHECKPOINT_SUFFIX))
    }

    fn temp_path(&self, version: u64, suffix: &str) -> PathBuf {
        let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{:020}.{}.{}-{}.tmp",
            version,
            suffix,
            std::process::id(),
            seq
        ))
    }

    /// Versions present in the directory, split into commits and checkpoints.
    /// Temporary files and unrelated names are ignored.
    fn list(&self) -> Result<(Vec<u64>, Vec<u64>)> {
        let mut commits = Vec::new();
        let mut checkpoints = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((stem, suffix)) = name.split_once('.') else {
                continue;
            };
            let Ok(version) = stem.parse::<u64>() else {
                continue;
            };
            match suffix {
                COMMIT_SUFFIX => commits.push(version),
                CHECKPOINT_SUFFIX => checkpoints.push(version),
                _ => {}
            }
        }

        commits.sort_unstable();
        checkpoints.sort_unstable();
        Ok((commits, checkpoints))
    }

    /// Highest committed version, or None for an empty log.
    pub fn latest_version(&self) -> Result<Option<u64>> {
        let (commits, _) = self.list()?;
        Ok(commits.last().copied())
    }

    pub fn exists(&self, version: u64) -> bool {
        self.commit_path(version).exists()
    }

    pub fn read_commit(&self, version: u64) -> Result<CommitEntry> {
        let bytes = match fs::read(self.commit_path(version)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::VersionNotFound(version))
            }
            Err(e) => return Err(e.into()),
        };

        let header = LogHeader::decode(&bytes, LogFileKind::Commit)?;
        let mut cursor = Cursor::new(&bytes[HEADER_SIZE..]);
        let payload = encoding::read_frame(&mut cursor)?;
        let entry: CommitEntry = bincode::deserialize(&payload)?;

        if header.table_version != version || entry.version != version {
            return Err(Error::InvalidData(format!(
                "commit file for version {} describes version {}",
                version, entry.version
            )));
        }
        Ok(entry)
    }

    /// Reads commits `from..=to` in order.
    pub fn commits(&self, from: u64, to: u64) -> Result<Vec<CommitEntry>> {
        (from..=to).map(|v| self.read_commit(v)).collect()
    }

    /// Publishes `entry` at `entry.version` unless that version already exists.
    ///
    /// Returns `Ok(false)` when another writer won the version.
    pub fn try_write_commit(&self, entry: &CommitEntry) -> Result<bool> {
        let bytes = encode_file(LogFileKind::Commit, entry.version, entry)?;
        let temp = self.temp_path(entry.version, COMMIT_SUFFIX);
        write_synced(&temp, &bytes)?;

        let linked = match fs::hard_link(&temp, self.commit_path(entry.version)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::IoError(e)),
        };

        if let Err(e) = fs::remove_file(&temp) {
            tracing::warn!(
                path = %temp.display(),
                error = %e,
                "Failed to remove temporary commit file"
            );
        }
        linked
    }

    pub fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = encode_file(LogFileKind::Checkpoint, checkpoint.version, checkpoint)?;
        let temp = self.temp_path(checkpoint.version, CHECKPOINT_SUFFIX);
        write_synced(&temp, &bytes)?;
        fs::rename(&temp, self.checkpoint_path(checkpoint.version))?;
        Ok(())
    }

    pub fn read_checkpoint(&self, version: u64) -> Result<Checkpoint> {
        let bytes = fs::read(self.checkpoint_path(version))?;
        LogHeader::decode(&bytes, LogFileKind::Checkpoint)?;
        let mut cursor = Cursor::new(&bytes[HEADER_SIZE..]);
        let payload = encoding::read_frame(&mut cursor)?;
        let checkpoint: Checkpoint = bincode::deserialize(&payload)?;
        if checkpoint.version != version {
            return Err(Error::InvalidData(format!(
                "checkpoint file for version {} describes version {}",
                version, checkpoint.version
            )));
        }
        Ok(checkpoint)
    }

    /// Newest readable checkpoint at or before `version`. Unreadable
    /// checkpoints are skipped with a warning.
    pub fn latest_checkpoint(&self, version: u64) -> Result<Option<Checkpoint>> {
        let (_, checkpoints) = self.list()?;
        for candidate in checkpoints.into_iter().rev().filter(|v| *v <= version) {
            match self.read_checkpoint(candidate) {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => {
                    tracing::warn!(
                        version = candidate,
                        error = %e,
                        "Skipping unreadable checkpoint"
                    );
                }
            }
        }
        Ok(None)
    }
}

fn encode_file<T: serde::Serialize>(kind: LogFileKind, version: u64, value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value)?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + 8);
    buf.extend_from_slice(&LogHeader::new(kind, version).encode()?);
    encoding::write_frame(&mut buf, &payload)?;
    Ok(buf)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}
