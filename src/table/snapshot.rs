use crate::datafile::{self, FileMeta};
use crate::error::{Error, Result};
use crate::expr::Predicate;
use crate::log::{Checkpoint, CommitEntry, TransactionLog};
use crate::record::{RecordBatch, Row, Schema};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Table state pinned at one version.
///
/// A snapshot only references immutable data files, so it stays readable
/// while other writers commit, until its files are vacuumed.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: u64,
    timestamp_ms: u64,
    schema: Schema,
    files: BTreeMap<String, FileMeta>,
    data_dir: PathBuf,
}

impl Snapshot {
    /// Folds the log up to `version`, starting from the newest checkpoint at
    /// or before it when one exists.
    pub(crate) fn replay(log: &TransactionLog, data_dir: &Path, version: u64) -> Result<Self> {
        let (mut snapshot, from) = match log.latest_checkpoint(version)? {
            Some(checkpoint) => {
                let next = checkpoint.version + 1;
                (Self::from_checkpoint(checkpoint, data_dir), next)
            }
            None => {
                let first = log.read_commit(0)?;
                let schema = first.operation.schema().cloned().ok_or_else(|| {
                    Error::InvalidData("version 0 does not define a schema".to_string())
                })?;
                let mut snapshot = Self {
                    version: 0,
                    timestamp_ms: first.timestamp_ms,
                    schema,
                    files: BTreeMap::new(),
                    data_dir: data_dir.to_path_buf(),
                };
                snapshot.apply(&first);
                (snapshot, 1)
            }
        };

        for v in from..=version {
            let entry = log.read_commit(v)?;
            snapshot.apply(&entry);
        }

        tracing::debug!(
            version = snapshot.version,
            replayed_from = from,
            files = snapshot.files.len(),
            "Replayed table snapshot"
        );
        Ok(snapshot)
    }

    fn from_checkpoint(checkpoint: Checkpoint, data_dir: &Path) -> Self {
        Self {
            version: checkpoint.version,
            timestamp_ms: checkpoint.timestamp_ms,
            schema: checkpoint.schema,
            files: checkpoint
                .files
                .into_iter()
                .map(|f| (f.path.clone(), f))
                .collect(),
            data_dir: data_dir.to_path_buf(),
        }
    }

    pub(crate) fn apply(&mut self, entry: &CommitEntry) {
        if let Some(schema) = entry.operation.schema() {
            self.schema = schema.clone();
        }
        for path in &entry.removed {
            self.files.remove(path);
        }
        for file in &entry.added {
            self.files.insert(file.path.clone(), file.clone());
        }
        self.version = entry.version;
        self.timestamp_ms = entry.timestamp_ms;
    }

    pub(crate) fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            version: self.version,
            timestamp_ms: self.timestamp_ms,
            schema: self.schema.clone(),
            files: self.files.values().cloned().collect(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Live files ordered by name.
    pub fn files(&self) -> impl Iterator<Item = &FileMeta> {
        self.files.values()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn row_count(&self) -> u64 {
        self.files.values().map(|f| f.row_count).sum()
    }

    pub fn size_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size).sum()
    }

    pub(crate) fn read_file(&self, file: &FileMeta) -> Result<Vec<Row>> {
        datafile::read_data_file(&self.data_dir.join(&file.path))
    }

    /// Reads every live row.
    pub fn scan(&self) -> Result<RecordBatch> {
        let mut rows = Vec::with_capacity(self.row_count() as usize);
        for file in self.files.values() {
            rows.extend(self.read_file(file)?);
        }
        Ok(RecordBatch::from_trusted(self.schema.clone(), rows))
    }

    /// Reads rows matching `predicate`, skipping files whose statistics rule
    /// out a match.
    pub fn scan_filter(&self, predicate: &Predicate) -> Result<RecordBatch> {
        predicate.validate(&self.schema)?;

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for file in self.files.values() {
            if !predicate.may_match(file) {
                skipped += 1;
                continue;
            }
            for row in self.read_file(file)? {
                if predicate.matches(&self.schema, &row)? {
                    rows.push(row);
                }
            }
        }

        tracing::debug!(
            version = self.version,
            predicate = %predicate,
            files_skipped = skipped,
            rows = rows.len(),
            "Filtered scan"
        );
        Ok(RecordBatch::from_trusted(self.schema.clone(), rows))
    }
}
