//! Transactional tables.
//!
//! A table is a directory holding a transaction log and the immutable data
//! files it references:
//!
//! ```text
//! <table>/
//!   _log/   commit and checkpoint files, see [`crate::log`]
//!   data/   data files, see [`crate::datafile`]
//! ```
//!
//! Every write goes through the same cycle: pin a [`Snapshot`], plan a
//! change set of added and removed files, and commit it at the next version
//! with optimistic concurrency control (see [`txn`]). There is no lock
//! shared between writers; readers never block anyone.

pub mod dml;
pub mod merge;
pub mod metrics;
pub mod optimize;
pub mod snapshot;
pub mod tasks;
pub mod txn;
pub mod vacuum;

pub use dml::{DeleteResult, UpdateResult};
pub use merge::{merge, MatchedAction, MergeBuilder, MergeResult, NotMatchedAction};
pub use metrics::{collect_metrics, TableMetrics};
pub use optimize::{optimize, OptimizeResult};
pub use snapshot::Snapshot;
pub use vacuum::VacuumResult;

use crate::config::TableConfig;
use crate::datafile;
use crate::error::{Error, Result};
use crate::expr::Predicate;
use crate::log::{CommitEntry, Operation, TransactionLog, WriteMode, LOG_DIR};
use crate::record::{RecordBatch, Schema};

use std::fs;
use std::path::{Path, PathBuf};
use txn::{PendingCommit, Planned};

pub const DATA_DIR: &str = "data";

pub struct Table {
    name: String,
    dir: PathBuf,
    data_dir: PathBuf,
    log: TransactionLog,
    config: TableConfig,
}

impl Table {
    fn init(dir: PathBuf, config: TableConfig) -> Result<Self> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::InvalidOperation(format!("invalid table path {}", dir.display()))
            })?;
        let data_dir = dir.join(DATA_DIR);
        fs::create_dir_all(&data_dir)?;
        let log = TransactionLog::open(dir.join(LOG_DIR))?;

        Ok(Self {
            name,
            dir,
            data_dir,
            log,
            config,
        })
    }

    /// Creates an empty table at `dir` with `CREATE TABLE` as version 0.
    pub fn create(dir: impl Into<PathBuf>, schema: Schema, config: TableConfig) -> Result<Self> {
        let table = Self::init(dir.into(), config)?;
        let entry = CommitEntry::new(
            0,
            None,
            Operation::CreateTable {
                schema,
                as_select: false,
            },
        );
        if !table.log.try_write_commit(&entry)? {
            return Err(Error::TableExists(table.name));
        }

        tracing::info!(table = %table.name, "Created table");
        Ok(table)
    }

    /// Creates a table holding `batch` as version 0, with the batch's schema.
    pub fn create_as_select(
        dir: impl Into<PathBuf>,
        batch: &RecordBatch,
        config: TableConfig,
    ) -> Result<Self> {
        let table = Self::init(dir.into(), config)?;
        if table.log.exists(0) {
            return Err(Error::TableExists(table.name));
        }

        let added = table.write_rows(batch.schema(), batch.rows().to_vec())?;
        let entry = CommitEntry::new(
            0,
            None,
            Operation::CreateTable {
                schema: batch.schema().clone(),
                as_select: true,
            },
        )
        .with_files(added, Vec::new())
        .with_metric("numOutputRows", batch.len() as u64);

        let published = table.log.try_write_commit(&entry);
        if !matches!(published, Ok(true)) {
            table.discard_files(&entry.added);
        }
        if !published? {
            return Err(Error::TableExists(table.name));
        }

        tracing::info!(
            table = %table.name,
            rows = batch.len(),
            files = entry.added.len(),
            "Created table as select"
        );
        Ok(table)
    }

    /// Opens an existing table.
    pub fn open(dir: impl Into<PathBuf>, config: TableConfig) -> Result<Self> {
        let dir = dir.into();
        if !dir.join(LOG_DIR).is_dir() {
            let name = dir.file_name().map(|n| n.to_string_lossy().into_owned());
            return Err(Error::TableNotFound(name.unwrap_or_default()));
        }

        let table = Self::init(dir, config)?;
        if table.log.latest_version()?.is_none() {
            return Err(Error::TableNotFound(table.name));
        }
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Latest committed version.
    pub fn version(&self) -> Result<u64> {
        self.log
            .latest_version()?
            .ok_or_else(|| Error::TableNotFound(self.name.clone()))
    }

    pub fn schema(&self) -> Result<Schema> {
        Ok(self.snapshot()?.schema().clone())
    }

    /// Snapshot of the latest version.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Snapshot::replay(&self.log, &self.data_dir, self.version()?)
    }

    /// Snapshot as of `version` (time travel).
    pub fn snapshot_at(&self, version: u64) -> Result<Snapshot> {
        if version > self.version()? {
            return Err(Error::VersionNotFound(version));
        }
        Snapshot::replay(&self.log, &self.data_dir, version)
    }

    pub fn scan(&self) -> Result<RecordBatch> {
        self.snapshot()?.scan()
    }

    pub fn scan_filter(&self, predicate: &Predicate) -> Result<RecordBatch> {
        self.snapshot()?.scan_filter(predicate)
    }

    /// Every committed version, oldest first.
    pub fn history(&self) -> Result<Vec<CommitEntry>> {
        self.log.commits(0, self.version()?)
    }

    /// Appends `batch`, returning the committed version.
    pub fn append(&self, batch: &RecordBatch) -> Result<u64> {
        self.write(batch, WriteMode::Append, false)
    }

    /// Replaces the table content with `batch`, keeping the schema.
    pub fn overwrite(&self, batch: &RecordBatch) -> Result<u64> {
        self.write(batch, WriteMode::Overwrite, false)
    }

    /// Replaces both content and schema with those of `batch`.
    pub fn replace(&self, batch: &RecordBatch) -> Result<u64> {
        self.write(batch, WriteMode::Overwrite, true)
    }

    fn write(&self, batch: &RecordBatch, mode: WriteMode, new_schema: bool) -> Result<u64> {
        let (version, ()) = self.transact(|snapshot| {
            let (schema, rows) = if new_schema {
                (batch.schema().clone(), batch.rows().to_vec())
            } else {
                let aligned = batch.align_to(snapshot.schema())?;
                (snapshot.schema().clone(), aligned.into_rows())
            };

            let removed = match mode {
                WriteMode::Append => Vec::new(),
                WriteMode::Overwrite => snapshot.files().map(|f| f.path.clone()).collect(),
            };
            let added = self.write_rows(&schema, rows)?;
            let operation = Operation::Write {
                mode,
                schema: new_schema.then_some(schema),
            };

            let pending = PendingCommit::new(operation)
                .metric("numOutputRows", batch.len() as u64)
                .metric("numFiles", added.len() as u64)
                .files(added, removed);
            Ok(Planned::commit(pending, ()))
        })?;

        version.ok_or_else(|| Error::InvalidState("write produced no version".to_string()))
    }

    /// Writes rows into new data files sized by `target_file_rows`.
    pub(crate) fn write_rows(
        &self,
        schema: &Schema,
        rows: Vec<crate::record::Row>,
    ) -> Result<Vec<datafile::FileMeta>> {
        datafile::write_data_files(&self.data_dir, schema, rows, self.config.target_file_rows)
    }
}
