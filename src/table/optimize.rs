//! File compaction and clustering.
//!
//! Optimize never changes which rows a table holds, only how they are laid
//! out in files:
//!
//! - **Bin-packing** (no cluster columns): files smaller than
//!   `target_file_rows` are combined into as few files as possible, once at
//!   least `min_files_to_compact` of them exist.
//! - **Clustering** (one to four columns): every live file is rewritten with
//!   rows sorted so that similar values share files, which tightens the
//!   per-file statistics used for skipping. A single column sorts directly.
//!   Several columns are ordered along a Z-order curve: each value is
//!   replaced by its rank within its column and the rank bits of all columns
//!   are interleaved into one key, so no column dominates the order.
//!
//! The commit is marked as not changing data, so it never conflicts with
//! concurrent appends or inserts, only with writers removing the same files.

use super::txn::{PendingCommit, Planned};
use super::{Snapshot, Table};
use crate::datafile::FileMeta;
use crate::error::{Error, Result};
use crate::log::Operation;
use crate::record::{Row, Value};

use std::collections::BTreeMap;

pub const MAX_CLUSTER_COLUMNS: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeResult {
    /// Committed version, None when there was nothing to rewrite
    pub version: Option<u64>,
    pub files_removed: usize,
    pub files_added: usize,
    pub rows: u64,
}

/// Compacts or clusters `table`. See [`Table::optimize`].
pub fn optimize<S: AsRef<str>>(table: &Table, cluster_by: &[S]) -> Result<OptimizeResult> {
    table.optimize(cluster_by)
}

impl Table {
    /// Rewrites files for scan efficiency, clustering by `cluster_by` when
    /// it is not empty. Returns a result without a version when there was
    /// nothing to do.
    pub fn optimize<S: AsRef<str>>(&self, cluster_by: &[S]) -> Result<OptimizeResult> {
        let columns: Vec<String> = cluster_by.iter().map(|c| c.as_ref().to_string()).collect();
        if columns.len() > MAX_CLUSTER_COLUMNS {
            return Err(Error::InvalidOperation(format!(
                "cannot cluster by more than {} columns, got {}",
                MAX_CLUSTER_COLUMNS,
                columns.len()
            )));
        }

        let (version, mut result) = self.transact(|snapshot| {
            let indices = columns
                .iter()
                .map(|c| snapshot.schema().require(c))
                .collect::<Result<Vec<usize>>>()?;

            let selected = if indices.is_empty() {
                self.compaction_candidates(snapshot)
            } else {
                snapshot.files().collect()
            };
            if selected.is_empty() {
                return Ok(Planned::skip(OptimizeResult::default()));
            }

            tracing::info!(
                table = %self.name(),
                version = snapshot.version(),
                files = selected.len(),
                cluster_by = ?columns,
                "Starting optimize"
            );

            let mut rows = Vec::new();
            for file in &selected {
                rows.extend(snapshot.read_file(file)?);
            }
            match indices.len() {
                0 => {}
                1 => rows.sort_by(|a, b| a[indices[0]].cmp(&b[indices[0]]).then_with(|| a.cmp(b))),
                _ => zorder_sort(&mut rows, &indices),
            }

            let row_count = rows.len() as u64;
            let removed: Vec<String> = selected.iter().map(|f| f.path.clone()).collect();
            let added = self.write_rows(snapshot.schema(), rows)?;

            let result = OptimizeResult {
                version: None,
                files_removed: removed.len(),
                files_added: added.len(),
                rows: row_count,
            };
            let pending = PendingCommit::new(Operation::Optimize {
                cluster_by: columns.clone(),
            })
            .metric("numRemovedFiles", removed.len() as u64)
            .metric("numAddedFiles", added.len() as u64)
            .metric("numRows", row_count)
            .files(added, removed);
            Ok(Planned::commit(pending, result))
        })?;

        result.version = version;
        if version.is_some() {
            tracing::info!(
                table = %self.name(),
                files_removed = result.files_removed,
                files_added = result.files_added,
                "Optimize completed"
            );
        }
        Ok(result)
    }

    /// Files worth bin-packing, or none if there are too few of them.
    fn compaction_candidates<'s>(&self, snapshot: &'s Snapshot) -> Vec<&'s FileMeta> {
        let target = self.config().target_file_rows as u64;
        let small: Vec<&FileMeta> = snapshot.files().filter(|f| f.row_count < target).collect();
        if small.len() < self.config().min_files_to_compact.max(2) {
            return Vec::new();
        }
        small
    }

    /// Number of files below the target size, used to decide when to run
    /// background compaction.
    pub fn small_file_count(&self, snapshot: &Snapshot) -> usize {
        let target = self.config().target_file_rows as u64;
        snapshot.files().filter(|f| f.row_count < target).count()
    }
}

/// Sorts rows along a Z-order curve over the given columns.
fn zorder_sort(rows: &mut Vec<Row>, columns: &[usize]) {
    let ranks: Vec<BTreeMap<Value, u64>> = columns
        .iter()
        .map(|&c| {
            let mut distinct: Vec<&Value> = rows.iter().map(|r| &r[c]).collect();
            distinct.sort();
            distinct.dedup();
            distinct
                .into_iter()
                .enumerate()
                .map(|(rank, v)| (v.clone(), rank as u64))
                .collect()
        })
        .collect();

    let max_rank = ranks.iter().map(|r| r.len() as u64).max().unwrap_or(1);
    let bits = (u64::BITS - max_rank.leading_zeros()).min(128 / columns.len() as u32);

    let mut keyed: Vec<(u128, Row)> = rows
        .drain(..)
        .map(|row| {
            let column_ranks: Vec<u64> = columns
                .iter()
                .zip(&ranks)
                .map(|(&c, r)| r.get(&row[c]).copied().unwrap_or_default())
                .collect();
            (interleave(&column_ranks, bits), row)
        })
        .collect();

    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    rows.extend(keyed.into_iter().map(|(_, row)| row));
}

/// Interleaves the low `bits` bits of each value, most significant first.
fn interleave(values: &[u64], bits: u32) -> u128 {
    let mut key = 0u128;
    for bit in (0..bits).rev() {
        for value in values {
            key = (key << 1) | ((value >> bit) & 1) as u128;
        }
    }
    key
}
