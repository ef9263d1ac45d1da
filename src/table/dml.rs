//! Predicate-driven DELETE and UPDATE.
//!
//! Both are merges against the table itself: every file that may hold a
//! matching row is read, and files that actually do are replaced by a copy
//! with the change applied. Files without matches are left in place.

use super::txn::{PendingCommit, Planned};
use super::{Snapshot, Table};
use crate::config::NoopCommitPolicy;
use crate::datafile::FileMeta;
use crate::error::Result;
use crate::expr::{bind_assignments, Assignment, Predicate};
use crate::log::Operation;
use crate::record::Row;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub version: Option<u64>,
    pub deleted: u64,
    pub files_added: usize,
    pub files_removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub version: Option<u64>,
    pub updated: u64,
    pub files_added: usize,
    pub files_removed: usize,
}

/// Rows that replace the rewritten files, plus the files they replace.
struct Rewrite {
    removed: Vec<String>,
    rows: Vec<Row>,
    matched: u64,
}

/// Applies `change` to every row matching `predicate`. `change` returns the
/// replacement row, or None to drop it.
fn rewrite_matching(
    snapshot: &Snapshot,
    predicate: &Predicate,
    mut change: impl FnMut(Row) -> Option<Row>,
) -> Result<Rewrite> {
    let schema = snapshot.schema();
    let mut rewrite = Rewrite {
        removed: Vec::new(),
        rows: Vec::new(),
        matched: 0,
    };

    let candidates: Vec<&FileMeta> = snapshot.files().filter(|f| predicate.may_match(f)).collect();
    tracing::debug!(
        predicate = %predicate,
        candidates = candidates.len(),
        files_skipped = snapshot.file_count() - candidates.len(),
        "Scanning files for matches"
    );

    for file in candidates {
        let rows = snapshot.read_file(file)?;
        let mut kept = Vec::with_capacity(rows.len());
        let mut matched = 0u64;

        for row in rows {
            if predicate.matches(schema, &row)? {
                matched += 1;
                if let Some(row) = change(row) {
                    kept.push(row);
                }
            } else {
                kept.push(row);
            }
        }

        if matched > 0 {
            rewrite.matched += matched;
            rewrite.removed.push(file.path.clone());
            rewrite.rows.extend(kept);
        }
    }
    Ok(rewrite)
}

impl Table {
    /// Deletes rows matching `predicate` in one commit.
    pub fn delete(&self, predicate: &Predicate) -> Result<DeleteResult> {
        let (version, mut result) = self.transact(|snapshot| {
            predicate.validate(snapshot.schema())?;
            let rewrite = rewrite_matching(snapshot, predicate, |_| None)?;
            let operation = Operation::Delete {
                predicate: predicate.to_string(),
            };

            if rewrite.matched == 0 {
                return Ok(self.noop(operation, DeleteResult::default()));
            }

            let added = self.write_rows(snapshot.schema(), rewrite.rows)?;
            let result = DeleteResult {
                version: None,
                deleted: rewrite.matched,
                files_added: added.len(),
                files_removed: rewrite.removed.len(),
            };
            let pending = PendingCommit::new(operation)
                .metric("numDeletedRows", rewrite.matched)
                .metric("numAddedFiles", added.len() as u64)
                .metric("numRemovedFiles", rewrite.removed.len() as u64)
                .files(added, rewrite.removed);
            Ok(Planned::commit(pending, result))
        })?;

        result.version = version;
        Ok(result)
    }

    /// Applies `assignments` to rows matching `predicate` in one commit.
    pub fn update(&self, predicate: &Predicate, assignments: &[Assignment]) -> Result<UpdateResult> {
        let (version, mut result) = self.transact(|snapshot| {
            predicate.validate(snapshot.schema())?;
            let bound = bind_assignments(snapshot.schema(), assignments)?;
            let rewrite = rewrite_matching(snapshot, predicate, |mut row| {
                for (idx, value) in &bound {
                    row[*idx] = value.clone();
                }
                Some(row)
            })?;
            let operation = Operation::Update {
                predicate: predicate.to_string(),
                assignments: assignments.iter().map(ToString::to_string).collect(),
            };

            if rewrite.matched == 0 {
                return Ok(self.noop(operation, UpdateResult::default()));
            }

            let added = self.write_rows(snapshot.schema(), rewrite.rows)?;
            let result = UpdateResult {
                version: None,
                updated: rewrite.matched,
                files_added: added.len(),
                files_removed: rewrite.removed.len(),
            };
            let pending = PendingCommit::new(operation)
                .metric("numUpdatedRows", rewrite.matched)
                .metric("numAddedFiles", added.len() as u64)
                .metric("numRemovedFiles", rewrite.removed.len() as u64)
                .files(added, rewrite.removed);
            Ok(Planned::commit(pending, result))
        })?;

        result.version = version;
        Ok(result)
    }

    /// Plan for an operation that found nothing to change.
    fn noop<T>(&self, operation: Operation, outcome: T) -> Planned<T> {
        tracing::info!(
            table = %self.name(),
            operation = operation.name(),
            policy = ?self.config().noop_commit_policy,
            "Operation matched no rows"
        );
        match self.config().noop_commit_policy {
            NoopCommitPolicy::Commit => Planned::commit(PendingCommit::new(operation), outcome),
            NoopCommitPolicy::Skip => Planned::skip(outcome),
        }
    }
}
