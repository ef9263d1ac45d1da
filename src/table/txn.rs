//! Optimistic commit protocol.
//!
//! Writers plan against a pinned snapshot and try to publish the next
//! version. When another writer got there first, the winning commit is
//! checked against ours:
//!
//! 1. the winner removed a file we also remove;
//! 2. the winner replaced the table, or we replace it and the winner changed
//!    data;
//! 3. we insert rows by key and the winner added data-changing files.
//!
//! Any of these is a [`Error::Conflict`]. Otherwise our change set is still
//! valid on top of the winner, so we rebase onto the next version and try
//! again. Conflicts are handled one level up by [`Table::transact`], which
//! replans from a fresh snapshot.

use super::{Snapshot, Table};
use crate::datafile::FileMeta;
use crate::error::{Error, Result};
use crate::log::{CommitEntry, Operation};

use std::collections::{BTreeMap, HashSet};
use std::thread;

/// A change set ready to be committed.
#[derive(Debug, Clone)]
pub(crate) struct PendingCommit {
    pub operation: Operation,
    pub added: Vec<FileMeta>,
    pub removed: Vec<String>,
    pub metrics: BTreeMap<String, u64>,
}

impl PendingCommit {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            added: Vec::new(),
            removed: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn files(mut self, added: Vec<FileMeta>, removed: Vec<String>) -> Self {
        self.added = added;
        self.removed = removed;
        self
    }

    pub fn metric(mut self, name: &str, value: u64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }
}

/// Result of planning one attempt: an optional commit plus the caller's
/// outcome for that plan.
pub(crate) struct Planned<T> {
    pub commit: Option<PendingCommit>,
    pub outcome: T,
}

impl<T> Planned<T> {
    pub fn commit(commit: PendingCommit, outcome: T) -> Self {
        Self {
            commit: Some(commit),
            outcome,
        }
    }

    pub fn skip(outcome: T) -> Self {
        Self {
            commit: None,
            outcome,
        }
    }
}

pub(crate) fn check_conflict(base: u64, ours: &CommitEntry, winner: &CommitEntry) -> Result<()> {
    let conflict = |reason: String| Error::Conflict {
        base,
        current: winner.version,
        reason,
    };

    if !ours.removed.is_empty() {
        let theirs: HashSet<&str> = winner.removed.iter().map(String::as_str).collect();
        if let Some(path) = ours.removed.iter().find(|p| theirs.contains(p.as_str())) {
            return Err(conflict(format!(
                "{} concurrently removed file {}",
                winner.operation.name(),
                path
            )));
        }
    }

    if winner.operation.replaces_table() {
        return Err(conflict(format!(
            "{} concurrently replaced the table",
            winner.operation.name()
        )));
    }

    if ours.operation.replaces_table() && winner.operation.data_change() {
        return Err(conflict(format!(
            "{} concurrently changed data being replaced",
            winner.operation.name()
        )));
    }

    if ours.operation.inserts_by_key() && winner.adds_data() {
        return Err(conflict(format!(
            "{} concurrently added data that may contain merged keys",
            winner.operation.name()
        )));
    }

    Ok(())
}

impl Table {
    /// Commits a change set planned against `base`, returning the new version.
    ///
    /// Fails with [`Error::Conflict`] when a commit after `base` invalidates
    /// the change set. Non-conflicting concurrent commits are rebased over.
    pub fn commit(
        &self,
        base: u64,
        added: Vec<FileMeta>,
        removed: Vec<String>,
        operation: Operation,
    ) -> Result<u64> {
        self.commit_pending(base, &PendingCommit::new(operation).files(added, removed))
    }

    pub(crate) fn commit_pending(&self, base: u64, pending: &PendingCommit) -> Result<u64> {
        let mut entry = CommitEntry::new(base + 1, Some(base), pending.operation.clone())
            .with_files(pending.added.clone(), pending.removed.clone());
        entry.metrics = pending.metrics.clone();

        loop {
            if self.log.try_write_commit(&entry)? {
                tracing::info!(
                    table = %self.name,
                    version = entry.version,
                    read_version = base,
                    operation = entry.operation.name(),
                    files_added = entry.added.len(),
                    files_removed = entry.removed.len(),
                    "Committed version"
                );
                self.maybe_checkpoint(entry.version);
                return Ok(entry.version);
            }

            let winner = self.log.read_commit(entry.version)?;
            check_conflict(base, &entry, &winner)?;

            tracing::debug!(
                table = %self.name,
                version = entry.version,
                winner = winner.operation.name(),
                "Rebasing over concurrent commit"
            );
            entry.version += 1;
            entry.timestamp_ms = crate::log::entry::now_millis();
        }
    }

    fn maybe_checkpoint(&self, version: u64) {
        let interval = self.config.checkpoint_interval;
        if interval == 0 || version == 0 || version % interval != 0 {
            return;
        }

        let result = self
            .snapshot_at(version)
            .and_then(|snapshot| self.log.write_checkpoint(&snapshot.to_checkpoint()));
        match result {
            Ok(()) => tracing::debug!(table = %self.name, version, "Wrote checkpoint"),
            Err(e) => tracing::warn!(
                table = %self.name,
                version,
                error = %e,
                "Failed to write checkpoint"
            ),
        }
    }

    /// Runs `plan` against a fresh snapshot and commits its change set,
    /// replanning on conflicts up to `max_commit_retries` attempts.
    ///
    /// Data files written for a conflicted attempt are deleted before the
    /// next attempt.
    pub(crate) fn transact<T>(
        &self,
        mut plan: impl FnMut(&Snapshot) -> Result<Planned<T>>,
    ) -> Result<(Option<u64>, T)> {
        let max_attempts = self.config.max_commit_retries.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let snapshot = self.snapshot()?;
            let Planned { commit, outcome } = plan(&snapshot)?;

            let Some(pending) = commit else {
                return Ok((None, outcome));
            };

            match self.commit_pending(snapshot.version(), &pending) {
                Ok(version) => return Ok((Some(version), outcome)),
                Err(e) => {
                    self.discard_files(&pending.added);
                    if !e.is_conflict() {
                        return Err(e);
                    }
                    if attempt >= max_attempts {
                        tracing::warn!(
                            table = %self.name,
                            operation = pending.operation.name(),
                            attempts = attempt,
                            "Giving up after repeated commit conflicts"
                        );
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(e),
                        });
                    }

                    tracing::warn!(
                        table = %self.name,
                        operation = pending.operation.name(),
                        attempt,
                        error = %e,
                        "Commit conflict, retrying"
                    );
                    thread::sleep(self.config.retry_backoff * attempt);
                }
            }
        }
    }

    /// Best-effort removal of data files that were never committed.
    pub(crate) fn discard_files(&self, files: &[FileMeta]) {
        for file in files {
            let path = self.data_dir.join(&file.path);
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove uncommitted data file"
                );
            }
        }
    }
}
