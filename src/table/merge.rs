//! Keyed merge (upsert) of a source batch into a table.
//!
//! The merge is a full outer join between target and source on the match
//! keys:
//!
//! - keys present on both sides take the matched action,
//! - keys only in the source take the not-matched action,
//! - keys only in the target are left alone.
//!
//! Null keys never match. Only files holding at least one matched row are
//! rewritten, and files whose key statistics cannot overlap the source key
//! range are not read at all. The whole merge lands as one version.

use super::txn::{PendingCommit, Planned};
use super::{Snapshot, Table};
use crate::config::NoopCommitPolicy;
use crate::error::{Error, Result};
use crate::expr::{bind_assignments, Assignment, Predicate};
use crate::log::Operation;
use crate::record::{DataType, RecordBatch, Row, Value};

use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub enum MatchedAction {
    /// `UPDATE SET *`: replace every column with the source row.
    UpdateAll,
    /// `UPDATE SET col = value, ...`
    Update(Vec<Assignment>),
    Delete,
}

impl MatchedAction {
    fn describe(&self) -> String {
        match self {
            MatchedAction::UpdateAll => "UPDATE SET *".to_string(),
            MatchedAction::Update(assignments) => {
                let set: Vec<String> = assignments.iter().map(ToString::to_string).collect();
                format!("UPDATE SET {}", set.join(", "))
            }
            MatchedAction::Delete => "DELETE".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotMatchedAction {
    /// `INSERT *`
    InsertAll,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// Committed version, None when an empty merge was skipped
    pub version: Option<u64>,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub files_added: usize,
    pub files_removed: usize,
}

/// Fluent merge:
///
/// ```ignore
/// table
///     .merge(&backfill)
///     .on(["id"])
///     .when_matched_update_all()
///     .when_not_matched_insert_all()
///     .execute()?;
/// ```
pub struct MergeBuilder<'a> {
    table: &'a Table,
    source: &'a RecordBatch,
    keys: Vec<String>,
    on_match: Option<MatchedAction>,
    on_not_matched: Option<NotMatchedAction>,
}

impl<'a> MergeBuilder<'a> {
    pub fn on<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn when_matched_update_all(mut self) -> Self {
        self.on_match = Some(MatchedAction::UpdateAll);
        self
    }

    pub fn when_matched_update(mut self, assignments: Vec<Assignment>) -> Self {
        self.on_match = Some(MatchedAction::Update(assignments));
        self
    }

    pub fn when_matched_delete(mut self) -> Self {
        self.on_match = Some(MatchedAction::Delete);
        self
    }

    pub fn when_not_matched_insert_all(mut self) -> Self {
        self.on_not_matched = Some(NotMatchedAction::InsertAll);
        self
    }

    pub fn execute(self) -> Result<MergeResult> {
        merge(
            self.table,
            self.source,
            &self.keys,
            self.on_match,
            self.on_not_matched,
        )
    }
}

impl Table {
    /// Starts a merge of `source` into this table.
    pub fn merge<'a>(&'a self, source: &'a RecordBatch) -> MergeBuilder<'a> {
        MergeBuilder {
            table: self,
            source,
            keys: Vec::new(),
            on_match: None,
            on_not_matched: None,
        }
    }
}

/// Merges `source` into `table` on `match_keys` as a single commit.
///
/// Fails with [`Error::AmbiguousMatch`] if two source rows share a non-null
/// key, and with [`Error::SchemaMismatch`] if the keys or the source columns
/// do not fit the table. Nothing is committed on failure.
pub fn merge<S: AsRef<str>>(
    table: &Table,
    source: &RecordBatch,
    match_keys: &[S],
    on_match: Option<MatchedAction>,
    on_not_matched: Option<NotMatchedAction>,
) -> Result<MergeResult> {
    if match_keys.is_empty() {
        return Err(Error::InvalidOperation(
            "merge requires at least one match key".to_string(),
        ));
    }
    let keys: Vec<String> = match_keys.iter().map(|k| k.as_ref().to_string()).collect();

    let (version, mut result) = table.transact(|snapshot| {
        plan_merge(
            table,
            snapshot,
            source,
            &keys,
            on_match.as_ref(),
            on_not_matched,
        )
    })?;
    result.version = version;
    Ok(result)
}

/// Source rows bound to the target schema, indexed by key.
struct BoundSource {
    /// Source rows aligned to the target, or None when no action needs them
    rows: Option<Vec<Row>>,
    keys: Vec<Option<Vec<Value>>>,
    index: HashMap<Vec<Value>, usize>,
}

fn bind_source(
    snapshot: &Snapshot,
    source: &RecordBatch,
    keys: &[String],
    needs_rows: bool,
) -> Result<BoundSource> {
    let target = snapshot.schema();
    let target_key_types: Vec<DataType> = keys
        .iter()
        .map(|k| Ok(target.fields[target.require(k)?].data_type))
        .collect::<Result<_>>()?;
    let source_key_idx = source.key_indices(keys)?;

    let rows = if needs_rows {
        Some(source.align_to(target)?.into_rows())
    } else {
        None
    };

    let mut bound_keys = Vec::with_capacity(source.len());
    let mut index = HashMap::with_capacity(source.len());
    for (i, row) in source.rows().iter().enumerate() {
        let key = source_key_idx
            .iter()
            .zip(&target_key_types)
            .map(|(&idx, &dt)| row[idx].clone().coerce(dt))
            .collect::<Result<Vec<Value>>>()?;

        if key.iter().any(Value::is_null) {
            bound_keys.push(None);
            continue;
        }
        if index.insert(key.clone(), i).is_some() {
            let rendered: Vec<String> = key.iter().map(ToString::to_string).collect();
            return Err(Error::AmbiguousMatch(format!("({})", rendered.join(", "))));
        }
        bound_keys.push(Some(key));
    }

    Ok(BoundSource {
        rows,
        keys: bound_keys,
        index,
    })
}

/// Predicate covering the source key range, used to skip target files.
fn key_range(keys: &[String], source: &BoundSource) -> Option<Predicate> {
    let mut range = Predicate::True;
    for (i, column) in keys.iter().enumerate() {
        let values = source.index.keys().map(|k| &k[i]);
        let min = values.clone().min()?;
        let max = values.max()?;
        range = range
            .and(Predicate::gt_eq(column.clone(), min.clone()))
            .and(Predicate::lt_eq(column.clone(), max.clone()));
    }
    Some(range)
}

fn plan_merge(
    table: &Table,
    snapshot: &Snapshot,
    source: &RecordBatch,
    keys: &[String],
    on_match: Option<&MatchedAction>,
    on_not_matched: Option<NotMatchedAction>,
) -> Result<Planned<MergeResult>> {
    let schema = snapshot.schema();
    let needs_rows = matches!(on_match, Some(MatchedAction::UpdateAll)) || on_not_matched.is_some();
    let bound = bind_source(snapshot, source, keys, needs_rows)?;
    let assignments = match on_match {
        Some(MatchedAction::Update(assignments)) => bind_assignments(schema, assignments)?,
        _ => Vec::new(),
    };

    let operation = |inserts: bool| Operation::Merge {
        match_keys: keys.to_vec(),
        matched: on_match.map(MatchedAction::describe),
        not_matched: on_not_matched.map(|_| "INSERT *".to_string()),
        inserts,
    };

    if source.is_empty() {
        tracing::info!(table = %table.name(), "Merge source is empty");
        return Ok(match table.config().noop_commit_policy {
            NoopCommitPolicy::Commit => Planned::commit(
                PendingCommit::new(operation(false)).metric("numSourceRows", 0),
                MergeResult::default(),
            ),
            NoopCommitPolicy::Skip => Planned::skip(MergeResult::default()),
        });
    }

    let target_key_idx: Vec<usize> = keys
        .iter()
        .map(|k| schema.require(k))
        .collect::<Result<_>>()?;
    let range = key_range(keys, &bound);

    let mut matched_sources: HashSet<usize> = HashSet::new();
    let mut removed = Vec::new();
    let mut new_rows: Vec<Row> = Vec::new();
    let mut result = MergeResult::default();
    let mut skipped = 0usize;

    for file in snapshot.files() {
        let candidate = range.as_ref().is_some_and(|r| r.may_match(file));
        if !candidate {
            skipped += 1;
            continue;
        }

        let rows = snapshot.read_file(file)?;
        let mut file_matched = false;
        let mut rewritten = Vec::with_capacity(rows.len());

        for row in rows {
            let key: Vec<Value> = target_key_idx.iter().map(|&i| row[i].clone()).collect();
            let hit = if key.iter().any(Value::is_null) {
                None
            } else {
                bound.index.get(&key).copied()
            };

            let Some(src) = hit else {
                rewritten.push(row);
                continue;
            };
            matched_sources.insert(src);
            file_matched = true;

            match on_match {
                None => rewritten.push(row),
                Some(MatchedAction::Delete) => result.deleted += 1,
                Some(MatchedAction::UpdateAll) => {
                    let replacement = bound
                        .rows
                        .as_ref()
                        .map(|rows| rows[src].clone())
                        .ok_or_else(|| {
                            Error::InvalidState("merge source rows not bound".to_string())
                        })?;
                    rewritten.push(replacement);
                    result.updated += 1;
                }
                Some(MatchedAction::Update(_)) => {
                    let mut row = row;
                    for (idx, value) in &assignments {
                        row[*idx] = value.clone();
                    }
                    rewritten.push(row);
                    result.updated += 1;
                }
            }
        }

        if file_matched && on_match.is_some() {
            removed.push(file.path.clone());
            new_rows.extend(rewritten);
        }
    }

    if on_not_matched == Some(NotMatchedAction::InsertAll) {
        if let Some(rows) = &bound.rows {
            for (i, row) in rows.iter().enumerate() {
                let unmatched = match &bound.keys[i] {
                    Some(_) => !matched_sources.contains(&i),
                    None => true,
                };
                if unmatched {
                    new_rows.push(row.clone());
                    result.inserted += 1;
                }
            }
        }
    }

    tracing::debug!(
        table = %table.name(),
        files_read = snapshot.file_count() - skipped,
        files_skipped = skipped,
        files_rewritten = removed.len(),
        "Planned merge"
    );

    let added = table.write_rows(schema, new_rows)?;
    result.files_added = added.len();
    result.files_removed = removed.len();

    let pending = PendingCommit::new(operation(result.inserted > 0))
        .metric("numSourceRows", source.len() as u64)
        .metric("numTargetRowsInserted", result.inserted)
        .metric("numTargetRowsUpdated", result.updated)
        .metric("numTargetRowsDeleted", result.deleted)
        .metric("numTargetFilesAdded", added.len() as u64)
        .metric("numTargetFilesRemoved", removed.len() as u64)
        .files(added, removed);
    Ok(Planned::commit(pending, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::table::tests::{sensor_batch, sensor_schema};
    use tempfile::tempdir;

    fn table_with(dir: &std::path::Path, rows: &[(i64, &str, &str)], config: TableConfig) -> Table {
        Table::create_as_select(dir.join("silver"), &sensor_batch(rows), config).unwrap()
    }

    fn upsert(table: &Table, source: &RecordBatch) -> Result<MergeResult> {
        table
            .merge(source)
            .on(["id"])
            .when_matched_update_all()
            .when_not_matched_insert_all()
            .execute()
    }

    #[test]
    fn test_upsert_updates_and_inserts() -> Result<()> {
        let dir = tempdir()?;
        let table = table_with(
            dir.path(),
            &[(1, "A", "NOMINAL"), (2, "B", "NOMINAL")],
            TableConfig::default(),
        );

        let result = upsert(&table, &sensor_batch(&[(2, "B", "FAILED"), (3, "C", "NOMINAL")]))?;
        assert_eq!(result.version, Some(1));
        assert_eq!(result.inserted, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(result.deleted, 0);

        assert_eq!(
            table.scan()?.sorted_rows(),
            sensor_batch(&[(1, "A", "NOMINAL"), (2, "B", "FAILED"), (3, "C", "NOMINAL")])
                .sorted_rows()
        );

        let history = table.history()?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].operation.name(), "MERGE");
        assert_eq!(history[1].metrics["numTargetRowsInserted"], 1);
        Ok(())
    }

    #[test]
    fn test_merge_with_all_new_keys_equals_append() -> Result<()> {
        let dir = tempdir()?;
        let merged = table_with(dir.path(), &[(1, "A", "NOMINAL")], TableConfig::default());
        let appended = Table::create_as_select(
            dir.path().join("appended"),
            &sensor_batch(&[(1, "A", "NOMINAL")]),
            TableConfig::default(),
        )?;

        let source = sensor_batch(&[(5, "E", "NOMINAL"), (6, "F", "FAILED")]);
        let result = upsert(&merged, &source)?;
        appended.append(&source)?;

        assert_eq!(result.inserted, 2);
        assert_eq!(result.updated, 0);
        assert_eq!(result.files_removed, 0);
        assert_eq!(merged.scan()?.sorted_rows(), appended.scan()?.sorted_rows());
        Ok(())
    }

    #[test]
    fn test_duplicate_source_keys_are_ambiguous() -> Result<()> {
        let dir = tempdir()?;
        let table = table_with(dir.path(), &[(1, "A", "NOMINAL")], TableConfig::default());

        let source = sensor_batch(&[(1, "A", "FAILED"), (1, "A", "NOMINAL")]);
        assert!(matches!(
            upsert(&table, &source),
            Err(Error::AmbiguousMatch(_))
        ));
        assert_eq!(table.version()?, 0);
        Ok(())
    }

    #[test]
    fn test_incompatible_source_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let table = table_with(dir.path(), &[(1, "A", "NOMINAL")], TableConfig::default());

        let source = RecordBatch::new(
            crate::record::Schema::new(vec![
                crate::record::Field::new("id", DataType::Int64),
                crate::record::Field::new("other", DataType::Utf8),
            ])?,
            vec![vec![Value::Int64(1), Value::from("x")]],
        )?;
        assert!(matches!(
            upsert(&table, &source),
            Err(Error::SchemaMismatch(_))
        ));

        let unknown_key = table
            .merge(&sensor_batch(&[(1, "A", "NOMINAL")]))
            .on(["plant_id"])
            .when_matched_update_all()
            .execute();
        assert!(matches!(unknown_key, Err(Error::SchemaMismatch(_))));
        assert_eq!(table.version()?, 0);
        Ok(())
    }

    #[test]
    fn test_empty_source_policy() -> Result<()> {
        let dir = tempdir()?;
        let table = table_with(dir.path(), &[(1, "A", "NOMINAL")], TableConfig::default());
        let empty = RecordBatch::empty(sensor_schema());

        let result = upsert(&table, &empty)?;
        assert_eq!(result.version, Some(1));
        assert_eq!((result.inserted, result.updated), (0, 0));
        let last = table.history()?.pop().unwrap();
        assert!(last.added.is_empty() && last.removed.is_empty());

        let skipping = Table::open(
            table.dir(),
            TableConfig::default().noop_commit_policy(NoopCommitPolicy::Skip),
        )?;
        let result = upsert(&skipping, &empty)?;
        assert_eq!(result.version, None);
        assert_eq!(skipping.version()?, 1);
        Ok(())
    }

    #[test]
    fn test_matched_delete_and_assignments() -> Result<()> {
        let dir = tempdir()?;
        let table = table_with(
            dir.path(),
            &[(1, "A", "NOMINAL"), (2, "B", "NOMINAL"), (3, "C", "NOMINAL")],
            TableConfig::default(),
        );

        let result = table
            .merge(&sensor_batch(&[(1, "?", "?")]))
            .on(["id"])
            .when_matched_delete()
            .execute()?;
        assert_eq!(result.deleted, 1);

        let result = table
            .merge(&sensor_batch(&[(2, "?", "?"), (7, "?", "?")]))
            .on(["id"])
            .when_matched_update(vec![Assignment::new("status", "FAILED")])
            .execute()?;
        assert_eq!((result.updated, result.inserted), (1, 0));

        assert_eq!(
            table.scan()?.sorted_rows(),
            sensor_batch(&[(2, "B", "FAILED"), (3, "C", "NOMINAL")]).sorted_rows()
        );
        Ok(())
    }

    #[test]
    fn test_unmatched_files_are_not_rewritten() -> Result<()> {
        let dir = tempdir()?;
        let config = TableConfig::default().target_file_rows(2);
        let table = table_with(
            dir.path(),
            &[
                (1, "A", "NOMINAL"),
                (2, "B", "NOMINAL"),
                (3, "C", "NOMINAL"),
                (4, "D", "NOMINAL"),
            ],
            config,
        );
        let before = table.snapshot()?;
        assert_eq!(before.file_count(), 2);
        let holds_id = |id: i64| {
            before
                .files()
                .find(|f| {
                    let stats = f.column_stats("id").unwrap();
                    stats.min <= Some(Value::Int64(id)) && stats.max >= Some(Value::Int64(id))
                })
                .map(|f| f.path.clone())
                .unwrap()
        };
        let (untouched, rewritten) = (holds_id(1), holds_id(4));
        assert_ne!(untouched, rewritten);

        let result = upsert(&table, &sensor_batch(&[(4, "D", "FAILED")]))?;
        assert_eq!(result.files_removed, 1);

        let after = table.snapshot()?;
        assert!(after.contains_file(&untouched));
        assert!(!after.contains_file(&rewritten));
        assert_eq!(after.row_count(), 4);
        Ok(())
    }

    #[test]
    fn test_null_keys_never_match() -> Result<()> {
        let dir = tempdir()?;
        let schema = crate::record::Schema::new(vec![
            crate::record::Field::new("k", DataType::Utf8),
            crate::record::Field::new("v", DataType::Int64),
        ])?;
        let table = Table::create_as_select(
            dir.path().join("t"),
            &RecordBatch::new(schema.clone(), vec![vec![Value::Null, Value::Int64(1)]])?,
            TableConfig::default(),
        )?;

        let source = RecordBatch::new(
            schema,
            vec![
                vec![Value::Null, Value::Int64(2)],
                vec![Value::Null, Value::Int64(3)],
            ],
        )?;
        let result = table
            .merge(&source)
            .on(["k"])
            .when_matched_update_all()
            .when_not_matched_insert_all()
            .execute()?;

        // Null keys are not duplicates either
        assert_eq!((result.updated, result.inserted), (0, 2));
        assert_eq!(table.scan()?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_backfill_with_empty_column() -> Result<()> {
        use crate::ingest::{parse_batch, CsvOptions};
        use std::io::Cursor;

        let dir = tempdir()?;
        let raw = parse_batch(
            Cursor::new("id,status,reading_1\n1,NOMINAL,1.5\n2,NOMINAL,2.5\n"),
            &CsvOptions::default(),
        )?;
        let table = Table::create_as_select(dir.path().join("silver"), &raw, TableConfig::default())?;

        // No reading at all, so the column cannot be typed from the data
        let backfill = parse_batch(
            Cursor::new("id,status,reading_1\n2,FAILED,\n3,NOMINAL,\n"),
            &CsvOptions::default(),
        )?;
        assert_eq!(backfill.schema().fields[2].data_type, DataType::Utf8);

        let result = upsert(&table, &backfill)?;
        assert_eq!((result.updated, result.inserted), (1, 1));

        let merged = table.scan()?;
        assert_eq!(merged.schema(), raw.schema());
        assert_eq!(
            merged.sorted_rows(),
            vec![
                vec![Value::Int64(1), "NOMINAL".into(), Value::Float64(1.5)],
                vec![Value::Int64(2), "FAILED".into(), Value::Null],
                vec![Value::Int64(3), "NOMINAL".into(), Value::Null],
            ]
        );
        Ok(())
    }
}
