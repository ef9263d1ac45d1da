//! Read-only batch transforms used to derive curated tables.

use crate::error::{Error, Result};
use crate::expr::Predicate;
use crate::record::{DataType, Field, RecordBatch, Row, Schema, Value};

use std::collections::{BTreeMap, HashMap};

/// Rows of `batch` matching `predicate`.
pub fn filter(batch: &RecordBatch, predicate: &Predicate) -> Result<RecordBatch> {
    predicate.validate(batch.schema())?;
    let mut rows = Vec::new();
    for row in batch.rows() {
        if predicate.matches(batch.schema(), row)? {
            rows.push(row.clone());
        }
    }
    Ok(RecordBatch::from_trusted(batch.schema().clone(), rows))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    Left,
    Right,
}

/// An output column of a join, taken from one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinColumn {
    pub side: JoinSide,
    pub name: String,
}

impl JoinColumn {
    pub fn left(name: impl Into<String>) -> Self {
        Self {
            side: JoinSide::Left,
            name: name.into(),
        }
    }

    pub fn right(name: impl Into<String>) -> Self {
        Self {
            side: JoinSide::Right,
            name: name.into(),
        }
    }
}

/// `SELECT <columns> FROM left INNER JOIN right ON left.left_key = right.right_key`
///
/// Hash join: `left` is hashed on its key, each `right` row looks it up in order, so
/// output follows the order of `right`. Null keys never join.
pub fn inner_join(
    left: &RecordBatch,
    right: &RecordBatch,
    left_key: &str,
    right_key: &str,
    columns: &[JoinColumn],
) -> Result<RecordBatch> {
    let left_idx = left.schema().require(left_key)?;
    let right_idx = right.schema().require(right_key)?;
    let key_type = join_key_type(
        left.schema().fields[left_idx].data_type,
        right.schema().fields[right_idx].data_type,
    )?;

    let mut projection = Vec::with_capacity(columns.len());
    let mut fields = Vec::with_capacity(columns.len());
    for column in columns {
        let side = match column.side {
            JoinSide::Left => left,
            JoinSide::Right => right,
        };
        let idx = side.schema().require(&column.name)?;
        projection.push((column.side, idx));
        fields.push(side.schema().fields[idx].clone());
    }
    let schema = Schema::new(fields)?;

    let mut table: HashMap<Value, Vec<&Row>> = HashMap::new();
    for row in left.rows() {
        let key = row[left_idx].clone().coerce(key_type)?;
        if !key.is_null() {
            table.entry(key).or_default().push(row);
        }
    }

    let mut rows = Vec::new();
    for right_row in right.rows() {
        let key = right_row[right_idx].clone().coerce(key_type)?;
        let Some(matches) = table.get(&key) else {
            continue;
        };
        for left_row in matches {
            let row = projection
                .iter()
                .map(|(side, idx)| match side {
                    JoinSide::Left => left_row[*idx].clone(),
                    JoinSide::Right => right_row[*idx].clone(),
                })
                .collect();
            rows.push(row);
        }
    }

    Ok(RecordBatch::from_trusted(schema, rows))
}

fn join_key_type(left: DataType, right: DataType) -> Result<DataType> {
    if left == right {
        return Ok(left);
    }
    if left.accepts(right) {
        return Ok(left);
    }
    if right.accepts(left) {
        return Ok(right);
    }
    Err(Error::SchemaMismatch(format!(
        "cannot join {} key with {} key",
        left, right
    )))
}

/// `SELECT <keys>, count(*) AS <count_column> ... GROUP BY <keys>`, sorted
/// by the group keys.
pub fn group_count<S: AsRef<str>>(
    batch: &RecordBatch,
    keys: &[S],
    count_column: &str,
) -> Result<RecordBatch> {
    let indices = batch.key_indices(keys)?;

    let mut groups: BTreeMap<Vec<Value>, i64> = BTreeMap::new();
    for row in batch.rows() {
        let key = indices.iter().map(|&i| row[i].clone()).collect();
        *groups.entry(key).or_insert(0) += 1;
    }

    let mut fields: Vec<Field> = indices
        .iter()
        .map(|&i| batch.schema().fields[i].clone())
        .collect();
    fields.push(Field::new(count_column, DataType::Int64).not_null());
    let schema = Schema::new(fields)?;

    let rows = groups
        .into_iter()
        .map(|(mut key, count)| {
            key.push(Value::Int64(count));
            key
        })
        .collect();
    Ok(RecordBatch::from_trusted(schema, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("device_id", DataType::Utf8),
            Field::new("status", DataType::Utf8),
        ])
        .unwrap();
        RecordBatch::new(
            schema,
            vec![
                vec!["7G007R".into(), "NOMINAL".into()],
                vec!["7G007T".into(), "FAILED".into()],
                vec!["7G007R".into(), "FAILED".into()],
                vec![Value::Null, "NOMINAL".into()],
                vec!["UNKNOWN".into(), "NOMINAL".into()],
            ],
        )
        .unwrap()
    }

    fn plants() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("plant_id", DataType::Int64),
            Field::new("device_id", DataType::Utf8),
        ])
        .unwrap();
        RecordBatch::new(
            schema,
            vec![
                vec![Value::Int64(1), "7G007R".into()],
                vec![Value::Int64(2), "7G007T".into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_filter() -> Result<()> {
        let failed = filter(&readings(), &Predicate::eq("status", "FAILED"))?;
        assert_eq!(failed.len(), 2);
        assert!(filter(&readings(), &Predicate::eq("plant", 1)).is_err());
        Ok(())
    }

    #[test]
    fn test_inner_join() -> Result<()> {
        let joined = inner_join(
            &plants(),
            &readings(),
            "device_id",
            "device_id",
            &[
                JoinColumn::left("plant_id"),
                JoinColumn::left("device_id"),
                JoinColumn::right("status"),
            ],
        )?;

        assert_eq!(joined.schema().column_names(), vec!["plant_id", "device_id", "status"]);
        assert_eq!(
            joined.into_rows(),
            vec![
                vec![Value::Int64(1), "7G007R".into(), "NOMINAL".into()],
                vec![Value::Int64(2), "7G007T".into(), "FAILED".into()],
                vec![Value::Int64(1), "7G007R".into(), "FAILED".into()],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_join_rejects_duplicate_output_columns() {
        let result = inner_join(
            &plants(),
            &readings(),
            "device_id",
            "device_id",
            &[JoinColumn::left("device_id"), JoinColumn::right("device_id")],
        );
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn test_group_count_sorted() -> Result<()> {
        let counts = group_count(&readings(), &["status"], "count")?;
        assert_eq!(
            counts.into_rows(),
            vec![
                vec!["FAILED".into(), Value::Int64(2)],
                vec!["NOMINAL".into(), Value::Int64(3)],
            ]
        );
        Ok(())
    }
}
