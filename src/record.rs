//! Typed values, schemas and record batches.
//!
//! `Value` carries a total order (variant rank first, then value) so it can be
//! used for sorting and as a hash key. Predicates use [`Value::sql_cmp`]
//! instead, which compares integers and floats numerically and treats any
//! comparison involving `Null` as unknown.

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
}

impl DataType {
    /// Whether a value of type `from` can be stored in a column of this type.
    pub fn accepts(&self, from: DataType) -> bool {
        *self == from || (*self == DataType::Float64 && from == DataType::Int64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "boolean",
            DataType::Int64 => "bigint",
            DataType::Float64 => "double",
            DataType::Utf8 => "string",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Utf8(_) => Some(DataType::Utf8),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts this value for storage in a column of type `target`.
    pub fn coerce(self, target: DataType) -> Result<Value> {
        match (self, target) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Int64(v), DataType::Float64) => Ok(Value::Float64(v as f64)),
            (value, target) => match value.data_type() {
                Some(dt) if dt == target => Ok(value),
                _ => Err(Error::SchemaMismatch(format!(
                    "cannot store {} in a {} column",
                    value, target
                ))),
            },
        }
    }

    /// SQL comparison. `None` means the result is unknown: either side is
    /// null or the types are not comparable.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Utf8(a), Value::Utf8(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int64(_) => 2,
            Value::Float64(_) => 3,
            Value::Utf8(_) => 4,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Utf8(a), Value::Utf8(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Utf8(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Utf8(v) => write!(f, "'{}'", v.replace('\'', "''")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(Error::SchemaMismatch(format!(
                    "duplicate column {}",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Like `index_of`, failing with `SchemaMismatch` for unknown columns.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| Error::SchemaMismatch(format!("unknown column {}", name)))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Checks that `source` can be written into a table with this schema:
    /// the same column names (in any order) with storable types.
    pub fn check_compatible(&self, source: &Schema) -> Result<()> {
        self.check_columns(source, |_| false)
    }

    /// Like `check_compatible`, but a column for which `untyped` holds may
    /// have any type: it carries no values that could fail to convert.
    fn check_columns(&self, source: &Schema, untyped: impl Fn(&str) -> bool) -> Result<()> {
        if self.len() != source.len() {
            return Err(Error::SchemaMismatch(format!(
                "expected {} columns ({}), got {} ({})",
                self.len(),
                self.column_names().join(", "),
                source.len(),
                source.column_names().join(", ")
            )));
        }
        for field in &self.fields {
            let other = source.field(&field.name).ok_or_else(|| {
                Error::SchemaMismatch(format!("source is missing column {}", field.name))
            })?;
            if !field.data_type.accepts(other.data_type) && !untyped(&field.name) {
                return Err(Error::SchemaMismatch(format!(
                    "column {} is {} in the table but {} in the source",
                    field.name, field.data_type, other.data_type
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self
            .fields
            .iter()
            .map(|field| format!("{} {}", field.name, field.data_type))
            .collect();
        write!(f, "({})", cols.join(", "))
    }
}

/// An in-memory set of rows sharing a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    schema: Schema,
    rows: Vec<Row>,
}

impl RecordBatch {
    /// Builds a batch, checking arity, types and nullability of every row.
    pub fn new(schema: Schema, rows: Vec<Row>) -> Result<Self> {
        let mut checked = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != schema.len() {
                return Err(Error::SchemaMismatch(format!(
                    "row {} has {} values, schema has {} columns",
                    i,
                    row.len(),
                    schema.len()
                )));
            }
            let row = row
                .into_iter()
                .zip(&schema.fields)
                .map(|(value, field)| check_value(value, field))
                .collect::<Result<Row>>()?;
            checked.push(row);
        }
        Ok(Self {
            schema,
            rows: checked,
        })
    }

    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Wraps rows already known to match the schema (read back from data files).
    pub(crate) fn from_trusted(schema: Schema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column.
    pub fn column(&self, name: &str) -> Result<Vec<&Value>> {
        let idx = self.schema.require(name)?;
        Ok(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Column positions of `names`, failing for unknown columns.
    pub fn key_indices<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| self.schema.require(name.as_ref()))
            .collect()
    }

    pub fn project<S: AsRef<str>>(&self, names: &[S]) -> Result<RecordBatch> {
        let indices = self.key_indices(names)?;
        let fields = indices
            .iter()
            .map(|&i| self.schema.fields[i].clone())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(RecordBatch {
            schema: Schema::new(fields)?,
            rows,
        })
    }

    /// Reorders and widens columns to match `target`. A column that is null
    /// in every row aligns to any target type.
    pub fn align_to(&self, target: &Schema) -> Result<RecordBatch> {
        target.check_columns(&self.schema, |name| self.is_all_null(name))?;
        let mapping: Vec<usize> = target
            .fields
            .iter()
            .map(|f| self.schema.require(&f.name))
            .collect::<Result<_>>()?;

        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let aligned = mapping
                .iter()
                .zip(&target.fields)
                .map(|(&i, field)| check_value(row[i].clone(), field))
                .collect::<Result<Row>>()?;
            rows.push(aligned);
        }
        Ok(RecordBatch {
            schema: target.clone(),
            rows,
        })
    }

    fn is_all_null(&self, column: &str) -> bool {
        match self.schema.index_of(column) {
            Some(i) => self.rows.iter().all(|row| row[i].is_null()),
            None => false,
        }
    }

    /// Rows in total order, for layout-independent comparisons.
    pub fn sorted_rows(&self) -> Vec<Row> {
        let mut rows = self.rows.clone();
        rows.sort();
        rows
    }
}

fn check_value(value: Value, field: &Field) -> Result<Value> {
    if value.is_null() && !field.nullable {
        return Err(Error::SchemaMismatch(format!(
            "column {} is not nullable",
            field.name
        )));
    }
    value.coerce(field.data_type).map_err(|_| {
        Error::SchemaMismatch(format!(
            "column {} expects {}, got a different type",
            field.name, field.data_type
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64).not_null(),
            Field::new("device_id", DataType::Utf8),
            Field::new("reading_1", DataType::Float64),
        ])
        .unwrap()
    }

    #[test]
    fn test_batch_widens_integers() {
        let batch = RecordBatch::new(
            readings_schema(),
            vec![vec![1.into(), "7G007R".into(), 3.into()]],
        )
        .unwrap();
        assert_eq!(batch.rows()[0][2], Value::Float64(3.0));
    }

    #[test]
    fn test_batch_rejects_bad_rows() {
        let wrong_arity = RecordBatch::new(readings_schema(), vec![vec![1.into()]]);
        assert!(matches!(wrong_arity, Err(Error::SchemaMismatch(_))));

        let null_key = RecordBatch::new(
            readings_schema(),
            vec![vec![Value::Null, "x".into(), 1.0.into()]],
        );
        assert!(matches!(null_key, Err(Error::SchemaMismatch(_))));

        let wrong_type = RecordBatch::new(
            readings_schema(),
            vec![vec!["one".into(), "x".into(), 1.0.into()]],
        );
        assert!(matches!(wrong_type, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("id", DataType::Utf8),
        ]);
        assert!(matches!(schema, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn test_align_reorders_columns() {
        let source_schema = Schema::new(vec![
            Field::new("reading_1", DataType::Int64),
            Field::new("id", DataType::Int64),
            Field::new("device_id", DataType::Utf8),
        ])
        .unwrap();
        let source = RecordBatch::new(
            source_schema,
            vec![vec![7.into(), 1.into(), "7G007T".into()]],
        )
        .unwrap();

        let aligned = source.align_to(&readings_schema()).unwrap();
        assert_eq!(
            aligned.rows()[0],
            vec![Value::Int64(1), "7G007T".into(), Value::Float64(7.0)]
        );
    }

    #[test]
    fn test_all_null_column_aligns_to_any_type() {
        let source = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("device_id", DataType::Utf8),
            Field::new("reading_1", DataType::Utf8),
        ])
        .unwrap();
        let empty = RecordBatch::new(
            source.clone(),
            vec![vec![Value::Int64(1), "7G007T".into(), Value::Null]],
        )
        .unwrap();
        let aligned = empty.align_to(&readings_schema()).unwrap();
        assert_eq!(aligned.schema(), &readings_schema());
        assert_eq!(aligned.rows()[0][2], Value::Null);

        let typed = RecordBatch::new(
            source,
            vec![vec![Value::Int64(1), "7G007T".into(), "high".into()]],
        )
        .unwrap();
        assert!(matches!(
            typed.align_to(&readings_schema()),
            Err(Error::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_check_compatible_reports_missing_column() {
        let source = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("device", DataType::Utf8),
            Field::new("reading_1", DataType::Float64),
        ])
        .unwrap();
        let err = readings_schema().check_compatible(&source).unwrap_err();
        assert!(err.to_string().contains("device_id"));

        let narrowing = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("device_id", DataType::Utf8),
            Field::new("reading_1", DataType::Utf8),
        ])
        .unwrap();
        assert!(readings_schema().check_compatible(&narrowing).is_err());
    }

    #[test]
    fn test_value_ordering_and_sql_cmp() {
        let mut values = vec![
            Value::Utf8("b".into()),
            Value::Int64(2),
            Value::Null,
            Value::Float64(1.5),
            Value::Boolean(false),
        ];
        values.sort();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[4], Value::Utf8("b".into()));

        assert_eq!(
            Value::Int64(2).sql_cmp(&Value::Float64(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Null.sql_cmp(&Value::Null), None);
        assert_eq!(Value::Utf8("a".into()).sql_cmp(&Value::Int64(1)), None);
    }

    #[test]
    fn test_display_quotes_strings() {
        assert_eq!(Value::from("O'Neil").to_string(), "'O''Neil'");
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::from(Some(5i64)).to_string(), "5");
    }
}
