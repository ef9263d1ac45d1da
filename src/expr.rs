//! Row predicates and column assignments for delete, update and scans.
//!
//! Evaluation is three-valued: a comparison against `NULL` is unknown, and a
//! row only matches when the predicate is definitely true.

use crate::datafile::FileMeta;
use crate::error::{Error, Result};
use crate::record::{Row, Schema, Value};

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::NotEq => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::LtEq => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::GtEq => ord != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    Compare {
        column: String,
        op: CmpOp,
        value: Value,
    },
    IsNull(String),
    IsNotNull(String),
    In(String, Vec<Value>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    fn compare(column: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::Eq, value)
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::NotEq, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::Lt, value)
    }

    pub fn lt_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::LtEq, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::Gt, value)
    }

    pub fn gt_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::GtEq, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Predicate::IsNotNull(column.into())
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Columns referenced by this predicate.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::True => {}
            Predicate::Compare { column, .. }
            | Predicate::IsNull(column)
            | Predicate::IsNotNull(column)
            | Predicate::In(column, _) => out.push(column),
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Predicate::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Fails with `SchemaMismatch` if the predicate names an unknown column.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for column in self.columns() {
            schema.require(column)?;
        }
        Ok(())
    }

    /// True only if the predicate definitely holds for `row`.
    pub fn matches(&self, schema: &Schema, row: &Row) -> Result<bool> {
        Ok(self.eval(schema, row)? == Some(true))
    }

    fn eval(&self, schema: &Schema, row: &Row) -> Result<Option<bool>> {
        Ok(match self {
            Predicate::True => Some(true),
            Predicate::Compare { column, op, value } => {
                lookup(schema, row, column)?.sql_cmp(value).map(|ord| op.holds(ord))
            }
            Predicate::IsNull(column) => Some(lookup(schema, row, column)?.is_null()),
            Predicate::IsNotNull(column) => Some(!lookup(schema, row, column)?.is_null()),
            Predicate::In(column, values) => {
                let v = lookup(schema, row, column)?;
                if v.is_null() {
                    None
                } else if values
                    .iter()
                    .any(|candidate| v.sql_cmp(candidate) == Some(Ordering::Equal))
                {
                    Some(true)
                } else if values.iter().any(Value::is_null) {
                    None
                } else {
                    Some(false)
                }
            }
            Predicate::And(a, b) => match (a.eval(schema, row)?, b.eval(schema, row)?) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Predicate::Or(a, b) => match (a.eval(schema, row)?, b.eval(schema, row)?) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Predicate::Not(inner) => inner.eval(schema, row)?.map(|b| !b),
        })
    }

    /// Whether a file could contain a matching row, judged from its column
    /// statistics. Never returns false for a file that holds a match.
    pub fn may_match(&self, file: &FileMeta) -> bool {
        match self {
            Predicate::True => file.row_count > 0,
            Predicate::Compare { column, op, value } => {
                let Some(stats) = file.column_stats(column) else {
                    return true;
                };
                let (Some(min), Some(max)) = (&stats.min, &stats.max) else {
                    // Only nulls: no comparison can be true.
                    return stats.null_count < file.row_count;
                };
                let (Some(lo), Some(hi)) = (min.sql_cmp(value), max.sql_cmp(value)) else {
                    return true;
                };
                match op {
                    CmpOp::Eq => lo != Ordering::Greater && hi != Ordering::Less,
                    CmpOp::NotEq => !(lo == Ordering::Equal && hi == Ordering::Equal),
                    CmpOp::Lt => lo == Ordering::Less,
                    CmpOp::LtEq => lo != Ordering::Greater,
                    CmpOp::Gt => hi == Ordering::Greater,
                    CmpOp::GtEq => hi != Ordering::Less,
                }
            }
            Predicate::IsNull(column) => file
                .column_stats(column)
                .map_or(true, |stats| stats.null_count > 0),
            Predicate::IsNotNull(column) => file
                .column_stats(column)
                .map_or(true, |stats| stats.null_count < file.row_count),
            Predicate::In(column, values) => values
                .iter()
                .any(|v| Predicate::eq(column.clone(), v.clone()).may_match(file)),
            Predicate::And(a, b) => a.may_match(file) && b.may_match(file),
            Predicate::Or(a, b) => a.may_match(file) || b.may_match(file),
            Predicate::Not(_) => true,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("true"),
            Predicate::Compare { column, op, value } => {
                write!(f, "{} {} {}", column, op.symbol(), value)
            }
            Predicate::IsNull(column) => write!(f, "{} IS NULL", column),
            Predicate::IsNotNull(column) => write!(f, "{} IS NOT NULL", column),
            Predicate::In(column, values) => {
                let list: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{} IN ({})", column, list.join(", "))
            }
            Predicate::And(a, b) => write!(f, "({} AND {})", a, b),
            Predicate::Or(a, b) => write!(f, "({} OR {})", a, b),
            Predicate::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}

fn lookup<'r>(schema: &Schema, row: &'r Row, column: &str) -> Result<&'r Value> {
    Ok(&row[schema.require(column)?])
}

/// `SET column = value`
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Value,
}

impl Assignment {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.column, self.value)
    }
}

/// Assignments resolved to column positions and coerced to column types.
pub(crate) fn bind_assignments(
    schema: &Schema,
    assignments: &[Assignment],
) -> Result<Vec<(usize, Value)>> {
    if assignments.is_empty() {
        return Err(Error::InvalidOperation(
            "update requires at least one assignment".to_string(),
        ));
    }
    assignments
        .iter()
        .map(|a| {
            let idx = schema.require(&a.column)?;
            let field = &schema.fields[idx];
            if a.value.is_null() && !field.nullable {
                return Err(Error::SchemaMismatch(format!(
                    "column {} is not nullable",
                    field.name
                )));
            }
            Ok((idx, a.value.clone().coerce(field.data_type)?))
        })
        .collect()
}
