//! Delimited text ingestion.
//!
//! Reads header-described delimited files into a [`RecordBatch`]. Fields may
//! be quoted with `"`; a doubled quote inside a quoted field is a literal
//! quote, and quoted fields may span lines. Empty fields are null.
//!
//! Without a declared schema, each column gets the narrowest type that fits
//! every non-empty value, trying `Int64`, then `Float64`, then `Boolean`,
//! then falling back to `Utf8`.

use crate::error::{Error, Result};
use crate::record::{DataType, Field, RecordBatch, Row, Schema, Value};

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: char,
    /// First record holds column names (default: true)
    pub has_header: bool,
    /// Declared schema; inferred from the data when None
    pub schema: Option<Schema>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_header: true,
            schema: None,
        }
    }
}

impl CsvOptions {
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn has_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// Reads the file at `path` into a batch.
pub fn read_batch(path: impl AsRef<Path>, options: &CsvOptions) -> Result<RecordBatch> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let batch = parse_batch(BufReader::new(file), options)?;
    tracing::debug!(
        path = %path.display(),
        rows = batch.len(),
        schema = %batch.schema(),
        "Read batch"
    );
    Ok(batch)
}

/// A record and the line it started on.
type RawRecord = (usize, Vec<Option<String>>);

pub fn parse_batch<R: BufRead>(reader: R, options: &CsvOptions) -> Result<RecordBatch> {
    let mut records = read_records(reader, options.delimiter)?.into_iter();

    let header = if options.has_header {
        match records.next() {
            Some((_, fields)) => Some(
                fields
                    .into_iter()
                    .map(|f| f.unwrap_or_default())
                    .collect::<Vec<String>>(),
            ),
            None => None,
        }
    } else {
        None
    };
    let records: Vec<RawRecord> = records.collect();

    let width = match (&options.schema, &header, records.first()) {
        (Some(schema), _, _) => schema.len(),
        (None, Some(names), _) => names.len(),
        (None, None, Some((_, fields))) => fields.len(),
        (None, None, None) => 0,
    };
    if let Some(names) = &header {
        if names.len() != width {
            return Err(Error::Parse {
                line: 1,
                msg: format!("header has {} columns, schema has {}", names.len(), width),
            });
        }
    }
    for (line, fields) in &records {
        if fields.len() != width {
            return Err(Error::Parse {
                line: *line,
                msg: format!("expected {} fields, found {}", width, fields.len()),
            });
        }
    }

    let schema = match &options.schema {
        Some(schema) => schema.clone(),
        None => {
            let names: Vec<String> =
                header.unwrap_or_else(|| (0..width).map(|i| format!("_c{}", i)).collect());
            let fields = names
                .into_iter()
                .enumerate()
                .map(|(i, name)| Field::new(name, infer_type(&records, i)))
                .collect();
            Schema::new(fields)?
        }
    };

    let rows = records
        .into_iter()
        .map(|(line, fields)| {
            fields
                .into_iter()
                .zip(&schema.fields)
                .map(|(raw, field)| convert(raw, field, line))
                .collect::<Result<Row>>()
        })
        .collect::<Result<Vec<Row>>>()?;

    RecordBatch::new(schema, rows)
}

/// Splits input into records, honouring quotes across line breaks.
fn read_records<R: BufRead>(reader: R, delimiter: char) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    let mut fields: Vec<Option<String>> = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut start_line = 0;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = line.strip_suffix('\r').unwrap_or(&line);

        if in_quotes {
            field.push('\n');
        } else {
            if line.is_empty() {
                continue;
            }
            start_line = line_no;
        }

        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if in_quotes {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else {
                    field.push(c);
                }
            } else if c == '"' && field.is_empty() && !quoted {
                in_quotes = true;
                quoted = true;
            } else if c == delimiter {
                fields.push(finish_field(&mut field, &mut quoted));
            } else {
                field.push(c);
            }
        }

        if !in_quotes {
            fields.push(finish_field(&mut field, &mut quoted));
            records.push((start_line, std::mem::take(&mut fields)));
        }
    }

    if in_quotes {
        return Err(Error::Parse {
            line: start_line,
            msg: "unterminated quoted field".to_string(),
        });
    }
    Ok(records)
}

fn finish_field(field: &mut String, quoted: &mut bool) -> Option<String> {
    *quoted = false;
    // A quoted empty field is null too
    let value = std::mem::take(field);
    (!value.is_empty()).then_some(value)
}

fn infer_type(records: &[RawRecord], column: usize) -> DataType {
    let mut values = records
        .iter()
        .filter_map(|(_, fields)| fields[column].as_deref())
        .peekable();
    if values.peek().is_none() {
        return DataType::Utf8;
    }
    let values: Vec<&str> = values.collect();

    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        DataType::Int64
    } else if values.iter().all(|v| v.parse::<f64>().is_ok()) {
        DataType::Float64
    } else if values.iter().all(|v| parse_bool(v).is_some()) {
        DataType::Boolean
    } else {
        DataType::Utf8
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn convert(raw: Option<String>, field: &Field, line: usize) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let invalid = || Error::Parse {
        line,
        msg: format!("invalid {} value {:?} for column {}", field.data_type, raw, field.name),
    };
    Ok(match field.data_type {
        DataType::Int64 => Value::Int64(raw.parse().map_err(|_| invalid())?),
        DataType::Float64 => Value::Float64(raw.parse().map_err(|_| invalid())?),
        DataType::Boolean => Value::Boolean(parse_bool(&raw).ok_or_else(invalid)?),
        DataType::Utf8 => Value::Utf8(raw),
    })
}
