//! Immutable data files.
//!
//! A data file holds a set of rows written once and never modified. Logical
//! changes to a table are made by writing new files and retiring old ones in
//! the transaction log.
//!
//! ## File Layout
//!
//! ```text
//! +----------------------+
//! | Header (64 bytes)    |  magic, format version, row count, column count
//! +----------------------+
//! | len:u32              |
//! | bincode(rows)        |
//! | crc32:u32            |
//! +----------------------+
//! ```
//!
//! Each file is described in the log by a [`FileMeta`] carrying per-column
//! min/max/null-count statistics. Scans, deletes, updates and merges use these
//! to skip files that cannot contain matching rows.

pub mod header;

use crate::encoding::{self, bincode};
use crate::error::{Error, Result};
use crate::record::{Row, Schema, Value};

use header::{DataFileHeader, HEADER_SIZE};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DATA_FILE_SUFFIX: &str = "lkd";

static FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub null_count: u64,
}

/// Log-side description of one data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    /// File name relative to the table's data directory
    pub path: String,
    pub size: u64,
    pub row_count: u64,
    pub stats: Vec<ColumnStats>,
}

impl FileMeta {
    pub fn column_stats(&self, column: &str) -> Option<&ColumnStats> {
        self.stats.iter().find(|s| s.column == column)
    }
}

/// Writes `rows` into as many files as needed to keep each under
/// `target_rows` rows. Returns nothing for an empty input.
pub fn write_data_files(
    dir: &Path,
    schema: &Schema,
    rows: Vec<Row>,
    target_rows: usize,
) -> Result<Vec<FileMeta>> {
    let target_rows = target_rows.max(1);
    let mut metas = Vec::with_capacity(rows.len().div_ceil(target_rows));
    let mut rows = rows.into_iter().peekable();

    while rows.peek().is_some() {
        let chunk: Vec<Row> = rows.by_ref().take(target_rows).collect();
        metas.push(write_data_file(dir, schema, &chunk)?);
    }

    Ok(metas)
}

/// Writes a single data file under a fresh name. The file is created
/// exclusively, so an existing file is never overwritten.
pub fn write_data_file(dir: &Path, schema: &Schema, rows: &[Row]) -> Result<FileMeta> {
    let header = DataFileHeader::new(rows.len() as u64, schema.len() as u32);
    let payload = bincode::serialize(&rows)?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + 8);
    buf.extend_from_slice(&header.encode()?);
    encoding::write_frame(&mut buf, &payload)?;

    let name = next_file_name();
    let path = dir.join(&name);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    file.write_all(&buf)?;
    file.sync_all()?;

    Ok(FileMeta {
        path: name,
        size: buf.len() as u64,
        row_count: rows.len() as u64,
        stats: compute_stats(schema, rows),
    })
}

/// Reads every row of a data file, validating its header and checksum.
pub fn read_data_file(path: &Path) -> Result<Vec<Row>> {
    let bytes = fs::read(path)?;
    let header = DataFileHeader::decode(&bytes)?;

    let mut cursor = Cursor::new(&bytes[HEADER_SIZE..]);
    let payload = encoding::read_frame(&mut cursor)?;
    let rows: Vec<Row> = bincode::deserialize(&payload)?;

    if rows.len() as u64 != header.row_count {
        return Err(Error::InvalidData(format!(
            "{}: header says {} rows, found {}",
            path.display(),
            header.row_count,
            rows.len()
        )));
    }
    Ok(rows)
}

fn compute_stats(schema: &Schema, rows: &[Row]) -> Vec<ColumnStats> {
    schema
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let mut stats = ColumnStats {
                column: field.name.clone(),
                min: None,
                max: None,
                null_count: 0,
            };
            for row in rows {
                let value = &row[i];
                if value.is_null() {
                    stats.null_count += 1;
                    continue;
                }
                if stats.min.as_ref().map_or(true, |min| value < min) {
                    stats.min = Some(value.clone());
                }
                if stats.max.as_ref().map_or(true, |max| value > max) {
                    stats.max = Some(value.clone());
                }
            }
            stats
        })
        .collect()
}

fn next_file_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seq = FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "part-{:016x}-{:08x}-{:06}.{}",
        nanos,
        std::process::id(),
        seq,
        DATA_FILE_SUFFIX
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DataType, Field};
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("status", DataType::Utf8),
        ])
        .unwrap()
    }

    fn rows(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let status = if i % 3 == 0 {
                    Value::Null
                } else {
                    Value::from(format!("S{}", i))
                };
                vec![Value::Int64(i), status]
            })
            .collect()
    }

    #[test]
    fn test_write_and_read_file() -> Result<()> {
        let dir = tempdir()?;
        let meta = write_data_file(dir.path(), &schema(), &rows(10))?;

        assert_eq!(meta.row_count, 10);
        assert_eq!(meta.size, fs::metadata(dir.path().join(&meta.path))?.len());
        assert_eq!(read_data_file(&dir.path().join(&meta.path))?, rows(10));

        let id_stats = meta.column_stats("id").unwrap();
        assert_eq!(id_stats.min, Some(Value::Int64(0)));
        assert_eq!(id_stats.max, Some(Value::Int64(9)));
        assert_eq!(id_stats.null_count, 0);

        let status_stats = meta.column_stats("status").unwrap();
        assert_eq!(status_stats.null_count, 4);
        assert_eq!(status_stats.min, Some(Value::from("S1")));
        assert_eq!(status_stats.max, Some(Value::from("S8")));
        Ok(())
    }

    #[test]
    fn test_write_splits_by_target_rows() -> Result<()> {
        let dir = tempdir()?;
        let metas = write_data_files(dir.path(), &schema(), rows(25), 10)?;
        let counts: Vec<u64> = metas.iter().map(|m| m.row_count).collect();
        assert_eq!(counts, vec![10, 10, 5]);

        let names: std::collections::HashSet<_> = metas.iter().map(|m| &m.path).collect();
        assert_eq!(names.len(), 3, "file names must be unique");

        assert!(write_data_files(dir.path(), &schema(), Vec::new(), 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_corrupted_file_detected() -> Result<()> {
        let dir = tempdir()?;
        let meta = write_data_file(dir.path(), &schema(), &rows(5))?;
        let path = dir.path().join(&meta.path);

        let mut bytes = fs::read(&path)?;
        let mid = HEADER_SIZE + 10;
        bytes[mid] ^= 0xFF;
        fs::write(&path, &bytes)?;

        match read_data_file(&path) {
            Err(Error::InvalidData(msg)) => assert!(msg.contains("Checksum")),
            other => panic!("expected checksum error, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_truncated_file_detected() -> Result<()> {
        let dir = tempdir()?;
        let meta = write_data_file(dir.path(), &schema(), &rows(5))?;
        let path = dir.path().join(&meta.path);

        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(HEADER_SIZE as u64 + 3)?;

        assert!(matches!(read_data_file(&path), Err(Error::InvalidData(_))));
        Ok(())
    }
}
