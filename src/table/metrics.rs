use super::Table;
use crate::error::Result;

/// Point-in-time size statistics for a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMetrics {
    pub version: u64,
    pub files: usize,
    pub small_files: usize,
    pub rows: u64,
    pub bytes: u64,
}

/// Collect metrics from the latest snapshot and log them
pub fn collect_metrics(table: &Table) -> Result<TableMetrics> {
    let snapshot = table.snapshot()?;
    let metrics = TableMetrics {
        version: snapshot.version(),
        files: snapshot.file_count(),
        small_files: table.small_file_count(&snapshot),
        rows: snapshot.row_count(),
        bytes: snapshot.size_bytes(),
    };

    tracing::info!(
        table = %table.name(),
        version = metrics.version,
        files = metrics.files,
        small_files = metrics.small_files,
        rows = metrics.rows,
        bytes = metrics.bytes,
        "Table metrics"
    );

    Ok(metrics)
}
