use super::Table;
use crate::datafile::DATA_FILE_SUFFIX;
use crate::error::{Error, Result};
use crate::log::entry::now_millis;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::{Duration, UNIX_EPOCH};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VacuumResult {
    pub files_deleted: Vec<String>,
    pub bytes_freed: u64,
}

impl Table {
    /// Deletes data files that the latest version no longer references and
    /// that have been unreferenced for at least `retention`.
    ///
    /// Files removed by a commit age from that commit's timestamp. Files no
    /// commit ever added age from their modification time. Versions older
    /// than the retention window may become unreadable afterwards.
    ///
    /// Fails with [`Error::InvalidOperation`] when `retention` is shorter
    /// than `maintenance.min_vacuum_retention`; see [`Table::vacuum_unchecked`].
    pub fn vacuum(&self, retention: Duration) -> Result<VacuumResult> {
        let min = self.config.maintenance.min_vacuum_retention;
        if retention < min {
            return Err(Error::InvalidOperation(format!(
                "vacuum retention {:?} is below the minimum of {:?}",
                retention, min
            )));
        }
        self.vacuum_unchecked(retention)
    }

    /// Vacuum without the minimum retention check. Removed files may go as
    /// soon as `retention` allows, but files no commit references are still
    /// kept until they are `min_vacuum_retention` old, so in-flight writes
    /// are never deleted under their writer.
    pub fn vacuum_unchecked(&self, retention: Duration) -> Result<VacuumResult> {
        let latest = self.version()?;
        let snapshot = self.snapshot_at(latest)?;

        let mut removed_at: HashMap<String, u64> = HashMap::new();
        for entry in self.log.commits(0, latest)? {
            for path in entry.removed {
                removed_at.insert(path, entry.timestamp_ms);
            }
        }
        let live: HashSet<&str> = snapshot.files().map(|f| f.path.as_str()).collect();

        let now = now_millis();
        let retention_ms = retention.as_millis() as u64;
        let orphan_ms = retention
            .max(self.config.maintenance.min_vacuum_retention)
            .as_millis() as u64;
        let mut result = VacuumResult::default();

        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(DATA_FILE_SUFFIX) || live.contains(name.as_str()) {
                continue;
            }

            let metadata = entry.metadata()?;
            let (unreferenced_since, keep_ms) = match removed_at.get(&name) {
                Some(ts) => (*ts, retention_ms),
                None => {
                    let modified = metadata
                        .modified()?
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or_default();
                    (modified, orphan_ms)
                }
            };
            if now.saturating_sub(unreferenced_since) < keep_ms {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    result.bytes_freed += metadata.len();
                    result.files_deleted.push(name);
                }
                Err(e) => tracing::warn!(
                    table = %self.name,
                    file = %name,
                    error = %e,
                    "Failed to vacuum data file"
                ),
            }
        }

        result.files_deleted.sort();
        tracing::info!(
            table = %self.name,
            version = latest,
            files_deleted = result.files_deleted.len(),
            bytes_freed = result.bytes_freed,
            "Vacuum completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MaintenanceConfig, TableConfig};
    use crate::expr::Predicate;
    use crate::table::tests::sensor_batch;
    use tempfile::tempdir;

    #[test]
    fn test_vacuum_keeps_live_files() -> Result<()> {
        let dir = tempdir()?;
        let table = Table::create_as_select(
            dir.path().join("silver"),
            &sensor_batch(&[(1, "A", "NOMINAL"), (2, "B", "CORRUPTED")]),
            TableConfig::default(),
        )?;
        table.delete(&Predicate::eq("status", "CORRUPTED"))?;
        let before = table.scan()?.sorted_rows();

        // Recently removed files survive a long retention
        let result = table.vacuum(Duration::from_secs(3600))?;
        assert!(result.files_deleted.is_empty());
        assert_eq!(table.snapshot_at(0)?.scan()?.len(), 2);

        assert!(matches!(
            table.vacuum(Duration::ZERO),
            Err(Error::InvalidOperation(_))
        ));

        let result = table.vacuum_unchecked(Duration::ZERO)?;
        assert_eq!(result.files_deleted.len(), 1);
        assert!(result.bytes_freed > 0);

        assert_eq!(table.scan()?.sorted_rows(), before);
        assert!(table.snapshot_at(0)?.scan().is_err());
        Ok(())
    }

    #[test]
    fn test_vacuum_keeps_young_uncommitted_files() -> Result<()> {
        let dir = tempdir()?;
        let table = Table::create_as_select(
            dir.path().join("silver"),
            &sensor_batch(&[(1, "A", "NOMINAL")]),
            TableConfig::default(),
        )?;

        // Written but not yet committed, as by a concurrent writer
        let batch = sensor_batch(&[(9, "Z", "NOMINAL")]);
        let pending = table.write_rows(&batch.schema().clone(), batch.into_rows())?;

        let result = table.vacuum_unchecked(Duration::ZERO)?;
        assert!(result.files_deleted.is_empty());
        assert!(table.data_dir().join(&pending[0].path).exists());
        Ok(())
    }

    #[test]
    fn test_vacuum_removes_orphans() -> Result<()> {
        let dir = tempdir()?;
        let config = TableConfig::default().maintenance(
            MaintenanceConfig::default().min_vacuum_retention(Duration::ZERO),
        );
        let table = Table::create_as_select(
            dir.path().join("silver"),
            &sensor_batch(&[(1, "A", "NOMINAL")]),
            config,
        )?;

        let batch = sensor_batch(&[(9, "Z", "NOMINAL")]);
        let orphans = table.write_rows(&batch.schema().clone(), batch.into_rows())?;
        assert_eq!(orphans.len(), 1);

        let result = table.vacuum(Duration::ZERO)?;
        assert_eq!(result.files_deleted, vec![orphans[0].path.clone()]);
        assert_eq!(table.scan()?.len(), 1);
        Ok(())
    }
}
