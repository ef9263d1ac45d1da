use std::time::Duration;

/// What to do when an operation finds nothing to change: an empty merge
/// source, or a delete/update whose predicate matches no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoopCommitPolicy {
    /// Commit a version with no added or removed files, keeping an audit trail.
    Commit,
    /// Return without committing.
    Skip,
}

/// Configuration for a transactional table
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Maximum rows per data file written by any operation (default: 10_000)
    pub target_file_rows: usize,

    /// Minimum number of small files before a non-clustering optimize
    /// rewrites anything (default: 2)
    pub min_files_to_compact: usize,

    /// Attempts a writer makes before giving up on conflicts (default: 10)
    pub max_commit_retries: u32,

    /// Base sleep between attempts, multiplied by the attempt number (default: 10ms)
    pub retry_backoff: Duration,

    /// Write a checkpoint every this many versions, 0 disables (default: 10)
    pub checkpoint_interval: u64,

    /// Behaviour for operations that change nothing (default: Commit)
    pub noop_commit_policy: NoopCommitPolicy,

    /// Background maintenance configuration
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often to check for optimize opportunities (default: 60s)
    pub optimize_interval: Duration,

    /// How often to vacuum unreferenced files (default: 1h)
    pub vacuum_interval: Duration,

    /// How often to log table metrics (default: 30s)
    pub metrics_interval: Duration,

    /// Number of small files that triggers a background optimize (default: 8)
    pub small_file_threshold: usize,

    /// How long removed files are kept for readers of older versions (default: 7 days)
    pub vacuum_retention: Duration,

    /// Shortest retention `vacuum` accepts. Files no commit references are
    /// never deleted before they are this old, since a writer may still be
    /// about to commit them (default: 1h)
    pub min_vacuum_retention: Duration,

    /// Columns the background optimize clusters by (default: none)
    pub cluster_by: Vec<String>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            optimize_interval: Duration::from_secs(60),
            vacuum_interval: Duration::from_secs(60 * 60),
            metrics_interval: Duration::from_secs(30),
            small_file_threshold: 8,
            vacuum_retention: Duration::from_secs(7 * 24 * 60 * 60),
            min_vacuum_retention: Duration::from_secs(60 * 60),
            cluster_by: Vec::new(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            target_file_rows: 10_000,
            min_files_to_compact: 2,
            max_commit_retries: 10,
            retry_backoff: Duration::from_millis(10),
            checkpoint_interval: 10,
            noop_commit_policy: NoopCommitPolicy::Commit,
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl TableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum rows per data file
    pub fn target_file_rows(mut self, rows: usize) -> Self {
        self.target_file_rows = rows.max(1);
        self
    }

    /// Set the minimum number of small files compacted at once
    pub fn min_files_to_compact(mut self, count: usize) -> Self {
        self.min_files_to_compact = count;
        self
    }

    /// Set the maximum number of commit attempts
    pub fn max_commit_retries(mut self, retries: u32) -> Self {
        self.max_commit_retries = retries.max(1);
        self
    }

    /// Set the base retry backoff
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set checkpoint interval in versions
    pub fn checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Set the policy for operations that change nothing
    pub fn noop_commit_policy(mut self, policy: NoopCommitPolicy) -> Self {
        self.noop_commit_policy = policy;
        self
    }

    /// Configure background maintenance
    pub fn maintenance(mut self, config: MaintenanceConfig) -> Self {
        self.maintenance = config;
        self
    }
}

impl MaintenanceConfig {
    /// Set optimize check interval
    pub fn optimize_interval(mut self, interval: Duration) -> Self {
        self.optimize_interval = interval;
        self
    }

    /// Set vacuum interval
    pub fn vacuum_interval(mut self, interval: Duration) -> Self {
        self.vacuum_interval = interval;
        self
    }

    /// Set metrics interval
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Set the small file count that triggers a background optimize
    pub fn small_file_threshold(mut self, threshold: usize) -> Self {
        self.small_file_threshold = threshold;
        self
    }

    /// Set vacuum retention
    pub fn vacuum_retention(mut self, retention: Duration) -> Self {
        self.vacuum_retention = retention;
        self
    }

    /// Set the shortest retention vacuum accepts
    pub fn min_vacuum_retention(mut self, retention: Duration) -> Self {
        self.min_vacuum_retention = retention;
        self
    }

    /// Set clustering columns for background optimize
    pub fn cluster_by<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.cluster_by = columns.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TableConfig::default();
        assert_eq!(config.target_file_rows, 10_000);
        assert_eq!(config.min_files_to_compact, 2);
        assert_eq!(config.max_commit_retries, 10);
        assert_eq!(config.retry_backoff, Duration::from_millis(10));
        assert_eq!(config.checkpoint_interval, 10);
        assert_eq!(config.noop_commit_policy, NoopCommitPolicy::Commit);

        assert_eq!(config.maintenance.small_file_threshold, 8);
        assert_eq!(config.maintenance.optimize_interval, Duration::from_secs(60));
        assert_eq!(
            config.maintenance.min_vacuum_retention,
            Duration::from_secs(60 * 60)
        );
        assert!(config.maintenance.cluster_by.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = TableConfig::new()
            .target_file_rows(0)
            .min_files_to_compact(4)
            .max_commit_retries(3)
            .retry_backoff(Duration::from_millis(1))
            .checkpoint_interval(0)
            .noop_commit_policy(NoopCommitPolicy::Skip)
            .maintenance(
                MaintenanceConfig::default()
                    .optimize_interval(Duration::from_millis(500))
                    .vacuum_retention(Duration::from_secs(5))
                    .min_vacuum_retention(Duration::from_secs(1))
                    .small_file_threshold(2)
                    .cluster_by(["device_id", "status"]),
            );

        // Clamped to at least one row per file
        assert_eq!(config.target_file_rows, 1);
        assert_eq!(config.min_files_to_compact, 4);
        assert_eq!(config.max_commit_retries, 3);
        assert_eq!(config.checkpoint_interval, 0);
        assert_eq!(config.noop_commit_policy, NoopCommitPolicy::Skip);

        assert_eq!(
            config.maintenance.optimize_interval,
            Duration::from_millis(500)
        );
        assert_eq!(config.maintenance.vacuum_retention, Duration::from_secs(5));
        assert_eq!(config.maintenance.min_vacuum_retention, Duration::from_secs(1));
        assert_eq!(config.maintenance.small_file_threshold, 2);
        assert_eq!(config.maintenance.cluster_by, vec!["device_id", "status"]);
    }
}
