use std::{sync::Arc, time::Duration};

use crate::{
    error::{Error, Result},
    scheduler::{BackgroundTask, Context},
    table::{collect_metrics, Table},
};

/// Runs blocking table work off the async runtime.
async fn run_blocking<T, F>(table: &Arc<Table>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Table) -> Result<T> + Send + 'static,
{
    let table = table.clone();
    tokio::task::spawn_blocking(move || f(&table))
        .await
        .map_err(|e| Error::InvalidState(format!("Task join error: {}", e)))?
}

pub struct OptimizeTask {
    table: Arc<Table>,
}

impl OptimizeTask {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for OptimizeTask {
    fn name(&self) -> &'static str {
        "optimize"
    }

    fn interval(&self) -> Duration {
        self.table.config().maintenance.optimize_interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        run_blocking(&self.table, |table| {
            let maintenance = &table.config().maintenance;
            let snapshot = table.snapshot()?;
            if table.small_file_count(&snapshot) < maintenance.small_file_threshold.max(1) {
                return Ok(());
            }
            table.optimize(&maintenance.cluster_by)?;
            Ok(())
        })
        .await
    }
}

pub struct VacuumTask {
    table: Arc<Table>,
}

impl VacuumTask {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for VacuumTask {
    fn name(&self) -> &'static str {
        "vacuum"
    }

    fn interval(&self) -> Duration {
        self.table.config().maintenance.vacuum_interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        run_blocking(&self.table, |table| {
            table.vacuum(table.config().maintenance.vacuum_retention)?;
            Ok(())
        })
        .await
    }
}

pub struct MetricsTask {
    table: Arc<Table>,
}

impl MetricsTask {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for MetricsTask {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn interval(&self) -> Duration {
        self.table.config().maintenance.metrics_interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        run_blocking(&self.table, |table| collect_metrics(table).map(|_| ())).await
    }
}
