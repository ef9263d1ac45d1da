//! Layered curation: raw → bronze/silver → gold.
//!
//! The pipeline only chains table operations; each step is its own atomic
//! commit on one table, and nothing spans tables. Derived tables are
//! recomputed from their sources on every run instead of being maintained
//! incrementally.
//!
//! 1. **Ingest**: the raw batch is loaded as-is into the bronze and silver
//!    tables (`DROP TABLE IF EXISTS` then `CREATE TABLE AS SELECT`).
//! 2. **Curate**: the silver table is corrected in place by a keyed merge of
//!    the backfill batch, then each configured delete and update.
//! 3. **Publish**: optionally cluster bronze, then join silver with the
//!    dimension table into the gold table and aggregate it into the gold
//!    aggregate table.

use crate::catalog::Catalog;
use crate::error::Result;
use crate::expr::{Assignment, Predicate};
use crate::record::RecordBatch;
use crate::table::{DeleteResult, MergeResult, OptimizeResult, UpdateResult};
use crate::transform::{self, JoinColumn};

use std::fmt;

/// Join of the dimension table (left) with the silver table (right).
#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub dimension_key: String,
    pub fact_key: String,
    pub columns: Vec<JoinColumn>,
}

#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub bronze_table: String,
    pub silver_table: String,
    pub dimension_table: String,
    pub gold_table: String,
    pub gold_agg_table: String,
    pub merge_keys: Vec<String>,
    pub deletes: Vec<Predicate>,
    pub updates: Vec<(Predicate, Vec<Assignment>)>,
    pub bronze_cluster_by: Vec<String>,
    pub join: JoinSpec,
    pub aggregate_keys: Vec<String>,
    pub count_column: String,
}

impl PipelineSpec {
    /// The IoT sensor readings flow: backfill merged on `id`, corrupted
    /// readings removed, a mistyped device id corrected, bronze clustered by
    /// device and status, and gold joined with the plant dimension.
    pub fn sensor_readings() -> Self {
        Self {
            bronze_table: "sensor_readings_historical_bronze".to_string(),
            silver_table: "sensor_readings_historical_silver".to_string(),
            dimension_table: "dim_plant".to_string(),
            gold_table: "sensor_readings_gold".to_string(),
            gold_agg_table: "sensor_readings_gold_agg".to_string(),
            merge_keys: vec!["id".to_string()],
            deletes: vec![Predicate::eq("device_operational_status", "CORRUPTED")],
            updates: vec![(
                Predicate::eq("device_id", "7G007TTTTT"),
                vec![Assignment::new("device_id", "7G007T")],
            )],
            bronze_cluster_by: vec![
                "device_id".to_string(),
                "device_operational_status".to_string(),
            ],
            join: JoinSpec {
                dimension_key: "device_id".to_string(),
                fact_key: "device_id".to_string(),
                columns: vec![
                    JoinColumn::left("plant_id"),
                    JoinColumn::left("device_id"),
                    JoinColumn::left("plant_type"),
                    JoinColumn::right("device_type"),
                    JoinColumn::right("device_operational_status"),
                    JoinColumn::right("reading_time"),
                    JoinColumn::right("reading_1"),
                    JoinColumn::right("reading_2"),
                    JoinColumn::right("reading_3"),
                ],
            },
            aggregate_keys: vec![
                "plant_id".to_string(),
                "plant_type".to_string(),
                "device_type".to_string(),
                "device_operational_status".to_string(),
            ],
            count_column: "count".to_string(),
        }
    }
}

/// The three batches a run consumes.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub raw: RecordBatch,
    pub backfill: RecordBatch,
    pub dimension: RecordBatch,
}

#[derive(Debug, Clone, Default)]
pub struct CurationReport {
    pub merge: MergeResult,
    pub deletes: Vec<DeleteResult>,
    pub updates: Vec<UpdateResult>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub name: String,
    pub version: u64,
    pub rows: u64,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub curation: CurationReport,
    pub optimize: Option<OptimizeResult>,
    pub tables: Vec<TableReport>,
}

impl PipelineReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.name == name)
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let merge = &self.curation.merge;
        writeln!(
            f,
            "merge: {} inserted, {} updated",
            merge.inserted, merge.updated
        )?;
        let deleted: u64 = self.curation.deletes.iter().map(|d| d.deleted).sum();
        let updated: u64 = self.curation.updates.iter().map(|u| u.updated).sum();
        writeln!(f, "delete: {} rows", deleted)?;
        writeln!(f, "update: {} rows", updated)?;
        if let Some(optimize) = &self.optimize {
            writeln!(
                f,
                "optimize: {} files -> {} files",
                optimize.files_removed, optimize.files_added
            )?;
        }
        for table in &self.tables {
            writeln!(
                f,
                "{}: version {}, {} rows",
                table.name, table.version, table.rows
            )?;
        }
        Ok(())
    }
}

pub struct CurationPipeline<'a> {
    catalog: &'a Catalog,
    spec: PipelineSpec,
}

impl<'a> CurationPipeline<'a> {
    pub fn new(catalog: &'a Catalog, spec: PipelineSpec) -> Self {
        Self { catalog, spec }
    }

    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Loads the raw batch into fresh bronze and silver tables.
    pub fn ingest(&self, raw: &RecordBatch) -> Result<()> {
        for name in [&self.spec.bronze_table, &self.spec.silver_table] {
            self.catalog.drop_table(name)?;
            self.catalog.create_table_as(name, raw)?;
        }
        tracing::info!(rows = raw.len(), "Ingested raw batch");
        Ok(())
    }

    /// Merges the backfill into silver, then applies the configured deletes
    /// and updates, each as its own commit.
    pub fn curate(&self, backfill: &RecordBatch) -> Result<CurationReport> {
        let silver = self.catalog.open_table(&self.spec.silver_table)?;

        let merge = silver
            .merge(backfill)
            .on(self.spec.merge_keys.iter().cloned())
            .when_matched_update_all()
            .when_not_matched_insert_all()
            .execute()?;
        tracing::info!(
            table = %self.spec.silver_table,
            inserted = merge.inserted,
            updated = merge.updated,
            "Merged backfill"
        );

        let mut report = CurationReport {
            merge,
            ..Default::default()
        };
        for predicate in &self.spec.deletes {
            let result = silver.delete(predicate)?;
            tracing::info!(predicate = %predicate, deleted = result.deleted, "Applied delete");
            report.deletes.push(result);
        }
        for (predicate, assignments) in &self.spec.updates {
            let result = silver.update(predicate, assignments)?;
            tracing::info!(predicate = %predicate, updated = result.updated, "Applied update");
            report.updates.push(result);
        }
        Ok(report)
    }

    /// Clusters the bronze table, if cluster columns are configured.
    pub fn optimize_bronze(&self) -> Result<Option<OptimizeResult>> {
        if self.spec.bronze_cluster_by.is_empty() {
            return Ok(None);
        }
        let bronze = self.catalog.open_table(&self.spec.bronze_table)?;
        bronze.optimize(&self.spec.bronze_cluster_by).map(Some)
    }

    /// Replaces the dimension table with `dimension`.
    pub fn load_dimension(&self, dimension: &RecordBatch) -> Result<()> {
        self.catalog
            .create_or_replace(&self.spec.dimension_table, dimension)?;
        Ok(())
    }

    /// Recomputes the gold and gold aggregate tables from silver and the
    /// dimension table.
    pub fn publish(&self) -> Result<()> {
        let silver = self.catalog.open_table(&self.spec.silver_table)?.scan()?;
        let dimension = self
            .catalog
            .open_table(&self.spec.dimension_table)?
            .scan()?;

        let join = &self.spec.join;
        let gold = transform::inner_join(
            &dimension,
            &silver,
            &join.dimension_key,
            &join.fact_key,
            &join.columns,
        )?;
        let gold_agg = transform::group_count(&gold, &self.spec.aggregate_keys, &self.spec.count_column)?;

        self.catalog.create_or_replace(&self.spec.gold_table, &gold)?;
        self.catalog
            .create_or_replace(&self.spec.gold_agg_table, &gold_agg)?;
        tracing::info!(
            gold_rows = gold.len(),
            gold_agg_rows = gold_agg.len(),
            "Published gold tables"
        );
        Ok(())
    }

    /// Runs every stage in order.
    pub fn run(&self, inputs: &PipelineInputs) -> Result<PipelineReport> {
        self.ingest(&inputs.raw)?;
        let curation = self.curate(&inputs.backfill)?;
        let optimize = self.optimize_bronze()?;
        self.load_dimension(&inputs.dimension)?;
        self.publish()?;

        let mut tables = Vec::new();
        for name in [
            &self.spec.bronze_table,
            &self.spec.silver_table,
            &self.spec.dimension_table,
            &self.spec.gold_table,
            &self.spec.gold_agg_table,
        ] {
            let snapshot = self.catalog.open_table(name)?.snapshot()?;
            tables.push(TableReport {
                name: name.clone(),
                version: snapshot.version(),
                rows: snapshot.row_count(),
            });
        }

        Ok(PipelineReport {
            curation,
            optimize,
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::record::{DataType, Field, Schema, Value};
    use tempfile::tempdir;

    fn readings_schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64).not_null(),
            Field::new("reading_time", DataType::Utf8),
            Field::new("device_type", DataType::Utf8),
            Field::new("device_id", DataType::Utf8),
            Field::new("device_operational_status", DataType::Utf8),
            Field::new("reading_1", DataType::Float64),
            Field::new("reading_2", DataType::Float64),
            Field::new("reading_3", DataType::Float64),
        ])
        .unwrap()
    }

    fn readings(rows: &[(i64, &str, &str, &str)]) -> RecordBatch {
        let rows = rows
            .iter()
            .map(|&(id, device_type, device_id, status)| {
                vec![
                    Value::Int64(id),
                    "2021-01-01 00:00:00".into(),
                    device_type.into(),
                    device_id.into(),
                    status.into(),
                    Value::Float64(1.0),
                    Value::Float64(2.0),
                    Value::Float64(3.0),
                ]
            })
            .collect();
        RecordBatch::new(readings_schema(), rows).unwrap()
    }

    fn inputs() -> PipelineInputs {
        let dim_schema = Schema::new(vec![
            Field::new("plant_id", DataType::Int64),
            Field::new("device_id", DataType::Utf8),
            Field::new("plant_type", DataType::Utf8),
        ])
        .unwrap();
        PipelineInputs {
            raw: readings(&[
                (1, "TRANSFORMER", "7G007R", "NOMINAL"),
                (2, "RECTIFIER", "7G007T", "CORRUPTED"),
                (3, "RECTIFIER", "7G007TTTTT", "NOMINAL"),
                (4, "TRANSFORMER", "6T2F0", "NOMINAL"),
            ]),
            backfill: readings(&[
                (1, "TRANSFORMER", "7G007R", "FAILED"),
                (5, "TRANSFORMER", "7G007R", "NOMINAL"),
            ]),
            dimension: RecordBatch::new(
                dim_schema,
                vec![
                    vec![Value::Int64(1), "7G007R".into(), "Substation".into()],
                    vec![Value::Int64(2), "7G007T".into(), "Rectifier Farm".into()],
                ],
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_sensor_pipeline() -> Result<()> {
        let dir = tempdir()?;
        let catalog = Catalog::open(dir.path(), TableConfig::default())?;
        let pipeline = CurationPipeline::new(&catalog, PipelineSpec::sensor_readings());

        let report = pipeline.run(&inputs())?;
        assert_eq!(report.curation.merge.inserted, 1);
        assert_eq!(report.curation.merge.updated, 1);
        assert_eq!(report.curation.deletes[0].deleted, 1);
        assert_eq!(report.curation.updates[0].updated, 1);

        let silver = report.table("sensor_readings_historical_silver").unwrap();
        assert_eq!((silver.version, silver.rows), (3, 4));
        assert_eq!(report.table("sensor_readings_historical_bronze").unwrap().rows, 4);

        // 6T2F0 has no plant, so it drops out of gold
        let gold = catalog.open_table("sensor_readings_gold")?.scan()?;
        assert_eq!(gold.len(), 3);
        assert_eq!(
            gold.schema().column_names(),
            vec![
                "plant_id",
                "device_id",
                "plant_type",
                "device_type",
                "device_operational_status",
                "reading_time",
                "reading_1",
                "reading_2",
                "reading_3",
            ]
        );
        assert!(gold
            .column("device_id")?
            .iter()
            .all(|v| v.as_str() != Some("7G007TTTTT")));

        let agg = catalog.open_table("sensor_readings_gold_agg")?.scan()?;
        assert_eq!(
            agg.sorted_rows(),
            vec![
                vec![
                    Value::Int64(1),
                    "Substation".into(),
                    "TRANSFORMER".into(),
                    "FAILED".into(),
                    Value::Int64(1)
                ],
                vec![
                    Value::Int64(1),
                    "Substation".into(),
                    "TRANSFORMER".into(),
                    "NOMINAL".into(),
                    Value::Int64(1)
                ],
                vec![
                    Value::Int64(2),
                    "Rectifier Farm".into(),
                    "RECTIFIER".into(),
                    "NOMINAL".into(),
                    Value::Int64(1)
                ],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_rerun_recreates_layers() -> Result<()> {
        let dir = tempdir()?;
        let catalog = Catalog::open(dir.path(), TableConfig::default())?;
        let pipeline = CurationPipeline::new(&catalog, PipelineSpec::sensor_readings());

        pipeline.run(&inputs())?;
        let report = pipeline.run(&inputs())?;

        // Bronze and silver start over, gold keeps its history
        assert_eq!(report.table("sensor_readings_historical_silver").unwrap().version, 3);
        let gold = report.table("sensor_readings_gold").unwrap();
        assert_eq!((gold.version, gold.rows), (1, 3));
        assert_eq!(report.table("dim_plant").unwrap().version, 1);
        Ok(())
    }

    #[test]
    fn test_duplicate_backfill_key_aborts_curation() -> Result<()> {
        let dir = tempdir()?;
        let catalog = Catalog::open(dir.path(), TableConfig::default())?;
        let pipeline = CurationPipeline::new(&catalog, PipelineSpec::sensor_readings());

        let mut bad = inputs();
        bad.backfill = readings(&[
            (1, "TRANSFORMER", "7G007R", "FAILED"),
            (1, "TRANSFORMER", "7G007R", "NOMINAL"),
        ]);
        let result = pipeline.run(&bad);
        assert!(matches!(result, Err(crate::error::Error::AmbiguousMatch(_))));

        let silver = catalog.open_table("sensor_readings_historical_silver")?;
        assert_eq!(silver.version()?, 0);
        Ok(())
    }
}
