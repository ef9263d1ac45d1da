pub mod catalog;
pub mod config;
pub mod datafile;
pub mod encoding;
pub mod error;
pub mod expr;
pub mod ingest;
pub mod log;
pub mod pipeline;
pub mod record;
pub mod scheduler;
pub mod table;
pub mod transform;

pub use catalog::Catalog;
pub use config::{MaintenanceConfig, NoopCommitPolicy, TableConfig};
pub use error::{Error, Result};
pub use expr::{Assignment, Predicate};
pub use ingest::{read_batch, CsvOptions};
pub use pipeline::{CurationPipeline, PipelineInputs, PipelineReport, PipelineSpec};
pub use record::{DataType, Field, RecordBatch, Row, Schema, Value};
pub use scheduler::{BackgroundTask, Scheduler};
pub use table::{Snapshot, Table};
