//! lakelog command line
//!
//! Usage:
//!   lakelog run --root DIR --raw F --backfill F --dim F
//!   lakelog history --root DIR --table T
//!   lakelog show --root DIR --table T [--version V]
//!   lakelog optimize --root DIR --table T [--cluster-by a,b]
//!   lakelog vacuum --root DIR --table T [--retention-secs N] [--force]
//!   lakelog maintain --root DIR --table T --duration-secs N

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lakelog::log::render_history;
use lakelog::table::tasks::{MetricsTask, OptimizeTask, VacuumTask};
use lakelog::{
    read_batch, Catalog, CsvOptions, CurationPipeline, PipelineInputs, PipelineSpec, Scheduler,
    TableConfig,
};

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Transactional tables over an append-only version log")]
struct Cli {
    /// Directory holding one subdirectory per table
    #[arg(long, global = true, default_value = "./lake", env = "LAKELOG_ROOT")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sensor readings curation pipeline
    Run {
        #[arg(long)]
        raw: PathBuf,
        #[arg(long)]
        backfill: PathBuf,
        #[arg(long)]
        dim: PathBuf,
    },
    /// Print the commit history of a table
    History {
        #[arg(long)]
        table: String,
    },
    /// Print the rows of a table, optionally as of an older version
    Show {
        #[arg(long)]
        table: String,
        #[arg(long)]
        version: Option<u64>,
    },
    /// Compact small files, or cluster by the given columns
    Optimize {
        #[arg(long)]
        table: String,
        #[arg(long, value_delimiter = ',')]
        cluster_by: Vec<String>,
    },
    /// Delete files no longer referenced by versions within the retention
    Vacuum {
        #[arg(long)]
        table: String,
        #[arg(long, default_value_t = 7 * 24 * 60 * 60)]
        retention_secs: u64,
        /// Accept a retention below the configured minimum
        #[arg(long)]
        force: bool,
    },
    /// Run background optimize, vacuum and metrics tasks for a while
    Maintain {
        #[arg(long)]
        table: String,
        #[arg(long, default_value_t = 60)]
        duration_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Cli { root, command } = Cli::parse();
    let catalog = Catalog::open(&root, TableConfig::default())?;

    match command {
        Command::Run { raw, backfill, dim } => {
            let options = CsvOptions::default();
            let inputs = PipelineInputs {
                raw: read_batch(&raw, &options)?,
                backfill: read_batch(&backfill, &options)?,
                dimension: read_batch(&dim, &options)?,
            };
            let pipeline = CurationPipeline::new(&catalog, PipelineSpec::sensor_readings());
            let report = pipeline.run(&inputs)?;
            print!("{}", report);
        }

        Command::History { table } => {
            let table = catalog.open_table(&table)?;
            print!("{}", render_history(&table.history()?));
        }

        Command::Show { table, version } => {
            let table = catalog.open_table(&table)?;
            let snapshot = match version {
                Some(v) => table.snapshot_at(v)?,
                None => table.snapshot()?,
            };
            let batch = snapshot.scan()?;
            println!("-- {} @ version {}", table.name(), snapshot.version());
            println!("{}", batch.schema().column_names().join("\t"));
            for row in batch.rows() {
                let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                println!("{}", cells.join("\t"));
            }
        }

        Command::Optimize { table, cluster_by } => {
            let table = catalog.open_table(&table)?;
            let result = table.optimize(&cluster_by)?;
            match result.version {
                Some(v) => println!(
                    "version {}: {} files -> {} files ({} rows)",
                    v, result.files_removed, result.files_added, result.rows
                ),
                None => println!("nothing to optimize"),
            }
        }

        Command::Vacuum {
            table,
            retention_secs,
            force,
        } => {
            let table = catalog.open_table(&table)?;
            let retention = Duration::from_secs(retention_secs);
            let result = if force {
                table.vacuum_unchecked(retention)?
            } else {
                table.vacuum(retention)?
            };
            println!(
                "deleted {} files, {} bytes",
                result.files_deleted.len(),
                result.bytes_freed
            );
        }

        Command::Maintain {
            table,
            duration_secs,
        } => {
            let table = Arc::new(catalog.open_table(&table)?);
            let scheduler = Scheduler::new();
            scheduler
                .register(Arc::new(OptimizeTask::new(table.clone())))
                .register(Arc::new(VacuumTask::new(table.clone())))
                .register(Arc::new(MetricsTask::new(table)));

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted");
                }
            }
            scheduler.shutdown().await?;
        }
    }

    Ok(())
}
