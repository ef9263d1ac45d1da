//! Catalog - tables by name under one root directory
//!
//! Each table lives in `<root>/<name>/`. The catalog holds no state of its
//! own: a table exists exactly when its log has a version 0.

use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::log::LOG_DIR;
use crate::record::{RecordBatch, Schema};
use crate::table::Table;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub struct Catalog {
    root: PathBuf,
    config: TableConfig,
}

impl Catalog {
    /// Opens a catalog rooted at `root`, creating the directory if needed.
    /// Tables opened through the catalog use `config`.
    pub fn open(root: impl Into<PathBuf>, config: TableConfig) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    fn table_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let dir = self.table_dir(name)?;
        match Table::open(&dir, self.config.clone()) {
            Ok(_) => Ok(true),
            Err(Error::TableNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `CREATE TABLE name (schema)`
    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Table> {
        Table::create(self.table_dir(name)?, schema, self.config.clone())
    }

    /// `CREATE TABLE name AS SELECT ...`
    pub fn create_table_as(&self, name: &str, batch: &RecordBatch) -> Result<Table> {
        Table::create_as_select(self.table_dir(name)?, batch, self.config.clone())
    }

    /// `CREATE OR REPLACE TABLE name AS SELECT ...`: replaces content and
    /// schema of an existing table in a new version, keeping its history.
    pub fn create_or_replace(&self, name: &str, batch: &RecordBatch) -> Result<Table> {
        let dir = self.table_dir(name)?;
        match Table::create_as_select(&dir, batch, self.config.clone()) {
            Err(Error::TableExists(_)) => {
                let table = Table::open(&dir, self.config.clone())?;
                table.replace(batch)?;
                Ok(table)
            }
            other => other,
        }
    }

    pub fn open_table(&self, name: &str) -> Result<Table> {
        Table::open(self.table_dir(name)?, self.config.clone())
    }

    /// `DROP TABLE IF EXISTS name`: removes the table with all its history.
    /// Returns whether a table was dropped.
    pub fn drop_table(&self, name: &str) -> Result<bool> {
        let dir = self.table_dir(name)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(table = name, "Dropped table");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all tables, sorted.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(LOG_DIR).is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidOperation(format!(
            "invalid table name {:?}: use letters, digits and underscores",
            name
        )));
    }
    Ok(())
}
