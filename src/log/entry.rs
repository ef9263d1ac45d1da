use crate::datafile::FileMeta;
use crate::record::Schema;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    Append,
    Overwrite,
}

/// The logical operation that produced a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    CreateTable {
        schema: Schema,
        as_select: bool,
    },

    /// Plain insert. An overwrite may carry a replacement schema.
    Write {
        mode: WriteMode,
        schema: Option<Schema>,
    },

    Merge {
        match_keys: Vec<String>,
        matched: Option<String>,
        not_matched: Option<String>,
        /// True when the merge inserts rows for unmatched keys
        inserts: bool,
    },

    Delete {
        predicate: String,
    },

    Update {
        predicate: String,
        assignments: Vec<String>,
    },

    Optimize {
        cluster_by: Vec<String>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateTable {
                as_select: false, ..
            } => "CREATE TABLE",
            Operation::CreateTable {
                as_select: true, ..
            } => "CREATE TABLE AS SELECT",
            Operation::Write { .. } => "WRITE",
            Operation::Merge { .. } => "MERGE",
            Operation::Delete { .. } => "DELETE",
            Operation::Update { .. } => "UPDATE",
            Operation::Optimize { .. } => "OPTIMIZE",
        }
    }

    /// False for operations that rearrange files without changing rows.
    pub fn data_change(&self) -> bool {
        !matches!(self, Operation::Optimize { .. })
    }

    /// True when the commit replaces the whole table state or its schema.
    pub fn replaces_table(&self) -> bool {
        matches!(
            self,
            Operation::CreateTable { .. }
                | Operation::Write {
                    mode: WriteMode::Overwrite,
                    ..
                }
        )
    }

    /// True for merges that insert rows keyed by business identity.
    pub fn inserts_by_key(&self) -> bool {
        matches!(self, Operation::Merge { inserts: true, .. })
    }

    /// Schema installed by this operation, if any.
    pub fn schema(&self) -> Option<&Schema> {
        match self {
            Operation::CreateTable { schema, .. } => Some(schema),
            Operation::Write { schema, .. } => schema.as_ref(),
            _ => None,
        }
    }

    /// Operation parameters as rendered in history.
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        match self {
            Operation::CreateTable { schema, .. } => vec![("schema", schema.to_string())],
            Operation::Write { mode, schema } => {
                let mut params = vec![("mode", format!("{:?}", mode))];
                if let Some(schema) = schema {
                    params.push(("schema", schema.to_string()));
                }
                params
            }
            Operation::Merge {
                match_keys,
                matched,
                not_matched,
                ..
            } => {
                let mut params = vec![("on", match_keys.join(", "))];
                if let Some(action) = matched {
                    params.push(("matched", action.clone()));
                }
                if let Some(action) = not_matched {
                    params.push(("notMatched", action.clone()));
                }
                params
            }
            Operation::Delete { predicate } => vec![("predicate", predicate.clone())],
            Operation::Update {
                predicate,
                assignments,
            } => vec![
                ("predicate", predicate.clone()),
                ("set", assignments.join(", ")),
            ],
            Operation::Optimize { cluster_by } if cluster_by.is_empty() => Vec::new(),
            Operation::Optimize { cluster_by } => vec![("zOrderBy", cluster_by.join(", "))],
        }
    }
}

/// One committed version of a table. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub version: u64,
    pub timestamp_ms: u64,
    /// Version the writer planned against. None for table creation.
    pub read_version: Option<u64>,
    pub operation: Operation,
    pub added: Vec<FileMeta>,
    pub removed: Vec<String>,
    pub metrics: BTreeMap<String, u64>,
}

impl CommitEntry {
    pub fn new(version: u64, read_version: Option<u64>, operation: Operation) -> Self {
        Self {
            version,
            timestamp_ms: now_millis(),
            read_version,
            operation,
            added: Vec::new(),
            removed: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_files(mut self, added: Vec<FileMeta>, removed: Vec<String>) -> Self {
        self.added = added;
        self.removed = removed;
        self
    }

    pub fn with_metric(mut self, name: &str, value: u64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// True if this commit added at least one file carrying new or changed rows.
    pub fn adds_data(&self) -> bool {
        self.operation.data_change() && !self.added.is_empty()
    }
}

/// Folded table state at a version, written periodically so readers need not
/// replay the whole log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u64,
    pub timestamp_ms: u64,
    pub schema: Schema,
    pub files: Vec<FileMeta>,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Renders entries oldest first, one block per version.
pub fn render_history(entries: &[CommitEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "version {} | {} | {}",
            entry.version, entry.timestamp_ms, entry.operation.name()
        );
        for (key, value) in entry.operation.parameters() {
            let _ = writeln!(out, "  {}: {}", key, value);
        }
        let _ = writeln!(
            out,
            "  files: +{} -{}",
            entry.added.len(),
            entry.removed.len()
        );
        if !entry.metrics.is_empty() {
            let metrics: Vec<String> = entry
                .metrics
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            let _ = writeln!(out, "  metrics: {}", metrics.join(", "));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DataType, Field};

    fn schema() -> Schema {
        Schema::new(vec![Field::new("id", DataType::Int64)]).unwrap()
    }

    #[test]
    fn test_operation_classification() {
        let create = Operation::CreateTable {
            schema: schema(),
            as_select: false,
        };
        assert!(create.replaces_table());
        assert!(create.data_change());
        assert_eq!(create.schema(), Some(&schema()));

        let optimize = Operation::Optimize {
            cluster_by: vec!["id".to_string()],
        };
        assert!(!optimize.data_change());
        assert!(!optimize.replaces_table());

        let append = Operation::Write {
            mode: WriteMode::Append,
            schema: None,
        };
        assert!(!append.replaces_table());
        let overwrite = Operation::Write {
            mode: WriteMode::Overwrite,
            schema: None,
        };
        assert!(overwrite.replaces_table());

        let upsert = Operation::Merge {
            match_keys: vec!["id".to_string()],
            matched: Some("UPDATE SET *".to_string()),
            not_matched: Some("INSERT *".to_string()),
            inserts: true,
        };
        assert!(upsert.inserts_by_key());
        assert_eq!(upsert.name(), "MERGE");
    }

    #[test]
    fn test_render_history() {
        let entries = vec![
            CommitEntry::new(
                0,
                None,
                Operation::CreateTable {
                    schema: schema(),
                    as_select: true,
                },
            )
            .with_metric("numOutputRows", 2),
            CommitEntry::new(
                1,
                Some(0),
                Operation::Delete {
                    predicate: "device_operational_status = 'CORRUPTED'".to_string(),
                },
            )
            .with_files(Vec::new(), vec!["part-1.lkd".to_string()]),
        ];

        let text = render_history(&entries);
        assert!(text.contains("version 0"));
        assert!(text.contains("CREATE TABLE AS SELECT"));
        assert!(text.contains("numOutputRows=2"));
        assert!(text.contains("version 1"));
        assert!(text.contains("DELETE"));
        assert!(text.contains("predicate: device_operational_status = 'CORRUPTED'"));
        assert!(text.contains("files: +0 -1"));
    }
}
