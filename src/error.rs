use std::io;
use std::sync::PoisonError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Another writer advanced the table past the base version in a way that
    /// invalidates this commit. Recoverable by replanning from a new snapshot.
    #[error("Commit conflict: table moved from version {base} to {current}: {reason}")]
    Conflict {
        base: u64,
        current: u64,
        reason: String,
    },

    #[error("Commit retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Ambiguous merge: source contains duplicate key {0}")]
    AmbiguousMatch(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Version {0} not found")]
    VersionNotFound(u64),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Parse error at line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Mutex was poisoned")]
    MutexPoisoned,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::MutexPoisoned
    }
}
