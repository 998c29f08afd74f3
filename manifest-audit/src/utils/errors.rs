//! Error types for manifest auditing.
//!
//! Only unrecoverable conditions live here. Recoverable line-level problems
//! (malformed lines, unparsable numbers, paths outside the base) are tallied
//! into run counters and never surface as errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read {source_name} at line {line}: {source}")]
    Read {
        source_name: String,
        line: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Worker failure: {0}")]
    WorkerFailure(String),

    #[error("Size total overflows 64 bits: {0}")]
    Overflow(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl AuditError {
    /// Attach the input name and line number to an I/O failure
    pub fn read(source_name: impl Into<String>, line: u64, source: std::io::Error) -> Self {
        AuditError::Read {
            source_name: source_name.into(),
            line,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
