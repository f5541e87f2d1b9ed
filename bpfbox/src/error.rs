// bpfbox/src/error.rs

use std::fmt;
use std::io;

use crate::table::TableError;

/// Error type for bpfbox operations.
///
/// Lookup misses on the enforcement path are never errors; they fall
/// through to "allow". Only capacity exhaustion, loader misuse and the
/// ambient surfaces (config, traces, IO) produce one of these.
#[derive(Debug)]
pub enum BpfboxError {
    /// IO-related errors
    Io(io::Error),
    /// Invalid or unreadable engine configuration
    Config(String),
    /// A bounded table refused an insertion
    Capacity { table: &'static str, capacity: usize },
    /// The loader addressed a dispatch slot outside the table
    InvalidDispatchIndex { index: u32, limit: usize },
    /// Malformed replay trace
    Trace(String),
    /// Policy routine / profile manifest errors
    Policy(String),
    /// Signal delivery to a task failed
    Signal(String),
}

impl fmt::Display for BpfboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BpfboxError::Io(e) => write!(f, "IO error: {}", e),
            BpfboxError::Config(e) => write!(f, "Config error: {}", e),
            BpfboxError::Capacity { table, capacity } => {
                write!(f, "Capacity error: {} table is full (capacity {})", table, capacity)
            }
            BpfboxError::InvalidDispatchIndex { index, limit } => write!(
                f,
                "Dispatch error: index {} is outside the dispatch table (length {})",
                index, limit
            ),
            BpfboxError::Trace(e) => write!(f, "Trace error: {}", e),
            BpfboxError::Policy(e) => write!(f, "Policy error: {}", e),
            BpfboxError::Signal(e) => write!(f, "Signal error: {}", e),
        }
    }
}

impl std::error::Error for BpfboxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BpfboxError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BpfboxError {
    fn from(err: io::Error) -> Self {
        BpfboxError::Io(err)
    }
}

impl From<String> for BpfboxError {
    fn from(err: String) -> Self {
        BpfboxError::Policy(err)
    }
}

impl From<&str> for BpfboxError {
    fn from(err: &str) -> Self {
        BpfboxError::Policy(err.to_string())
    }
}

impl From<serde_yaml::Error> for BpfboxError {
    fn from(err: serde_yaml::Error) -> Self {
        BpfboxError::Config(format!("YAML parsing error: {}", err))
    }
}

impl From<serde_json::Error> for BpfboxError {
    fn from(err: serde_json::Error) -> Self {
        BpfboxError::Trace(format!("JSON error: {}", err))
    }
}

impl From<nix::Error> for BpfboxError {
    fn from(err: nix::Error) -> Self {
        BpfboxError::Signal(err.to_string())
    }
}

impl BpfboxError {
    /// Attach the table name to a low-level table failure.
    pub fn from_table(table: &'static str, err: TableError) -> Self {
        match err {
            TableError::CapacityExhausted { capacity } => BpfboxError::Capacity { table, capacity },
        }
    }
}

/// Result type for bpfbox operations
pub type Result<T> = std::result::Result<T, BpfboxError>;
