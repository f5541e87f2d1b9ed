//! Bounded key/record tables shared by every hook.
//!
//! Both the Process Table and the Profile Table are [`LruTable`]s: fixed
//! capacity, safe to use from many threads at once, and silently evicting
//! the least-recently-used record when an insert would overflow a shard.
//! Callers must treat a vanished record exactly like one that was never
//! there.

pub mod lru;

pub use lru::LruTable;

use std::fmt;

/// Failure of a bounded table operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// The table cannot hold any record for this key, even after eviction.
    CapacityExhausted { capacity: usize },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::CapacityExhausted { capacity } => {
                write!(f, "table capacity exhausted (capacity {})", capacity)
            }
        }
    }
}

impl std::error::Error for TableError {}
