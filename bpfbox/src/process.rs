// bpfbox/src/process.rs

use serde::{Deserialize, Serialize};

use crate::profile::ProfileKey;
use crate::table::LruTable;

/// Identity of the thread on whose behalf a hook runs.
///
/// `tid` is the kernel task id (what the kernel calls `pid`), `tgid` is the
/// thread-group id userspace knows as the process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskContext {
    pub tid: u32,
    pub tgid: u32,
}

impl TaskContext {
    pub const fn new(tid: u32, tgid: u32) -> Self {
        Self { tid, tgid }
    }

    /// Context of a single-threaded process.
    pub const fn single(pid: u32) -> Self {
        Self { tid: pid, tgid: pid }
    }

    /// Context of the calling OS thread.
    pub fn current() -> Self {
        let tid = nix::unistd::gettid().as_raw();
        let tgid = nix::unistd::getpid().as_raw();
        // Kernel ids are always positive.
        Self {
            tid: tid.unsigned_abs(),
            tgid: tgid.unsigned_abs(),
        }
    }
}

/// Confinement state of one tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Task id the record is keyed by.
    pub pid: u32,
    pub tgid: u32,
    /// Thread id; equals `pid` since records are keyed per task.
    pub tid: u32,
    pub profile_key: ProfileKey,
    /// Set and consumed by policy routines only.
    pub tainted: bool,
}

impl ProcessRecord {
    /// Fresh, unconfined, untainted record for a newly created task.
    pub const fn new(pid: u32, tgid: u32) -> Self {
        Self {
            pid,
            tgid,
            tid: pid,
            profile_key: ProfileKey::UNCONFINED,
            tainted: false,
        }
    }

    pub const fn is_confined(&self) -> bool {
        !self.profile_key.is_unconfined()
    }
}

/// Tracked tasks keyed by task id.
pub type ProcessTable = LruTable<u32, ProcessRecord>;

pub fn new_process_table(capacity: usize, shards: usize) -> ProcessTable {
    LruTable::new("process", capacity, shards)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_task_belongs_to_this_process() {
        let task = TaskContext::current();
        assert_eq!(task.tgid, std::process::id());
        assert_ne!(task.tid, 0);
    }

    #[test]
    fn new_record_is_unconfined() {
        let record = ProcessRecord::new(42, 40);
        assert_eq!(record.tid, 42);
        assert!(!record.is_confined());
        assert!(!record.tainted);
    }
}
