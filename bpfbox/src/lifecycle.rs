// bpfbox/src/lifecycle.rs
//!
//! Process Lifecycle Tracker.
//!
//! Fork creates a record that inherits the parent's profile, exec moves a
//! tracked process onto a known profile, and exit deletes the record.
//! Untracked processes stay untracked: nothing here creates a record
//! outside of fork.

use std::sync::Arc;

use crate::error::{BpfboxError, Result};
use crate::logging::LogLevel;
use crate::process::{ProcessRecord, ProcessTable};
use crate::profile::{ExecutableIdentity, ProfileKey, ProfileTable};

/// Result of a program-load event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramLoadOutcome {
    /// The task has no record; nothing changed.
    Untracked,
    /// The executable matched a profile and the task now carries it.
    Confined(ProfileKey),
    /// No profile for the executable; the previous key was kept.
    Unchanged(ProfileKey),
}

#[derive(Debug)]
pub struct LifecycleTracker {
    processes: Arc<ProcessTable>,
    profiles: Arc<ProfileTable>,
}

impl LifecycleTracker {
    pub fn new(processes: Arc<ProcessTable>, profiles: Arc<ProfileTable>) -> Self {
        Self {
            processes,
            profiles,
        }
    }

    /// Track a freshly forked task.
    ///
    /// The child inherits the parent's profile key when the parent is
    /// tracked and starts unconfined otherwise. A full table that cannot
    /// take the record yields a capacity error; the child then stays
    /// untracked.
    pub fn on_process_create(
        &self,
        parent_tid: u32,
        child_tid: u32,
        child_tgid: u32,
    ) -> Result<ProcessRecord> {
        let inherited = self
            .processes
            .lookup(&parent_tid)
            .map(|parent| parent.profile_key)
            .unwrap_or(ProfileKey::UNCONFINED);

        let record = ProcessRecord {
            profile_key: inherited,
            ..ProcessRecord::new(child_tid, child_tgid)
        };

        match self.processes.update(child_tid, record) {
            Ok(Some(stale)) => {
                lifecycle_log!(
                    LogLevel::Debug,
                    "Replaced stale record for task {} (was {})",
                    child_tid,
                    stale.profile_key
                );
            }
            Ok(None) => {}
            Err(e) => {
                let err = BpfboxError::from_table(self.processes.name(), e);
                lifecycle_log!(
                    LogLevel::Warn,
                    "Task {} forked by {} is not tracked: {}",
                    child_tid,
                    parent_tid,
                    err
                );
                return Err(err);
            }
        }

        lifecycle_log!(
            LogLevel::Trace,
            "fork {} -> {} (tgid {}) profile {}",
            parent_tid,
            child_tid,
            child_tgid,
            inherited
        );
        Ok(record)
    }

    /// Re-confine a tracked task that loaded `executable`.
    pub fn on_program_load(&self, tid: u32, executable: &ExecutableIdentity) -> ProgramLoadOutcome {
        let current = match self.processes.lookup(&tid) {
            Some(process) => process.profile_key,
            None => return ProgramLoadOutcome::Untracked,
        };

        let key = executable.profile_key();
        if self.profiles.lookup(&key).is_none() {
            lifecycle_log!(
                LogLevel::Trace,
                "exec by task {}: no profile for {}, keeping {}",
                tid,
                key,
                current
            );
            return ProgramLoadOutcome::Unchanged(current);
        }

        match self
            .processes
            .modify(&tid, |process| process.profile_key = key)
        {
            Some(()) => {
                lifecycle_log!(
                    LogLevel::Debug,
                    "exec by task {}: confined by profile {}",
                    tid,
                    key
                );
                ProgramLoadOutcome::Confined(key)
            }
            // Evicted between the two table operations.
            None => ProgramLoadOutcome::Untracked,
        }
    }

    /// Forget an exiting task. Returns the removed record, if any.
    pub fn on_process_exit(&self, tid: u32) -> Option<ProcessRecord> {
        let removed = self.processes.delete(&tid);
        if removed.is_some() {
            lifecycle_log!(LogLevel::Trace, "exit of task {}", tid);
        }
        removed
    }
}
