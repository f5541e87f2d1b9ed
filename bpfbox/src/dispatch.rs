// bpfbox/src/dispatch.rs
//!
//! Indexed table of per-profile policy routines.
//!
//! The interceptor hands control to the routine registered at a profile's
//! `tail_call_index` and never looks at the result: the routine alone
//! decides, and on denial calls back into the reporter through
//! [`PolicyContext::deny`].

use std::sync::Arc;

use serde::Serialize;

use crate::config::EnforcementMode;
use crate::error::{BpfboxError, Result};
use crate::intercept::OpenFlags;
use crate::logging::LogLevel;
use crate::policy::FsAccess;
use crate::process::{ProcessRecord, ProcessTable, TaskContext};
use crate::profile::ProfileRecord;
use crate::reporter::EnforcementReporter;

/// A profile's compiled policy, loaded independently of the core.
pub trait PolicyRoutine: Send + Sync {
    /// Short name used in logs and replay output.
    fn name(&self) -> &str;

    /// Evaluate the intercepted call. Denials go through `ctx.deny()`.
    fn run(&self, ctx: &mut PolicyContext<'_>);
}

/// What a routine ended up doing with the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    Denied(EnforcementMode),
}

/// Everything a routine may see or touch while it runs.
pub struct PolicyContext<'a> {
    pub task: TaskContext,
    /// Snapshot of the caller's record taken at dispatch.
    pub process: ProcessRecord,
    pub profile: ProfileRecord,
    /// Arguments captured at call entry, if the capture survived.
    pub flags: Option<OpenFlags>,
    processes: &'a ProcessTable,
    reporter: &'a EnforcementReporter,
    verdict: Verdict,
}

impl<'a> PolicyContext<'a> {
    pub fn new(
        task: TaskContext,
        process: ProcessRecord,
        profile: ProfileRecord,
        flags: Option<OpenFlags>,
        processes: &'a ProcessTable,
        reporter: &'a EnforcementReporter,
    ) -> Self {
        Self {
            task,
            process,
            profile,
            flags,
            processes,
            reporter,
            verdict: Verdict::Allowed,
        }
    }

    /// Access requested by the captured call. Empty when nothing was captured.
    pub fn requested_access(&self) -> FsAccess {
        self.flags
            .map(|flags| flags.access())
            .unwrap_or_else(FsAccess::empty)
    }

    pub fn processes(&self) -> &ProcessTable {
        self.processes
    }

    /// Mark the calling process tainted. Returns false if its record has
    /// vanished since dispatch.
    pub fn taint(&mut self) -> bool {
        self.set_tainted(true)
    }

    pub fn clear_taint(&mut self) -> bool {
        self.set_tainted(false)
    }

    fn set_tainted(&mut self, tainted: bool) -> bool {
        let updated = self
            .processes
            .modify(&self.process.pid, |record| record.tainted = tainted)
            .is_some();
        if updated {
            self.process.tainted = tainted;
        }
        updated
    }

    /// Report a denial. In enforcing mode the calling thread is killed.
    pub fn deny(&mut self) -> EnforcementMode {
        let mode = self
            .reporter
            .enforce(&self.task, &self.process, &self.profile);
        self.verdict = Verdict::Denied(mode);
        mode
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }
}

type Slot = Option<Arc<dyn PolicyRoutine>>;

/// Fixed-length table of routines addressed by `tail_call_index`.
pub struct DispatchTable {
    slots: spin::RwLock<Vec<Slot>>,
}

impl DispatchTable {
    pub fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Self {
            slots: spin::RwLock::new(slots),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install `routine` at `index`, returning whatever was there before.
    pub fn register(
        &self,
        index: u32,
        routine: Arc<dyn PolicyRoutine>,
    ) -> Result<Option<Arc<dyn PolicyRoutine>>> {
        let mut slots = self.slots.write();
        let limit = slots.len();
        let slot = slots
            .get_mut(index as usize)
            .ok_or(BpfboxError::InvalidDispatchIndex { index, limit })?;
        policy_log!(
            LogLevel::Info,
            "Registered routine '{}' at dispatch index {}",
            routine.name(),
            index
        );
        Ok(slot.replace(routine))
    }

    pub fn unregister(&self, index: u32) -> Option<Arc<dyn PolicyRoutine>> {
        let removed = self
            .slots
            .write()
            .get_mut(index as usize)
            .and_then(Option::take);
        if let Some(routine) = &removed {
            policy_log!(
                LogLevel::Info,
                "Unregistered routine '{}' from dispatch index {}",
                routine.name(),
                index
            );
        }
        removed
    }

    /// Routine at `index`; `None` for empty or out-of-range slots.
    pub fn get(&self, index: u32) -> Option<Arc<dyn PolicyRoutine>> {
        self.slots.read().get(index as usize).cloned().flatten()
    }

    pub fn registered(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.is_some()).count()
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("len", &self.len())
            .field("registered", &self.registered())
            .finish()
    }
}
