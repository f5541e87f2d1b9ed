// bpfbox/src/intercept.rs
//!
//! Filesystem-open interceptor.
//!
//! Two hooks bracket one open call. Entry captures the open flags of a
//! tracked caller; exit resolves the caller's profile and dispatches to
//! the profile's routine. Any miss along the way lets the call through.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::OpenArgsSlotMode;
use crate::dispatch::{DispatchTable, PolicyContext, Verdict};
use crate::logging::LogLevel;
use crate::policy::FsAccess;
use crate::process::{ProcessTable, TaskContext};
use crate::profile::{ProfileKey, ProfileTable};
use crate::reporter::EnforcementReporter;
use crate::table::LruTable;

// Linux open(2) flag values.
const O_ACCMODE: i32 = 0o3;
const O_WRONLY: i32 = 0o1;
const O_RDWR: i32 = 0o2;
const O_TRUNC: i32 = 0o1000;
const O_APPEND: i32 = 0o2000;

/// Copy of the kernel's `struct open_flags` as seen by `do_filp_open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(C)]
pub struct OpenFlags {
    pub open_flag: i32,
    pub mode: u16,
    /// `MAY_*` bits the kernel will check.
    pub acc_mode: i32,
    pub intent: i32,
    pub lookup_flags: i32,
}

impl OpenFlags {
    /// Build the captured arguments of an `open(path, flags, mode)` call,
    /// deriving `acc_mode` the way the kernel does.
    pub fn for_open(open_flag: i32, mode: u16) -> Self {
        let mut access = match open_flag & O_ACCMODE {
            O_WRONLY => FsAccess::WRITE,
            O_RDWR => FsAccess::READ | FsAccess::WRITE,
            _ => FsAccess::READ,
        };
        if open_flag & O_TRUNC != 0 {
            access |= FsAccess::WRITE;
        }
        if open_flag & O_APPEND != 0 {
            access |= FsAccess::APPEND;
        }
        Self {
            open_flag,
            mode,
            acc_mode: access.bits() as i32,
            ..Self::default()
        }
    }

    /// Requested access, from the `MAY_*` bits.
    pub fn access(&self) -> FsAccess {
        FsAccess::from_bits_truncate(self.acc_mode as u32)
    }
}

/// Relay of captured arguments from the entry hook to the exit hook.
pub enum OpenArgsSlot {
    /// Keyed by calling thread. Bounded like the Process Table.
    PerThread(LruTable<u32, OpenFlags>),
    /// One slot for every caller on the machine. Concurrent opens can read
    /// each other's arguments; it is never cleared, so a later exit may
    /// also read a stale capture.
    Shared(spin::Mutex<Option<OpenFlags>>),
}

impl OpenArgsSlot {
    pub fn new(mode: OpenArgsSlotMode, capacity: usize, shards: usize) -> Self {
        match mode {
            OpenArgsSlotMode::PerThread => {
                OpenArgsSlot::PerThread(LruTable::new("open_args", capacity, shards))
            }
            OpenArgsSlotMode::Shared => OpenArgsSlot::Shared(spin::Mutex::new(None)),
        }
    }

    pub fn mode(&self) -> OpenArgsSlotMode {
        match self {
            OpenArgsSlot::PerThread(_) => OpenArgsSlotMode::PerThread,
            OpenArgsSlot::Shared(_) => OpenArgsSlotMode::Shared,
        }
    }

    /// Store `flags` for `tid`. Returns false if the capture was lost.
    pub fn capture(&self, tid: u32, flags: OpenFlags) -> bool {
        match self {
            OpenArgsSlot::PerThread(table) => table.update(tid, flags).is_ok(),
            OpenArgsSlot::Shared(slot) => {
                *slot.lock() = Some(flags);
                true
            }
        }
    }

    /// Fetch the arguments for `tid`'s exit. Per-thread captures are consumed.
    pub fn take(&self, tid: u32) -> Option<OpenFlags> {
        match self {
            OpenArgsSlot::PerThread(table) => table.delete(&tid),
            OpenArgsSlot::Shared(slot) => *slot.lock(),
        }
    }

    /// Captures waiting for their exit hook.
    pub fn pending(&self) -> usize {
        match self {
            OpenArgsSlot::PerThread(table) => table.len(),
            OpenArgsSlot::Shared(slot) => usize::from(slot.lock().is_some()),
        }
    }
}

impl std::fmt::Debug for OpenArgsSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenArgsSlot")
            .field("mode", &self.mode())
            .field("pending", &self.pending())
            .finish()
    }
}

/// What the exit hook did with a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InterceptOutcome {
    /// Caller is not tracked.
    PassThrough,
    /// Caller is tracked but carries no profile.
    Unconfined,
    /// Profile not in the Profile Table (never loaded, or evicted).
    ProfileMissing { profile_key: ProfileKey },
    /// Nothing registered at the profile's dispatch index.
    RoutineMissing { index: u32 },
    Dispatched { index: u32, verdict: Verdict },
}

impl InterceptOutcome {
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            InterceptOutcome::Dispatched {
                verdict: Verdict::Denied(_),
                ..
            }
        )
    }
}

/// Entry/exit hook pair on the kernel's open path.
pub struct OpenInterceptor {
    processes: Arc<ProcessTable>,
    profiles: Arc<ProfileTable>,
    dispatch: Arc<DispatchTable>,
    reporter: Arc<EnforcementReporter>,
    slot: OpenArgsSlot,
}

impl OpenInterceptor {
    pub fn new(
        processes: Arc<ProcessTable>,
        profiles: Arc<ProfileTable>,
        dispatch: Arc<DispatchTable>,
        reporter: Arc<EnforcementReporter>,
        slot: OpenArgsSlot,
    ) -> Self {
        Self {
            processes,
            profiles,
            dispatch,
            reporter,
            slot,
        }
    }

    pub fn slot(&self) -> &OpenArgsSlot {
        &self.slot
    }

    /// Entry hook. Returns true if the flags were captured.
    pub fn on_entry(&self, task: &TaskContext, flags: OpenFlags) -> bool {
        if self.processes.lookup(&task.tid).is_none() {
            return false;
        }
        let captured = self.slot.capture(task.tid, flags);
        if !captured {
            log::debug!("Open arguments of task {} not captured", task.tid);
        }
        captured
    }

    /// Exit hook. Resolves the caller's profile and runs its routine.
    pub fn on_exit(&self, task: &TaskContext) -> InterceptOutcome {
        // Always consume a per-thread capture so it cannot leak into the
        // next open of a recycled thread id.
        let flags = self.slot.take(task.tid);

        let process = match self.processes.lookup(&task.tid) {
            Some(process) => process,
            None => return InterceptOutcome::PassThrough,
        };
        if !process.is_confined() {
            return InterceptOutcome::Unconfined;
        }

        let profile = match self.profiles.lookup(&process.profile_key) {
            Some(profile) => profile,
            None => {
                log::debug!(
                    "Task {} confined by unknown profile {}, allowing",
                    task.tid,
                    process.profile_key
                );
                return InterceptOutcome::ProfileMissing {
                    profile_key: process.profile_key,
                };
            }
        };

        let index = profile.tail_call_index;
        let routine = match self.dispatch.get(index) {
            Some(routine) => routine,
            None => {
                log::debug!("No routine at dispatch index {}, allowing", index);
                return InterceptOutcome::RoutineMissing { index };
            }
        };

        let mut ctx = PolicyContext::new(
            *task,
            process,
            profile,
            flags,
            &self.processes,
            &self.reporter,
        );
        routine.run(&mut ctx);
        let verdict = ctx.verdict();

        log::trace!(
            "Task {} open under {} handled by '{}': {:?}",
            task.tid,
            process.profile_key,
            routine.name(),
            verdict
        );
        if let Verdict::Denied(mode) = verdict {
            enforce_log!(
                LogLevel::Debug,
                "Routine '{}' denied open by task {} ({})",
                routine.name(),
                task.tid,
                mode
            );
        }

        InterceptOutcome::Dispatched { index, verdict }
    }
}

impl std::fmt::Debug for OpenInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenInterceptor")
            .field("slot", &self.slot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_follows_open_flags() {
        assert_eq!(OpenFlags::for_open(0, 0).access(), FsAccess::READ);
        assert_eq!(OpenFlags::for_open(O_WRONLY, 0o644).access(), FsAccess::WRITE);
        assert_eq!(
            OpenFlags::for_open(O_RDWR | O_APPEND, 0).access(),
            FsAccess::READ | FsAccess::WRITE | FsAccess::APPEND
        );
        assert_eq!(OpenFlags::for_open(O_TRUNC, 0).access(), FsAccess::READ | FsAccess::WRITE);
    }

    #[test]
    fn per_thread_slot_is_consumed() {
        let slot = OpenArgsSlot::new(OpenArgsSlotMode::PerThread, 8, 1);
        let flags = OpenFlags::for_open(O_WRONLY, 0);
        assert!(slot.capture(7, flags));
        assert_eq!(slot.take(8), None);
        assert_eq!(slot.take(7), Some(flags));
        assert_eq!(slot.take(7), None);
    }

    #[test]
    fn shared_slot_keeps_last_capture() {
        let slot = OpenArgsSlot::new(OpenArgsSlotMode::Shared, 8, 1);
        let flags = OpenFlags::for_open(O_WRONLY, 0);
        assert!(slot.capture(7, flags));
        assert_eq!(slot.take(8), Some(flags));
        assert_eq!(slot.take(7), Some(flags));
        assert_eq!(slot.pending(), 1);
    }
}
