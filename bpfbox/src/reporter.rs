// bpfbox/src/reporter.rs
//!
//! Enforcement Reporter: the terminal action of a policy routine that
//! decided to deny.
//!
//! The mode is read exactly once per invocation, so even while an operator
//! flips it at runtime every denial produces one event on exactly one
//! channel: `enforcement` after a kill, `would_have_enforced` otherwise.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::config::EnforcementMode;
use crate::error::{BpfboxError, Result};
use crate::events::{EnforcementEvent, EventBus, EventChannel};
use crate::logging::LogLevel;
use crate::process::{ProcessRecord, TaskContext};
use crate::profile::ProfileRecord;

/// Delivers the terminating signal to an offending thread.
pub trait Terminator: Send + Sync {
    fn terminate(&self, task: &TaskContext) -> Result<()>;
}

/// Sends `SIGKILL` to the task. The whole thread group dies with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalTerminator;

impl Terminator for SignalTerminator {
    fn terminate(&self, task: &TaskContext) -> Result<()> {
        let tid = i32::try_from(task.tid)
            .map_err(|_| BpfboxError::Signal(format!("task id {} out of range", task.tid)))?;
        kill(Pid::from_raw(tid), Signal::SIGKILL)?;
        Ok(())
    }
}

/// Records kill targets instead of signalling. Used for replays and tests.
#[derive(Debug, Default)]
pub struct RecordingTerminator {
    killed: spin::Mutex<Vec<TaskContext>>,
}

impl RecordingTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks that would have received `SIGKILL`, in order.
    pub fn killed(&self) -> Vec<TaskContext> {
        self.killed.lock().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, task: &TaskContext) -> Result<()> {
        self.killed.lock().push(*task);
        Ok(())
    }
}

const MODE_ENFORCING: u8 = 0;
const MODE_AUDIT: u8 = 1;

fn encode_mode(mode: EnforcementMode) -> u8 {
    match mode {
        EnforcementMode::Enforcing => MODE_ENFORCING,
        EnforcementMode::Audit => MODE_AUDIT,
    }
}

/// Kill-or-report sink invoked by policy routines on denial.
pub struct EnforcementReporter {
    mode: AtomicU8,
    bus: Arc<EventBus>,
    terminator: Arc<dyn Terminator>,
    denials: AtomicU64,
}

impl EnforcementReporter {
    pub fn new(mode: EnforcementMode, bus: Arc<EventBus>, terminator: Arc<dyn Terminator>) -> Self {
        Self {
            mode: AtomicU8::new(encode_mode(mode)),
            bus,
            terminator,
            denials: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> EnforcementMode {
        match self.mode.load(Ordering::Acquire) {
            MODE_ENFORCING => EnforcementMode::Enforcing,
            _ => EnforcementMode::Audit,
        }
    }

    /// Switch between enforcing and audit-only for all later denials.
    pub fn set_mode(&self, mode: EnforcementMode) {
        let previous = self.mode.swap(encode_mode(mode), Ordering::AcqRel);
        if previous != encode_mode(mode) {
            enforce_log!(LogLevel::Warn, "Enforcement mode switched to {}", mode);
        }
    }

    /// Denial decisions reported since creation.
    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::Relaxed)
    }

    /// Act on a denial by `task` running under `process`/`profile`.
    /// Returns the mode the denial was handled in.
    pub fn enforce(
        &self,
        task: &TaskContext,
        process: &ProcessRecord,
        profile: &ProfileRecord,
    ) -> EnforcementMode {
        let mode = self.mode();
        self.denials.fetch_add(1, Ordering::Relaxed);

        let event = EnforcementEvent {
            pid: process.pid,
            tid: task.tid,
            profile_key: process.profile_key,
        };

        let channel = match mode {
            EnforcementMode::Enforcing => {
                if let Err(e) = self.terminator.terminate(task) {
                    enforce_log!(LogLevel::Error, "Failed to signal task {}: {}", task.tid, e);
                }
                EventChannel::Enforcement
            }
            EnforcementMode::Audit => EventChannel::WouldHaveEnforced,
        };

        policy_log!(
            LogLevel::Warn,
            "{} pid={} tid={} profile={} routine={}",
            match mode {
                EnforcementMode::Enforcing => "ENFORCE",
                EnforcementMode::Audit => "AUDIT",
            },
            event.pid,
            event.tid,
            event.profile_key,
            profile.tail_call_index
        );

        if !self.bus.submit(channel, event) {
            enforce_log!(LogLevel::Debug, "{} channel full, dropped {}", channel, event);
        }
        mode
    }
}

impl std::fmt::Debug for EnforcementReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcementReporter")
            .field("mode", &self.mode())
            .field("denials", &self.denials())
            .finish()
    }
}
