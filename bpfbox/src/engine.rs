//! Engine coordinator and event subscription interface
//!
//! `Bpfbox` owns the Process and Profile Tables, the dispatch table, the
//! event bus and the reporter, and wires them into the lifecycle tracker
//! and the open interceptor. Kernel-side events arrive through
//! [`EventHandler::handle`]; the external policy loader populates the
//! profile and dispatch tables through a [`PolicyLoader`].

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{BpfboxConfig, EnforcementMode};
use crate::dispatch::{DispatchTable, PolicyRoutine};
use crate::error::{BpfboxError, Result};
use crate::events::{EventBus, EventChannel};
use crate::intercept::{InterceptOutcome, OpenArgsSlot, OpenFlags, OpenInterceptor};
use crate::lifecycle::{LifecycleTracker, ProgramLoadOutcome};
use crate::logging::LogLevel;
use crate::process::{new_process_table, ProcessRecord, ProcessTable, TaskContext};
use crate::profile::{
    new_profile_table, ExecutableIdentity, ProfileKey, ProfileRecord, ProfileTable,
};
use crate::reporter::{EnforcementReporter, SignalTerminator, Terminator};

/// Events the engine subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KernelEvent {
    /// `sched_process_fork`
    ProcessCreate {
        parent_tid: u32,
        child_tid: u32,
        child_tgid: u32,
    },
    /// `sched_process_exec`
    ProgramLoad {
        tid: u32,
        executable: ExecutableIdentity,
    },
    /// `sched_process_exit`
    ProcessExit { tid: u32 },
    /// Entry of `do_filp_open`
    OpenEntry { task: TaskContext, flags: OpenFlags },
    /// Return of `do_filp_open`
    OpenExit { task: TaskContext },
}

/// What handling one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// A record was created for the child.
    Tracked(ProcessRecord),
    ProgramLoad(ProgramLoadOutcome),
    /// `true` if a record was removed.
    Exited(bool),
    /// `true` if the open arguments were captured.
    Captured(bool),
    Open(InterceptOutcome),
}

/// Subscriber interface for kernel events.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &KernelEvent) -> Result<HookOutcome>;
}

/// Table population interface for the external policy loader.
#[derive(Debug, Clone)]
pub struct PolicyLoader {
    profiles: Arc<ProfileTable>,
    dispatch: Arc<DispatchTable>,
}

impl PolicyLoader {
    pub fn new(profiles: Arc<ProfileTable>, dispatch: Arc<DispatchTable>) -> Self {
        Self { profiles, dispatch }
    }

    /// Insert or replace the profile at `key`.
    pub fn add_profile(&self, key: ProfileKey, tail_call_index: u32) -> Result<ProfileRecord> {
        if key.is_unconfined() {
            return Err(BpfboxError::Policy(
                "profile key 0 is reserved for unconfined processes".to_string(),
            ));
        }
        let limit = self.dispatch.len();
        if tail_call_index as usize >= limit {
            return Err(BpfboxError::InvalidDispatchIndex {
                index: tail_call_index,
                limit,
            });
        }

        let record = ProfileRecord {
            profile_key: key,
            tail_call_index,
        };
        self.profiles
            .update(key, record)
            .map_err(|e| BpfboxError::from_table(self.profiles.name(), e))?;
        policy_log!(
            LogLevel::Info,
            "Loaded profile {} at dispatch index {}",
            key,
            tail_call_index
        );
        Ok(record)
    }

    /// Add a profile for the executable at `path`, keyed the way the
    /// program-load hook will see it.
    pub fn add_profile_for_path(&self, path: &Path, tail_call_index: u32) -> Result<ProfileRecord> {
        let identity = ExecutableIdentity::from_path(path, true)?;
        log::debug!(
            "{} has device {:#x} inode {}",
            path.display(),
            identity.device,
            identity.inode
        );
        self.add_profile(identity.profile_key(), tail_call_index)
    }

    pub fn remove_profile(&self, key: ProfileKey) -> Option<ProfileRecord> {
        let removed = self.profiles.delete(&key);
        if removed.is_some() {
            policy_log!(LogLevel::Info, "Removed profile {}", key);
        }
        removed
    }

    pub fn register_routine(&self, index: u32, routine: Arc<dyn PolicyRoutine>) -> Result<()> {
        self.dispatch.register(index, routine)?;
        Ok(())
    }

    pub fn unregister_routine(&self, index: u32) -> Option<Arc<dyn PolicyRoutine>> {
        self.dispatch.unregister(index)
    }

    /// Register `routine` and then publish the profile pointing at it, so
    /// no process can be dispatched to an empty slot for this profile.
    pub fn install(
        &self,
        key: ProfileKey,
        tail_call_index: u32,
        routine: Arc<dyn PolicyRoutine>,
    ) -> Result<ProfileRecord> {
        self.register_routine(tail_call_index, routine)?;
        self.add_profile(key, tail_call_index)
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub processes: usize,
    pub profiles: usize,
    pub routines: usize,
    pub process_evictions: u64,
    pub profile_evictions: u64,
    pub denials: u64,
    pub dropped_enforcement: u64,
    pub dropped_would_have_enforced: u64,
}

/// The enforcement engine.
pub struct Bpfbox {
    config: BpfboxConfig,
    processes: Arc<ProcessTable>,
    profiles: Arc<ProfileTable>,
    dispatch: Arc<DispatchTable>,
    bus: Arc<EventBus>,
    reporter: Arc<EnforcementReporter>,
    tracker: LifecycleTracker,
    interceptor: OpenInterceptor,
}

impl Bpfbox {
    /// Build an engine that kills with `SIGKILL` in enforcing mode.
    pub fn new(config: BpfboxConfig) -> Result<Self> {
        Self::with_terminator(config, Arc::new(SignalTerminator))
    }

    pub fn with_terminator(config: BpfboxConfig, terminator: Arc<dyn Terminator>) -> Result<Self> {
        config.validate()?;

        let processes = Arc::new(new_process_table(config.max_processes, config.table_shards));
        let profiles = Arc::new(new_profile_table(config.max_profiles, config.table_shards));
        let dispatch = Arc::new(DispatchTable::new(config.max_profiles));
        let bus = Arc::new(EventBus::new(config.channel_capacity));
        let reporter = Arc::new(EnforcementReporter::new(
            config.mode,
            Arc::clone(&bus),
            terminator,
        ));

        let tracker = LifecycleTracker::new(Arc::clone(&processes), Arc::clone(&profiles));
        let slot = OpenArgsSlot::new(
            config.open_args_slot,
            config.max_processes,
            config.table_shards,
        );
        let interceptor = OpenInterceptor::new(
            Arc::clone(&processes),
            Arc::clone(&profiles),
            Arc::clone(&dispatch),
            Arc::clone(&reporter),
            slot,
        );

        log::info!(
            "bpfbox engine ready: mode={} processes={} profiles={} slot={:?}",
            config.mode,
            config.max_processes,
            config.max_profiles,
            config.open_args_slot
        );

        Ok(Self {
            config,
            processes,
            profiles,
            dispatch,
            bus,
            reporter,
            tracker,
            interceptor,
        })
    }

    pub fn config(&self) -> &BpfboxConfig {
        &self.config
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn reporter(&self) -> &EnforcementReporter {
        &self.reporter
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    pub fn interceptor(&self) -> &OpenInterceptor {
        &self.interceptor
    }

    /// Handle for the external policy loader.
    pub fn loader(&self) -> PolicyLoader {
        PolicyLoader::new(Arc::clone(&self.profiles), Arc::clone(&self.dispatch))
    }

    pub fn mode(&self) -> EnforcementMode {
        self.reporter.mode()
    }

    pub fn set_mode(&self, mode: EnforcementMode) {
        self.reporter.set_mode(mode);
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            processes: self.processes.len(),
            profiles: self.profiles.len(),
            routines: self.dispatch.registered(),
            process_evictions: self.processes.evictions(),
            profile_evictions: self.profiles.evictions(),
            denials: self.reporter.denials(),
            dropped_enforcement: self.bus.dropped(EventChannel::Enforcement),
            dropped_would_have_enforced: self.bus.dropped(EventChannel::WouldHaveEnforced),
        }
    }
}

impl EventHandler for Bpfbox {
    fn handle(&self, event: &KernelEvent) -> Result<HookOutcome> {
        let outcome = match event {
            KernelEvent::ProcessCreate {
                parent_tid,
                child_tid,
                child_tgid,
            } => HookOutcome::Tracked(self.tracker.on_process_create(
                *parent_tid,
                *child_tid,
                *child_tgid,
            )?),
            KernelEvent::ProgramLoad { tid, executable } => {
                HookOutcome::ProgramLoad(self.tracker.on_program_load(*tid, executable))
            }
            KernelEvent::ProcessExit { tid } => {
                HookOutcome::Exited(self.tracker.on_process_exit(*tid).is_some())
            }
            KernelEvent::OpenEntry { task, flags } => {
                HookOutcome::Captured(self.interceptor.on_entry(task, *flags))
            }
            KernelEvent::OpenExit { task } => HookOutcome::Open(self.interceptor.on_exit(task)),
        };
        Ok(outcome)
    }
}

impl std::fmt::Debug for Bpfbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bpfbox")
            .field("mode", &self.mode())
            .field("processes", &self.processes)
            .field("profiles", &self.profiles)
            .field("dispatch", &self.dispatch)
            .field("interceptor", &self.interceptor)
            .finish()
    }
}
