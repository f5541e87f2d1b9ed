// bpfbox/src/replay.rs
//!
//! Offline replay of recorded kernel events.
//!
//! A trace lists the profiles to load and a sequence of events. Each event
//! is fed through a fresh engine whose terminator only records kills; a
//! recorded kill is followed by a synthesized exit for the killed task,
//! which is what the kernel would deliver next.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{BpfboxConfig, EnforcementMode};
use crate::engine::{Bpfbox, EngineStats, EventHandler, KernelEvent};
use crate::error::{BpfboxError, Result};
use crate::events::{EnforcementEvent, EventChannel};
use crate::intercept::OpenFlags;
use crate::policy::RoutineSpec;
use crate::process::TaskContext;
use crate::profile::{ExecutableIdentity, ProfileKey};
use crate::reporter::RecordingTerminator;

/// A profile to load before the events run.
///
/// Exactly one of `key`, `device`+`inode`, or `path` identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceProfile {
    #[serde(default)]
    pub key: Option<ProfileKey>,
    #[serde(default)]
    pub device: Option<u32>,
    #[serde(default)]
    pub inode: Option<u64>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    pub index: u32,
    pub routine: RoutineSpec,
}

impl TraceProfile {
    pub fn resolve_key(&self) -> Result<ProfileKey> {
        match (self.key, self.device, self.inode, &self.path) {
            (Some(key), None, None, None) => Ok(key),
            (None, Some(device), Some(inode), None) => {
                Ok(ExecutableIdentity::new(device, inode).profile_key())
            }
            (None, None, None, Some(path)) => {
                Ok(ExecutableIdentity::from_path(path, true)?.profile_key())
            }
            _ => Err(BpfboxError::Trace(format!(
                "profile at index {} needs exactly one of key, device+inode or path",
                self.index
            ))),
        }
    }
}

/// Shorthand for an entry/exit pair of one open call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCall {
    pub tid: u32,
    #[serde(default)]
    pub tgid: Option<u32>,
    /// `open(2)` flags
    #[serde(default)]
    pub flags: i32,
    #[serde(default)]
    pub mode: u16,
}

impl OpenCall {
    pub fn task(&self) -> TaskContext {
        TaskContext::new(self.tid, self.tgid.unwrap_or(self.tid))
    }
}

/// One step of a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceStep {
    Kernel(KernelEvent),
    Open { open: OpenCall },
    SetMode { set_mode: EnforcementMode },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub profiles: Vec<TraceProfile>,
    #[serde(default)]
    pub events: Vec<TraceStep>,
}

impl Trace {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            BpfboxError::Trace(msg) => {
                BpfboxError::Trace(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| BpfboxError::Trace(e.to_string()))
    }
}

/// An event as it came off an output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelEvent {
    pub channel: EventChannel,
    /// Index of the trace step that produced it.
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EnforcementEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub steps: usize,
    pub events: usize,
    pub killed: usize,
    /// Process-create events that could not be tracked.
    pub capacity_errors: usize,
    pub stats: EngineStats,
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub events: Vec<ChannelEvent>,
    pub killed: Vec<TaskContext>,
    pub summary: ReplaySummary,
}

/// Run `trace` through an engine built from `config`.
pub fn replay(trace: &Trace, config: BpfboxConfig) -> Result<ReplayReport> {
    let terminator = Arc::new(RecordingTerminator::new());
    let engine = Bpfbox::with_terminator(config, terminator.clone())?;
    let loader = engine.loader();

    for profile in &trace.profiles {
        let key = profile.resolve_key()?;
        loader.install(key, profile.index, profile.routine.build())?;
    }

    let mut events = Vec::new();
    let mut capacity_errors = 0;
    let mut reaped = 0;

    for (step, entry) in trace.events.iter().enumerate() {
        match entry {
            TraceStep::Kernel(event) => {
                feed(&engine, event, &mut capacity_errors)?;
            }
            TraceStep::Open { open } => {
                let task = open.task();
                let flags = OpenFlags::for_open(open.flags, open.mode);
                feed(&engine, &KernelEvent::OpenEntry { task, flags }, &mut capacity_errors)?;
                feed(&engine, &KernelEvent::OpenExit { task }, &mut capacity_errors)?;
            }
            TraceStep::SetMode { set_mode } => engine.set_mode(*set_mode),
        }

        let killed = terminator.killed();
        for task in &killed[reaped..] {
            feed(&engine, &KernelEvent::ProcessExit { tid: task.tid }, &mut capacity_errors)?;
        }
        reaped = killed.len();

        for channel in [EventChannel::Enforcement, EventChannel::WouldHaveEnforced] {
            let timestamp = Utc::now();
            events.extend(engine.bus().drain(channel).into_iter().map(|event| ChannelEvent {
                channel,
                step,
                timestamp,
                event,
            }));
        }
    }

    let killed = terminator.killed();
    let summary = ReplaySummary {
        steps: trace.events.len(),
        events: events.len(),
        killed: killed.len(),
        capacity_errors,
        stats: engine.stats(),
    };
    log::info!(
        "Replayed {} steps: {} events, {} kills",
        summary.steps,
        summary.events,
        summary.killed
    );

    Ok(ReplayReport {
        events,
        killed,
        summary,
    })
}

fn feed(engine: &Bpfbox, event: &KernelEvent, capacity_errors: &mut usize) -> Result<()> {
    match engine.handle(event) {
        Ok(outcome) => {
            log::trace!("{:?} -> {:?}", event, outcome);
            Ok(())
        }
        Err(BpfboxError::Capacity { table, capacity }) => {
            *capacity_errors += 1;
            log::warn!("{} table full (capacity {}), continuing", table, capacity);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
