//! bpfbox: process confinement engine.
//!
//! Tracks processes across fork, exec and exit, binds each to the profile
//! of the executable it last loaded, and routes intercepted file opens to
//! that profile's policy routine. Denials are either enforced with
//! `SIGKILL` or only reported, depending on the engine mode.

#[macro_use]
pub mod logging;

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod intercept;
pub mod lifecycle;
pub mod policy;
pub mod process;
pub mod profile;
pub mod replay;
pub mod reporter;
pub mod table;

#[cfg(test)]
mod tests;

pub use config::{BpfboxConfig, EnforcementMode, OpenArgsSlotMode};
pub use dispatch::{DispatchTable, PolicyContext, PolicyRoutine, Verdict};
pub use engine::{Bpfbox, EngineStats, EventHandler, HookOutcome, KernelEvent, PolicyLoader};
pub use error::{BpfboxError, Result};
pub use events::{EnforcementEvent, EventBus, EventChannel};
pub use intercept::{InterceptOutcome, OpenFlags};
pub use process::{ProcessRecord, TaskContext};
pub use profile::{ExecutableIdentity, ProfileKey, ProfileRecord};
