// bpfbox/src/config.rs
//!
//! Engine configuration.
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields a working audit-mode engine sized like the kernel-side maps.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BpfboxError, Result};

/// Default Process Table capacity
pub const DEFAULT_MAX_PROCESSES: usize = 10240;
/// Default Profile Table capacity and dispatch table length
pub const DEFAULT_MAX_PROFILES: usize = 10240;
pub const DEFAULT_TABLE_SHARDS: usize = 16;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// What the reporter does with a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Kill the offending thread and report on the enforcement channel.
    Enforcing,
    /// Report on the would-have-enforced channel only.
    #[default]
    Audit,
}

impl FromStr for EnforcementMode {
    type Err = BpfboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "enforcing" | "enforce" => Ok(EnforcementMode::Enforcing),
            "audit" | "audit-only" | "audit_only" => Ok(EnforcementMode::Audit),
            other => Err(BpfboxError::Config(format!(
                "unknown enforcement mode '{}', expected 'enforcing' or 'audit'",
                other
            ))),
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementMode::Enforcing => f.write_str("enforcing"),
            EnforcementMode::Audit => f.write_str("audit"),
        }
    }
}

/// How open arguments travel from the entry hook to the exit hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenArgsSlotMode {
    /// One slot per calling thread.
    #[default]
    PerThread,
    /// A single machine-wide slot. Concurrent opens overwrite each other's
    /// arguments; kept only to reproduce that defect.
    Shared,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BpfboxConfig {
    /// Process Table capacity
    pub max_processes: usize,
    /// Profile Table capacity; also the number of dispatch slots
    pub max_profiles: usize,
    /// Independently locked shards per table
    pub table_shards: usize,
    /// Initial reporter mode
    pub mode: EnforcementMode,
    pub open_args_slot: OpenArgsSlotMode,
    /// Events buffered per output channel before drops start
    pub channel_capacity: usize,
}

impl Default for BpfboxConfig {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            max_profiles: DEFAULT_MAX_PROFILES,
            table_shards: DEFAULT_TABLE_SHARDS,
            mode: EnforcementMode::default(),
            open_args_slot: OpenArgsSlotMode::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl BpfboxConfig {
    /// Load and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BpfboxError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)?;
        log::info!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: BpfboxConfig = if content.trim().is_empty() {
            BpfboxConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_mode(mut self, mode: EnforcementMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.table_shards == 0 {
            return Err(BpfboxError::Config(
                "table_shards must be at least 1".to_string(),
            ));
        }
        if self.max_profiles == 0 {
            return Err(BpfboxError::Config(
                "max_profiles must be at least 1".to_string(),
            ));
        }
        if u32::try_from(self.max_profiles).is_err() {
            return Err(BpfboxError::Config(format!(
                "max_profiles {} exceeds the dispatch index range",
                self.max_profiles
            )));
        }
        if self.channel_capacity == 0 {
            return Err(BpfboxError::Config(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_processes == 0 {
            log::warn!("max_processes is 0: no process will ever be tracked");
        }
        Ok(())
    }
}
