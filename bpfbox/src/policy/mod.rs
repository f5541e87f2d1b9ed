// bpfbox/src/policy/mod.rs

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dispatch::{PolicyContext, PolicyRoutine};
use crate::error::BpfboxError;
use crate::logging::LogLevel;

bitflags! {
    /// Filesystem access classes. Bit values match the kernel's `MAY_*`
    /// constants so they can be read straight out of `acc_mode`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FsAccess: u32 {
        const EXEC = 0x1;
        const WRITE = 0x2;
        const READ = 0x4;
        const APPEND = 0x8;
    }
}

impl FsAccess {
    /// Parse an access string such as `"rwa"`. Letters may repeat and
    /// appear in any order; `""` is no access.
    pub fn parse(s: &str) -> Result<Self, BpfboxError> {
        let mut access = FsAccess::empty();
        for c in s.trim().chars() {
            access |= match c {
                'r' => FsAccess::READ,
                'w' => FsAccess::WRITE,
                'a' => FsAccess::APPEND,
                'x' => FsAccess::EXEC,
                other => {
                    return Err(BpfboxError::Policy(format!(
                        "invalid access flag '{}' in '{}'",
                        other, s
                    )))
                }
            };
        }
        Ok(access)
    }
}

impl FromStr for FsAccess {
    type Err = BpfboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FsAccess::parse(s)
    }
}

impl fmt::Display for FsAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, c) in [
            (FsAccess::READ, 'r'),
            (FsAccess::WRITE, 'w'),
            (FsAccess::APPEND, 'a'),
            (FsAccess::EXEC, 'x'),
        ] {
            if self.contains(flag) {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

impl Serialize for FsAccess {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FsAccess {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FsAccess::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PolicyRoutine for AllowAll {
    fn name(&self) -> &str {
        "allow_all"
    }

    fn run(&self, _ctx: &mut PolicyContext<'_>) {}
}

/// Denies every intercepted call.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl PolicyRoutine for DenyAll {
    fn name(&self) -> &str {
        "deny_all"
    }

    fn run(&self, ctx: &mut PolicyContext<'_>) {
        ctx.deny();
    }
}

/// Access-class policy for one profile.
///
/// A request fully covered by `allow` passes. One covered by `taint`
/// passes and marks the process tainted. One covered by `audit` passes
/// with a log line. Anything else is denied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default)]
    pub allow: FsAccess,
    #[serde(default)]
    pub taint: FsAccess,
    #[serde(default)]
    pub audit: FsAccess,
}

impl AccessPolicy {
    pub fn new(allow: FsAccess) -> Self {
        Self {
            allow,
            ..Self::default()
        }
    }

    pub fn with_taint(mut self, taint: FsAccess) -> Self {
        self.taint = taint;
        self
    }

    pub fn with_audit(mut self, audit: FsAccess) -> Self {
        self.audit = audit;
        self
    }
}

impl PolicyRoutine for AccessPolicy {
    fn name(&self) -> &str {
        "access"
    }

    fn run(&self, ctx: &mut PolicyContext<'_>) {
        let requested = ctx.requested_access();

        if self.allow.contains(requested) {
            return;
        }
        if !self.taint.is_empty() && self.taint.contains(requested) {
            if !ctx.process.tainted {
                policy_log!(
                    LogLevel::Info,
                    "Tainting task {} after '{}' access",
                    ctx.task.tid,
                    requested
                );
            }
            ctx.taint();
            return;
        }
        if !self.audit.is_empty() && self.audit.contains(requested) {
            policy_log!(
                LogLevel::Warn,
                "AUDIT task {} '{}' access under {}",
                ctx.task.tid,
                requested,
                ctx.profile.profile_key
            );
            return;
        }

        ctx.deny();
    }
}

/// Serializable description of a reference routine, as loaded from a
/// replay trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutineSpec {
    AllowAll,
    DenyAll,
    Access(AccessPolicy),
}

impl RoutineSpec {
    pub fn build(&self) -> Arc<dyn PolicyRoutine> {
        match self {
            RoutineSpec::AllowAll => Arc::new(AllowAll),
            RoutineSpec::DenyAll => Arc::new(DenyAll),
            RoutineSpec::Access(policy) => Arc::new(policy.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render_agree() {
        let access = FsAccess::parse("xar").unwrap();
        assert_eq!(access, FsAccess::READ | FsAccess::APPEND | FsAccess::EXEC);
        assert_eq!(access.to_string(), "rax");
        assert_eq!(FsAccess::parse("").unwrap(), FsAccess::empty());
        assert!(FsAccess::parse("rz").is_err());
    }

    #[test]
    fn routine_spec_from_yaml() {
        let spec: RoutineSpec =
            serde_yaml::from_str("kind: access\nallow: r\ntaint: w\n").unwrap();
        assert_eq!(
            spec,
            RoutineSpec::Access(AccessPolicy::new(FsAccess::READ).with_taint(FsAccess::WRITE))
        );
        assert_eq!(spec.build().name(), "access");
    }
}
