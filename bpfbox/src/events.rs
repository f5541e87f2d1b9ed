//! Event definitions and the output channels they are delivered on

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};

use crate::profile::ProfileKey;

/// Record emitted once per denial decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct EnforcementEvent {
    pub pid: u32,
    pub tid: u32,
    pub profile_key: ProfileKey,
}

impl EnforcementEvent {
    /// Size of the raw record as laid out by the kernel side.
    pub const RAW_SIZE: usize = 16;

    /// Decode a raw native-endian record.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::RAW_SIZE {
            return None;
        }

        let mut pid = [0u8; 4];
        let mut tid = [0u8; 4];
        let mut key = [0u8; 8];
        pid.copy_from_slice(&bytes[0..4]);
        tid.copy_from_slice(&bytes[4..8]);
        key.copy_from_slice(&bytes[8..16]);

        Some(Self {
            pid: u32::from_ne_bytes(pid),
            tid: u32::from_ne_bytes(tid),
            profile_key: ProfileKey(u64::from_ne_bytes(key)),
        })
    }

    /// Encode into the raw native-endian record.
    pub fn to_bytes(&self) -> [u8; Self::RAW_SIZE] {
        let mut out = [0u8; Self::RAW_SIZE];
        out[0..4].copy_from_slice(&self.pid.to_ne_bytes());
        out[4..8].copy_from_slice(&self.tid.to_ne_bytes());
        out[8..16].copy_from_slice(&self.profile_key.0.to_ne_bytes());
        out
    }
}

impl fmt::Display for EnforcementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Enforcement[pid={}, tid={}, profile={}]",
            self.pid, self.tid, self.profile_key
        )
    }
}

/// Logical output channels. Ordering holds only within one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    /// Reserved; the core never writes to it.
    ProcessCreate,
    Enforcement,
    WouldHaveEnforced,
}

impl EventChannel {
    pub const ALL: [EventChannel; 3] = [
        EventChannel::ProcessCreate,
        EventChannel::Enforcement,
        EventChannel::WouldHaveEnforced,
    ];

    const fn slot(self) -> usize {
        match self {
            EventChannel::ProcessCreate => 0,
            EventChannel::Enforcement => 1,
            EventChannel::WouldHaveEnforced => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            EventChannel::ProcessCreate => "process_create",
            EventChannel::Enforcement => "enforcement",
            EventChannel::WouldHaveEnforced => "would_have_enforced",
        }
    }
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ChannelBuffer {
    queue: ArrayQueue<EnforcementEvent>,
    dropped: AtomicU64,
}

/// Best-effort, bounded event output.
///
/// Each channel is a fixed-size lock-free queue. Submitting to a full
/// channel drops the event and bumps the channel's drop counter; the
/// consumer must tolerate gaps.
pub struct EventBus {
    channels: [ChannelBuffer; 3],
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let buffer = || ChannelBuffer {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
        };
        Self {
            channels: [buffer(), buffer(), buffer()],
        }
    }

    /// Queue `event` on `channel`. Returns false if it was dropped.
    pub fn submit(&self, channel: EventChannel, event: EnforcementEvent) -> bool {
        let buffer = &self.channels[channel.slot()];
        match buffer.queue.push(event) {
            Ok(()) => true,
            Err(_) => {
                buffer.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Take every buffered event from `channel`, oldest first.
    pub fn drain(&self, channel: EventChannel) -> Vec<EnforcementEvent> {
        let queue = &self.channels[channel.slot()].queue;
        let mut events = Vec::with_capacity(queue.len());
        while let Some(event) = queue.pop() {
            events.push(event);
        }
        events
    }

    /// Number of events currently buffered on `channel`.
    pub fn pending(&self, channel: EventChannel) -> usize {
        self.channels[channel.slot()].queue.len()
    }

    /// Number of events dropped on `channel` because it was full.
    pub fn dropped(&self, channel: EventChannel) -> u64 {
        self.channels[channel.slot()].dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("EventBus");
        for channel in EventChannel::ALL {
            s.field(channel.as_str(), &self.pending(channel));
        }
        s.finish()
    }
}
