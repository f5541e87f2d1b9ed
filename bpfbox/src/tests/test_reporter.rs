// bpfbox/src/tests/test_reporter.rs

use std::sync::Arc;

use crate::config::EnforcementMode;
use crate::error::{BpfboxError, Result};
use crate::events::{EnforcementEvent, EventBus, EventChannel};
use crate::process::{ProcessRecord, TaskContext};
use crate::profile::{ProfileKey, ProfileRecord};
use crate::reporter::{EnforcementReporter, RecordingTerminator, SignalTerminator, Terminator};

fn confined(pid: u32, key: ProfileKey) -> (ProcessRecord, ProfileRecord) {
    let process = ProcessRecord {
        profile_key: key,
        ..ProcessRecord::new(pid, pid)
    };
    let profile = ProfileRecord {
        profile_key: key,
        tail_call_index: 2,
    };
    (process, profile)
}

struct FailingTerminator;

impl Terminator for FailingTerminator {
    fn terminate(&self, task: &TaskContext) -> Result<()> {
        Err(BpfboxError::Signal(format!("no such task {}", task.tid)))
    }
}

#[test]
fn enforcing_kills_once_and_reports_once() {
    let bus = Arc::new(EventBus::new(8));
    let terminator = Arc::new(RecordingTerminator::new());
    let reporter = EnforcementReporter::new(EnforcementMode::Enforcing, bus.clone(), terminator.clone());
    let (process, profile) = confined(101, ProfileKey(42));
    let task = TaskContext::single(101);

    assert_eq!(reporter.enforce(&task, &process, &profile), EnforcementMode::Enforcing);

    assert_eq!(terminator.killed(), vec![task]);
    assert_eq!(
        bus.drain(EventChannel::Enforcement),
        vec![EnforcementEvent {
            pid: 101,
            tid: 101,
            profile_key: ProfileKey(42),
        }]
    );
    assert_eq!(bus.pending(EventChannel::WouldHaveEnforced), 0);
    assert_eq!(reporter.denials(), 1);
}

#[test]
fn audit_reports_identical_event_without_killing() {
    let bus = Arc::new(EventBus::new(8));
    let terminator = Arc::new(RecordingTerminator::new());
    let reporter = EnforcementReporter::new(EnforcementMode::Audit, bus.clone(), terminator.clone());
    let (process, profile) = confined(101, ProfileKey(42));

    reporter.enforce(&TaskContext::single(101), &process, &profile);

    assert!(terminator.killed().is_empty());
    assert_eq!(bus.pending(EventChannel::Enforcement), 0);
    assert_eq!(
        bus.drain(EventChannel::WouldHaveEnforced),
        vec![EnforcementEvent {
            pid: 101,
            tid: 101,
            profile_key: ProfileKey(42),
        }]
    );
}

#[test]
fn event_tid_is_the_triggering_thread() {
    let bus = Arc::new(EventBus::new(8));
    let reporter = EnforcementReporter::new(
        EnforcementMode::Audit,
        bus.clone(),
        Arc::new(RecordingTerminator::new()),
    );
    // Record keyed by task 205, reported while thread 205 of group 200 runs.
    let (process, profile) = confined(205, ProfileKey(7));
    reporter.enforce(&TaskContext::new(205, 200), &process, &profile);

    let events = bus.drain(EventChannel::WouldHaveEnforced);
    assert_eq!(events[0].pid, 205);
    assert_eq!(events[0].tid, 205);
}

#[test]
fn signal_failure_still_reports() {
    let bus = Arc::new(EventBus::new(8));
    let reporter = EnforcementReporter::new(
        EnforcementMode::Enforcing,
        bus.clone(),
        Arc::new(FailingTerminator),
    );
    let (process, profile) = confined(9, ProfileKey(1));

    reporter.enforce(&TaskContext::single(9), &process, &profile);
    assert_eq!(bus.drain(EventChannel::Enforcement).len(), 1);
}

#[test]
fn full_channel_counts_drops() {
    let bus = Arc::new(EventBus::new(2));
    let reporter = EnforcementReporter::new(
        EnforcementMode::Audit,
        bus.clone(),
        Arc::new(RecordingTerminator::new()),
    );
    let (process, profile) = confined(9, ProfileKey(1));
    for _ in 0..5 {
        reporter.enforce(&TaskContext::single(9), &process, &profile);
    }

    assert_eq!(reporter.denials(), 5);
    assert_eq!(bus.pending(EventChannel::WouldHaveEnforced), 2);
    assert_eq!(bus.dropped(EventChannel::WouldHaveEnforced), 3);
}

#[test]
fn mode_is_runtime_mutable() {
    let bus = Arc::new(EventBus::new(8));
    let reporter = EnforcementReporter::new(
        EnforcementMode::Audit,
        bus.clone(),
        Arc::new(RecordingTerminator::new()),
    );
    let (process, profile) = confined(9, ProfileKey(1));
    let task = TaskContext::single(9);

    reporter.enforce(&task, &process, &profile);
    reporter.set_mode(EnforcementMode::Enforcing);
    reporter.enforce(&task, &process, &profile);
    reporter.set_mode(EnforcementMode::Audit);
    reporter.enforce(&task, &process, &profile);

    assert_eq!(bus.drain(EventChannel::WouldHaveEnforced).len(), 2);
    assert_eq!(bus.drain(EventChannel::Enforcement).len(), 1);
}

#[test]
fn signal_terminator_rejects_out_of_range_tid() {
    let err = SignalTerminator
        .terminate(&TaskContext::single(u32::MAX))
        .unwrap_err();
    assert!(matches!(err, BpfboxError::Signal(_)));
}
