// bpfbox/src/tests/test_intercept.rs

use std::sync::Arc;

use crate::config::EnforcementMode;
use crate::dispatch::Verdict;
use crate::engine::{EventHandler, HookOutcome, KernelEvent};
use crate::events::EventChannel;
use crate::intercept::{InterceptOutcome, OpenFlags};
use crate::policy::{AccessPolicy, FsAccess};
use crate::process::TaskContext;
use crate::profile::ProfileKey;
use crate::tests::fixtures::{
    open, spawn_confined, EngineBuilder, RecordingRoutine, SCENARIO_EXE, SCENARIO_KEY,
};

const O_WRONLY: i32 = 0o1;
const O_RDWR: i32 = 0o2;
const O_APPEND: i32 = 0o2000;

#[test]
fn untracked_caller_passes_through() {
    let (engine, _) = EngineBuilder::new().enforcing().build();
    let routine = Arc::new(RecordingRoutine::denying());
    engine.loader().install(SCENARIO_KEY, 0, routine.clone()).unwrap();

    let task = TaskContext::single(500);
    let captured = engine
        .handle(&KernelEvent::OpenEntry {
            task,
            flags: OpenFlags::for_open(O_WRONLY, 0),
        })
        .unwrap();
    assert_eq!(captured, HookOutcome::Captured(false));
    assert_eq!(engine.interceptor().slot().pending(), 0);

    let exit = engine.handle(&KernelEvent::OpenExit { task }).unwrap();
    assert_eq!(exit, HookOutcome::Open(InterceptOutcome::PassThrough));
    assert!(routine.seen().is_empty());
}

#[test]
fn unconfined_caller_is_not_dispatched() {
    let (engine, _) = EngineBuilder::new().enforcing().build();
    // No profile for the exe, so the task stays tracked but unconfined.
    spawn_confined(&engine, 300, SCENARIO_EXE);

    let outcome = open(&engine, TaskContext::single(300), OpenFlags::for_open(0, 0));
    assert_eq!(outcome, InterceptOutcome::Unconfined);
}

#[test]
fn routine_sees_captured_flags() {
    let (engine, _) = EngineBuilder::new().build();
    let routine = Arc::new(RecordingRoutine::allowing());
    engine.loader().install(SCENARIO_KEY, 4, routine.clone()).unwrap();
    spawn_confined(&engine, 300, SCENARIO_EXE);

    let flags = OpenFlags::for_open(O_RDWR | O_APPEND, 0o600);
    let outcome = open(&engine, TaskContext::single(300), flags);
    assert_eq!(
        outcome,
        InterceptOutcome::Dispatched {
            index: 4,
            verdict: Verdict::Allowed,
        }
    );
    assert_eq!(routine.seen(), vec![(TaskContext::single(300), Some(flags))]);
    assert_eq!(engine.interceptor().slot().pending(), 0);
}

#[test]
fn exit_without_entry_has_no_flags() {
    let (engine, _) = EngineBuilder::new().build();
    let routine = Arc::new(RecordingRoutine::allowing());
    engine.loader().install(SCENARIO_KEY, 4, routine.clone()).unwrap();
    spawn_confined(&engine, 300, SCENARIO_EXE);

    let task = TaskContext::single(300);
    engine.handle(&KernelEvent::OpenExit { task }).unwrap();
    assert_eq!(routine.seen(), vec![(task, None)]);
}

#[test]
fn record_evicted_between_entry_and_exit_allows() {
    let (engine, terminator) = EngineBuilder::new().enforcing().build();
    let routine = Arc::new(RecordingRoutine::denying());
    engine.loader().install(SCENARIO_KEY, 1, routine.clone()).unwrap();
    spawn_confined(&engine, 300, SCENARIO_EXE);

    let task = TaskContext::single(300);
    engine
        .handle(&KernelEvent::OpenEntry {
            task,
            flags: OpenFlags::for_open(0, 0),
        })
        .unwrap();
    engine.processes().delete(&300);

    let exit = engine.handle(&KernelEvent::OpenExit { task }).unwrap();
    assert_eq!(exit, HookOutcome::Open(InterceptOutcome::PassThrough));
    assert!(routine.seen().is_empty());
    assert!(terminator.killed().is_empty());
    // The capture was still consumed.
    assert_eq!(engine.interceptor().slot().pending(), 0);
}

#[test]
fn access_policy_allows_taints_and_denies() {
    let (engine, terminator) = EngineBuilder::new().enforcing().build();
    let policy = AccessPolicy::new(FsAccess::READ).with_taint(FsAccess::READ | FsAccess::WRITE);
    engine.loader().install(SCENARIO_KEY, 2, Arc::new(policy)).unwrap();
    spawn_confined(&engine, 300, SCENARIO_EXE);
    let task = TaskContext::single(300);

    let read = open(&engine, task, OpenFlags::for_open(0, 0));
    assert!(!read.is_denied());
    assert!(!engine.processes().lookup(&300).unwrap().tainted);

    let write = open(&engine, task, OpenFlags::for_open(O_WRONLY, 0));
    assert!(!write.is_denied());
    assert!(engine.processes().lookup(&300).unwrap().tainted);

    let append = open(&engine, task, OpenFlags::for_open(O_WRONLY | O_APPEND, 0));
    assert_eq!(
        append,
        InterceptOutcome::Dispatched {
            index: 2,
            verdict: Verdict::Denied(EnforcementMode::Enforcing),
        }
    );
    assert_eq!(terminator.killed(), vec![task]);
    assert_eq!(engine.bus().pending(EventChannel::Enforcement), 1);
}

#[test]
fn access_policy_audit_rule_allows() {
    let (engine, _) = EngineBuilder::new().enforcing().build();
    let policy = AccessPolicy::new(FsAccess::READ).with_audit(FsAccess::READ | FsAccess::WRITE);
    engine.loader().install(SCENARIO_KEY, 2, Arc::new(policy)).unwrap();
    spawn_confined(&engine, 300, SCENARIO_EXE);

    let outcome = open(&engine, TaskContext::single(300), OpenFlags::for_open(O_RDWR, 0));
    assert!(!outcome.is_denied());
    assert_eq!(engine.reporter().denials(), 0);
}

#[test]
fn threads_are_looked_up_by_their_own_id() {
    let (engine, _) = EngineBuilder::new().build();
    let routine = Arc::new(RecordingRoutine::allowing());
    engine.loader().install(SCENARIO_KEY, 0, routine.clone()).unwrap();
    spawn_confined(&engine, 300, SCENARIO_EXE);

    // Thread 301 of process 300 inherits the profile at creation.
    engine
        .handle(&KernelEvent::ProcessCreate {
            parent_tid: 300,
            child_tid: 301,
            child_tgid: 300,
        })
        .unwrap();

    let thread = TaskContext::new(301, 300);
    let outcome = open(&engine, thread, OpenFlags::for_open(0, 0));
    assert!(matches!(outcome, InterceptOutcome::Dispatched { index: 0, .. }));
    assert_eq!(routine.seen()[0].0, thread);
}

#[test]
fn process_evicted_by_later_fork_passes_through() {
    let (engine, terminator) = EngineBuilder::new().enforcing().max_processes(1).build();
    let routine = Arc::new(RecordingRoutine::denying());
    engine.loader().install(SCENARIO_KEY, 1, routine.clone()).unwrap();
    spawn_confined(&engine, 300, SCENARIO_EXE);
    assert!(engine.processes().contains(&300));

    // A single-slot table: the next fork pushes 300 out.
    engine
        .handle(&KernelEvent::ProcessCreate {
            parent_tid: 1,
            child_tid: 400,
            child_tgid: 400,
        })
        .unwrap();
    assert!(!engine.processes().contains(&300));
    assert_eq!(engine.stats().process_evictions, 1);

    let outcome = open(&engine, TaskContext::single(300), OpenFlags::for_open(O_WRONLY, 0));
    assert_eq!(outcome, InterceptOutcome::PassThrough);
    assert!(routine.seen().is_empty());
    assert!(terminator.killed().is_empty());
}

#[test]
fn profile_evicted_under_pressure_fails_open() {
    let (engine, terminator) = EngineBuilder::new()
        .enforcing()
        .max_profiles(2)
        .shards(1)
        .build();
    let loader = engine.loader();
    loader.install(SCENARIO_KEY, 1, Arc::new(crate::policy::DenyAll)).unwrap();
    spawn_confined(&engine, 300, SCENARIO_EXE);

    loader.add_profile(ProfileKey(10), 0).unwrap();
    loader.add_profile(ProfileKey(11), 0).unwrap();
    assert!(!engine.profiles().contains(&SCENARIO_KEY));

    let outcome = open(&engine, TaskContext::single(300), OpenFlags::for_open(O_WRONLY, 0));
    assert_eq!(
        outcome,
        InterceptOutcome::ProfileMissing {
            profile_key: SCENARIO_KEY
        }
    );
    assert!(terminator.killed().is_empty());
    let stats = engine.stats();
    assert_eq!(stats.profile_evictions, 1);
    assert_eq!(stats.denials, 0);
}

#[test]
fn entry_hook_refreshes_caller_recency() {
    let (engine, _) = EngineBuilder::new().max_processes(2).shards(1).build();
    let routine = Arc::new(RecordingRoutine::allowing());
    engine.loader().install(SCENARIO_KEY, 1, routine.clone()).unwrap();
    spawn_confined(&engine, 300, SCENARIO_EXE);
    spawn_confined(&engine, 301, SCENARIO_EXE);

    // 300 is least recent until its open entry touches it.
    let task = TaskContext::single(300);
    engine
        .handle(&KernelEvent::OpenEntry {
            task,
            flags: OpenFlags::for_open(0, 0),
        })
        .unwrap();
    engine
        .handle(&KernelEvent::ProcessCreate {
            parent_tid: 1,
            child_tid: 302,
            child_tgid: 302,
        })
        .unwrap();

    assert!(engine.processes().contains(&300));
    assert!(!engine.processes().contains(&301));
    engine.handle(&KernelEvent::OpenExit { task }).unwrap();
    assert_eq!(routine.seen().len(), 1);
}
