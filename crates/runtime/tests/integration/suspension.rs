use std::time::Duration;

use pretty_assertions::assert_eq;
use umbra_primitives::{GcGeneration, GcGenerationRange, NativeThreadId, ObjectAddress, ProcessId, SuspendReason};
use umbra_runtime::{Command, RuntimeEvent, RuntimeEventKind as Kind, RuntimeState, SchedulerConfig};

use crate::common::*;

const A: usize = 0x10;
const B: usize = 0x20;

fn harness_with(config: SchedulerConfig) -> Harness {
	let harness = Harness::with_config(config);
	harness.start();
	harness.spawn(A);
	harness.spawn(B);
	harness.flush(MAIN);
	harness
}

fn harness() -> Harness {
	harness_with(test_config())
}

fn suspend(harness: &Harness) {
	harness.scheduler.schedule_runtime_suspend_started(harness.info(MAIN), SuspendReason::Gc).unwrap();
}

fn thread_suspended(harness: &Harness, native: usize) {
	harness.scheduler.schedule_runtime_thread_suspended(harness.info(MAIN), NativeThreadId(native)).unwrap();
}

fn thread_resumed(harness: &Harness, native: usize) {
	harness.scheduler.schedule_runtime_thread_resumed(harness.info(MAIN), NativeThreadId(native)).unwrap();
}

#[test]
fn suspend_finishes_only_after_every_thread_arrives() {
	let harness = harness();
	suspend(&harness);
	thread_suspended(&harness, A);
	harness.flush(MAIN);
	harness.flush(A);

	assert_eq!(harness.recorder.count(Kind::RuntimeSuspendFinished), 0);
	assert_eq!(harness.scheduler.epoch().current(), 0);
	assert_eq!(harness.scheduler.runtime().state(), RuntimeState::Suspending);
	assert_eq!(harness.scheduler.pending_barriers(), 1);

	thread_suspended(&harness, B);
	assert!(harness.recorder.wait_count(Kind::RuntimeSuspendFinished, 1));
	harness.scheduler.schedule_runtime_suspend_finished(harness.info(MAIN)).unwrap();
	harness.flush(B);

	assert_eq!(harness.recorder.count(Kind::RuntimeSuspendFinished), 1);
	assert_eq!(harness.scheduler.epoch().current(), 1);
	assert_eq!(harness.scheduler.runtime().state(), RuntimeState::Suspended);
	let finished = harness.recorder.events().into_iter().find(|recorded| recorded.event.kind() == Kind::RuntimeSuspendFinished).unwrap();
	assert_eq!(
		finished.event,
		RuntimeEvent::RuntimeSuspendFinished {
			reason: SuspendReason::Gc,
			epoch: 1,
		}
	);

	harness.scheduler.schedule_runtime_resume_started(harness.info(MAIN)).unwrap();
	thread_resumed(&harness, A);
	thread_resumed(&harness, B);
	assert!(harness.recorder.wait_count(Kind::RuntimeResumeFinished, 1));
	harness.scheduler.schedule_runtime_resume_finished(harness.info(MAIN)).unwrap();
	harness.flush(MAIN);
	harness.flush(A);
	harness.flush(B);
	assert_eq!(harness.recorder.count(Kind::RuntimeResumeFinished), 1);
	assert_eq!(harness.scheduler.runtime().state(), RuntimeState::Executing);
	assert_eq!(harness.scheduler.pending_barriers(), 0);
}

#[test]
fn suspended_thread_holds_jobs_until_the_epoch_advances() {
	let harness = harness();
	suspend(&harness);
	thread_suspended(&harness, A);
	harness.call(A, USER_METHOD, Vec::new());

	assert!(!harness.recorder.wait_for(Duration::from_millis(100), |events| events
		.iter()
		.any(|recorded| recorded.thread == NativeThreadId(A) && recorded.event.kind() == Kind::MethodCalled)));
	assert_eq!(harness.shadow(A).local_epoch(), 1);

	thread_suspended(&harness, B);
	assert!(harness.recorder.wait_for(TIMEOUT, |events| events
		.iter()
		.any(|recorded| recorded.thread == NativeThreadId(A) && recorded.event.kind() == Kind::MethodCalled)));
	assert_eq!(harness.scheduler.epoch().current(), 1);
}

#[test]
fn destroyed_thread_leaves_the_suspend_cohort() {
	let harness = harness();
	suspend(&harness);
	thread_suspended(&harness, A);
	harness.flush(A);
	assert_eq!(harness.recorder.count(Kind::RuntimeSuspendFinished), 0);

	harness.scheduler.schedule_thread_destroyed(harness.info(B), NativeThreadId(B)).unwrap();
	assert!(harness.recorder.wait_count(Kind::RuntimeSuspendFinished, 1));
	assert_eq!(harness.scheduler.runtime().state(), RuntimeState::Suspended);
}

#[test]
fn heartbeat_reports_a_stalled_barrier_once() {
	let harness = harness_with(SchedulerConfig {
		barrier_stall_warning_ms: 0,
		..test_config()
	});
	suspend(&harness);
	thread_suspended(&harness, A);
	harness.flush(A);

	harness.scheduler.schedule_heartbeat(harness.info(MAIN)).unwrap();
	harness.scheduler.schedule_heartbeat(harness.info(MAIN)).unwrap();

	let stalled: Vec<_> = harness.reports.reports().into_iter().filter(|report| report.category == "barrier").collect();
	assert_eq!(stalled.len(), 1);
	assert!(stalled[0].message.contains(&harness.shadow(B).id().to_string()), "{}", stalled[0].message);
	assert_eq!(harness.recorder.count(Kind::RuntimeSuspendFinished), 0);
}

#[test]
fn teardown_discards_jobs_stuck_behind_a_barrier() {
	let harness = harness();
	suspend(&harness);
	thread_suspended(&harness, A);
	harness.call(A, USER_METHOD, Vec::new());
	let a = harness.shadow(A);

	harness.terminate();
	assert_eq!(a.discarded(), 1);
	assert!(!harness.recorder.kinds_on(A).contains(&Kind::MethodCalled));
}

#[test]
fn garbage_collection_condemns_unreported_objects() {
	let harness = harness();
	harness.call(A, FIELD_INSTANCE_ACCESS, vec![object_arg(0, 0x1000)]);
	harness.ret(A, FIELD_INSTANCE_ACCESS, None);
	harness.call(A, FIELD_INSTANCE_ACCESS, vec![object_arg(0, 0x1100)]);
	harness.ret(A, FIELD_INSTANCE_ACCESS, None);
	harness.flush(A);
	let doomed = harness.object(0x1000);
	let moved = harness.object(0x1100);

	suspend(&harness);
	thread_suspended(&harness, A);
	thread_suspended(&harness, B);
	let gen0 = GcGenerationRange {
		generation: GcGeneration::Gen0,
		start: 0x1000,
		length: 0x1000,
		reserved_length: 0x1000,
	};
	let scheduler = &harness.scheduler;
	scheduler.schedule_garbage_collection_started(harness.info(MAIN), vec![true, false, false, false, false], vec![gen0]).unwrap();
	scheduler
		.schedule_moved_references(harness.info(MAIN), vec![ObjectAddress(0x1100)], vec![ObjectAddress(0x3000)], vec![0x10])
		.unwrap();
	scheduler.schedule_garbage_collection_finished(harness.info(MAIN), vec![gen0]).unwrap();
	assert!(harness.recorder.wait_count(Kind::GarbageCollectionFinished, 1));
	harness.flush(MAIN);

	let kinds: Vec<_> = harness
		.recorder
		.kinds_on(MAIN)
		.into_iter()
		.filter(|kind| matches!(kind, Kind::RuntimeSuspendStarted | Kind::GarbageCollectionStarted | Kind::MovedReferences | Kind::GarbageCollectionFinished))
		.collect();
	assert_eq!(kinds, vec![Kind::RuntimeSuspendStarted, Kind::GarbageCollectionStarted, Kind::MovedReferences, Kind::GarbageCollectionFinished]);
	let finished = harness.recorder.events().into_iter().find(|recorded| recorded.event.kind() == Kind::GarbageCollectionFinished).unwrap();
	assert_eq!(finished.event, RuntimeEvent::GarbageCollectionFinished { collected: 1, tracked: 1 });

	assert!(!doomed.is_alive());
	assert!(moved.is_alive());
	assert_eq!(moved.address(), ObjectAddress(0x3000));
	assert!(harness.scheduler.runtime().memory().get(ObjectAddress(0x1000)).is_none());
	assert_eq!(harness.commands.sent(), vec![Command::ContinueExecution { process: ProcessId(PID) }]);
}

#[test]
fn moves_past_the_address_space_are_reported_and_skipped() {
	let harness = harness();
	harness.call(A, FIELD_INSTANCE_ACCESS, vec![object_arg(0, 0x1000)]);
	harness.ret(A, FIELD_INSTANCE_ACCESS, None);
	harness.call(A, FIELD_INSTANCE_ACCESS, vec![object_arg(0, 0x1008)]);
	harness.ret(A, FIELD_INSTANCE_ACCESS, None);
	harness.flush(A);
	let head = harness.object(0x1000);
	let tail = harness.object(0x1008);

	harness
		.scheduler
		.schedule_moved_references(harness.info(MAIN), vec![ObjectAddress(0x1000)], vec![ObjectAddress(usize::MAX - 4)], vec![0x10])
		.unwrap();
	harness.flush(MAIN);

	let moved = harness.recorder.events().into_iter().find(|recorded| recorded.event.kind() == Kind::MovedReferences).unwrap();
	assert_eq!(moved.event, RuntimeEvent::MovedReferences { blocks: 1, relocated: 1 });
	assert_eq!(head.address(), ObjectAddress(usize::MAX - 4));
	assert_eq!(tail.address(), ObjectAddress(0x1008));
	assert_eq!(harness.reports.count_category("protocol"), 1);
}

#[test]
fn panicking_arrival_handler_still_announces_the_barrier() {
	let harness = harness();
	harness.scheduler.hub().subscribe(Kind::RuntimeThreadSuspended, |_, _| panic!("handler exploded"));
	suspend(&harness);
	harness.flush(MAIN);
	thread_suspended(&harness, A);
	harness.flush(A);
	thread_suspended(&harness, B);

	assert!(harness.recorder.wait_count(Kind::RuntimeSuspendFinished, 1));
	harness.flush(B);
	assert_eq!(harness.recorder.count(Kind::RuntimeSuspendFinished), 1);
	assert_eq!(harness.recorder.count(Kind::RuntimeThreadSuspended), 2);
	assert_eq!(harness.scheduler.runtime().state(), RuntimeState::Suspended);
	assert_eq!(harness.scheduler.epoch().current(), 1);
	assert_eq!(harness.reports.count_category("plugin"), 2);
}
