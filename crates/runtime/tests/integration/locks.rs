use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use umbra_primitives::RawValue;
use umbra_runtime::{RuntimeEvent, RuntimeEventKind as Kind};

use crate::common::*;

const T1: usize = 0x10;
const T2: usize = 0x20;
const O1: usize = 0x1000;
const O2: usize = 0x2000;

fn harness() -> Harness {
	let harness = Harness::new();
	harness.start();
	harness.spawn(T1);
	harness.spawn(T2);
	harness
}

#[test]
fn contended_acquire_waits_for_release() {
	let harness = harness();
	harness.enter(T1, O1);
	harness.flush(T1);
	let t1 = harness.shadow(T1).id();
	let t2 = harness.shadow(T2).id();
	assert_eq!(harness.object(O1).sync_block().owner(), Some(t1));

	harness.enter(T2, O1);
	assert!(!harness.try_flush(T2, Duration::from_millis(100)));
	assert_eq!(harness.recorder.count(Kind::LockAcquireReturned), 1);
	assert_eq!(harness.object(O1).sync_block().owner(), Some(t1));

	harness.exit(T1, O1);
	harness.flush(T2);
	assert_eq!(harness.object(O1).sync_block().owner(), Some(t2));
	let returned: Vec<_> = harness
		.recorder
		.events()
		.into_iter()
		.filter_map(|recorded| match recorded.event {
			RuntimeEvent::LockAcquireReturned { success, .. } => Some((recorded.thread.0, success)),
			_ => None,
		})
		.collect();
	assert_eq!(returned, vec![(T1, true), (T2, true)]);
}

#[test]
fn crossed_attempts_leave_owners_unchanged() {
	let harness = harness();
	harness.enter(T1, O1);
	harness.enter(T2, O2);
	harness.flush(T1);
	harness.flush(T2);

	harness.call(T1, ENTER, vec![object_arg(0, O2)]);
	harness.call(T2, ENTER, vec![object_arg(0, O1)]);
	harness.flush(T1);
	harness.flush(T2);

	assert_eq!(harness.object(O1).sync_block().owner(), Some(harness.shadow(T1).id()));
	assert_eq!(harness.object(O2).sync_block().owner(), Some(harness.shadow(T2).id()));
	assert_eq!(harness.recorder.count(Kind::LockAcquireAttempted), 4);
	assert_eq!(harness.recorder.count(Kind::LockAcquireReturned), 2);
	assert_eq!(harness.shadow(T1).call_stack_depth(), 1);
}

#[test]
fn monitors_are_reentrant() {
	let harness = harness();
	harness.enter(T1, O1);
	harness.enter(T1, O1);
	harness.exit(T1, O1);
	harness.flush(T1);
	let block = harness.object(O1);
	assert_eq!(block.sync_block().owner(), Some(harness.shadow(T1).id()));
	assert_eq!(block.sync_block().recursion(), 1);

	harness.exit(T1, O1);
	harness.flush(T1);
	assert_eq!(block.sync_block().owner(), None);
	assert!(harness.reports.is_empty());
}

#[test]
fn release_without_ownership_is_a_warning() {
	let harness = harness();
	harness.exit(T1, O1);
	harness.flush(T1);

	assert_eq!(harness.recorder.count(Kind::LockReleased), 1);
	assert_eq!(harness.reports.count_category("lock"), 1);
	assert_eq!(harness.object(O1).sync_block().owner(), None);
}

#[test]
fn wait_releases_and_reacquires_the_monitor() {
	let harness = harness();
	let t1 = harness.shadow(T1).id();
	let t2 = harness.shadow(T2).id();
	harness.enter(T1, O1);
	harness.enter(T1, O1);
	harness.call(T1, WAIT, vec![object_arg(0, O1)]);
	harness.flush(T1);
	assert_eq!(harness.object(O1).sync_block().owner(), None);

	harness.enter(T2, O1);
	harness.call(T2, PULSE, vec![object_arg(0, O1)]);
	harness.ret(T2, PULSE, None);
	harness.exit(T2, O1);
	harness.flush(T2);
	assert_eq!(harness.recorder.count(Kind::ObjectPulseCalled), 1);
	assert_eq!(harness.recorder.count(Kind::ObjectPulseReturned), 1);
	assert_ne!(harness.object(O1).sync_block().owner(), Some(t2));

	harness.ret(T1, WAIT, Some(RawValue::Bool(true)));
	harness.flush(T1);
	let block = harness.object(O1);
	assert_eq!(block.sync_block().owner(), Some(t1));
	assert_eq!(block.sync_block().recursion(), 2);
	let waited = harness.recorder.events().into_iter().find(|recorded| recorded.event.kind() == Kind::ObjectWaitReturned).unwrap();
	assert!(matches!(waited.event, RuntimeEvent::ObjectWaitReturned { success: true, .. }));
}

#[test]
fn teardown_interrupts_a_parked_acquire() {
	let harness = harness();
	harness.enter(T1, O1);
	harness.flush(T1);
	harness.enter(T2, O1);
	harness.call(T2, USER_METHOD, Vec::new());

	let started = Instant::now();
	harness.terminate();
	assert!(started.elapsed() < TIMEOUT);

	assert_eq!(harness.recorder.count(Kind::LockAcquireReturned), 1);
	assert_eq!(harness.object(O1).sync_block().owner().map(|owner| owner.0), Some(2));
	let on_t2 = harness.recorder.kinds_on(T2);
	assert!(!on_t2.contains(&Kind::LockAcquireReturned));
	assert_eq!(on_t2.last(), Some(&Kind::MethodCalled));
}
