use std::thread;

use pretty_assertions::assert_eq;
use umbra_primitives::{NativeThreadId, ProcessId, RawArgument, RawValue};
use umbra_runtime::{RuntimeEvent, RuntimeEventKind as Kind, RuntimeState, SchedulerError, Severity, ShadowThreadId, WorkerExit};

use crate::common::*;

#[test]
fn method_call_and_return_follow_enqueue_order() {
	let harness = Harness::new();
	harness.start();
	harness.call(MAIN, USER_METHOD, vec![RawArgument::new(0, RawValue::I32(123))]);
	harness.ret(MAIN, USER_METHOD, None);
	harness.flush(MAIN);

	assert_eq!(harness.recorder.kinds_on(MAIN), vec![Kind::ProfilerInitialized, Kind::ModuleLoaded, Kind::MethodCalled, Kind::MethodReturned]);
	let called = harness.recorder.events().into_iter().find(|recorded| recorded.event.kind() == Kind::MethodCalled).unwrap();
	assert_eq!(
		called.event,
		RuntimeEvent::MethodCalled {
			function: USER_METHOD,
			arguments: vec![RawArgument::new(0, RawValue::I32(123))],
		}
	);
	assert_eq!(harness.scheduler.runtime().state(), RuntimeState::Executing);
	assert_eq!(harness.scheduler.runtime().module(umbra_primitives::ModuleId(MODULE)).unwrap().path, "/app/Program.dll");
	assert_eq!(harness.shadow(MAIN).call_stack_depth(), 0);
}

#[test]
fn concurrent_field_accesses_keep_per_thread_order() {
	const A: usize = 0x10;
	const B: usize = 0x20;
	let harness = Harness::new();
	harness.start();
	harness.spawn(A);
	harness.spawn(B);

	thread::scope(|scope| {
		for native in [A, B] {
			let harness = &harness;
			scope.spawn(move || {
				for field in 0..100 {
					harness.field_access(native, field, field % 2 == 0);
				}
			});
		}
	});
	harness.flush(A);
	harness.flush(B);

	assert_eq!(harness.recorder.count(Kind::FieldAccessed), 200);
	for native in [A, B] {
		let fields: Vec<u64> = harness
			.recorder
			.events()
			.into_iter()
			.filter(|recorded| recorded.thread == NativeThreadId(native))
			.filter_map(|recorded| match recorded.event {
				RuntimeEvent::FieldAccessed { field, instance: None, .. } => Some(field),
				_ => None,
			})
			.collect();
		assert_eq!(fields, (0..100).collect::<Vec<_>>());
	}
}

#[test]
fn field_and_array_operands_pair_with_the_access() {
	let harness = Harness::new();
	harness.start();
	harness.call(MAIN, FIELD_INSTANCE_ACCESS, vec![object_arg(0, 0x1000)]);
	harness.ret(MAIN, FIELD_INSTANCE_ACCESS, None);
	harness.field_access(MAIN, 7, true);

	harness.call(MAIN, ARRAY_INSTANCE_ACCESS, vec![object_arg(0, 0x2000)]);
	harness.ret(MAIN, ARRAY_INSTANCE_ACCESS, None);
	harness.call(MAIN, ARRAY_INDEX_ACCESS, vec![RawArgument::new(0, RawValue::I32(3))]);
	harness.ret(MAIN, ARRAY_INDEX_ACCESS, None);
	harness.call(MAIN, ARRAY_ELEMENT_ACCESS, vec![RawArgument::new(0, RawValue::Bool(false)), RawArgument::new(1, RawValue::U64(9))]);
	harness.ret(MAIN, ARRAY_ELEMENT_ACCESS, None);

	// No pending array operands left: reported, not raised.
	harness.call(MAIN, ARRAY_ELEMENT_ACCESS, vec![RawArgument::new(0, RawValue::Bool(false)), RawArgument::new(1, RawValue::U64(9))]);
	harness.ret(MAIN, ARRAY_ELEMENT_ACCESS, None);
	harness.flush(MAIN);

	let instance = harness.object(0x1000);
	let array = harness.object(0x2000);
	let accesses: Vec<_> = harness
		.recorder
		.events()
		.into_iter()
		.map(|recorded| recorded.event)
		.filter(|event| matches!(event.kind(), Kind::FieldAccessed | Kind::ArrayElementAccessed))
		.collect();
	assert_eq!(
		accesses,
		vec![
			RuntimeEvent::FieldAccessed {
				field: 7,
				is_write: true,
				instance: Some(instance),
			},
			RuntimeEvent::ArrayElementAccessed {
				element: 9,
				is_write: false,
				array,
				index: 3,
			},
		]
	);
	assert_eq!(harness.reports.count_category("protocol"), 1);
	assert!(harness.shadow(MAIN).operations().is_empty());
}

#[test]
fn unknown_thread_is_rejected() {
	let harness = Harness::new();
	harness.start();
	let err = harness.scheduler.schedule_method_called(harness.info(0x999), USER_METHOD, Vec::new()).unwrap_err();
	assert!(matches!(
		err,
		SchedulerError::UnknownThread {
			process: ProcessId(PID),
			thread: NativeThreadId(0x999),
		}
	));
	harness.flush(MAIN);
	assert_eq!(harness.recorder.count(Kind::MethodCalled), 0);
}

#[test]
fn duplicate_thread_creation_is_reported_and_ignored() {
	let harness = Harness::new();
	harness.start();
	harness.spawn(0x10);
	harness.spawn(0x10);
	harness.flush(0x10);

	assert_eq!(harness.recorder.count(Kind::ThreadCreated), 1);
	assert_eq!(harness.scheduler.runtime().thread_count(), 2);
	let reports = harness.reports.reports();
	assert_eq!(reports.len(), 1);
	assert_eq!(reports[0].severity, Severity::Warning);
	assert_eq!(reports[0].category, "protocol");

	harness.spawn(0x20);
	harness.flush(0x20);
	assert_eq!(harness.shadow(0x10).id(), ShadowThreadId(2));
	assert_eq!(harness.shadow(0x20).id(), ShadowThreadId(3));
}

#[test]
fn return_without_call_faults_only_that_thread() {
	let harness = Harness::new();
	harness.start();
	harness.spawn(0x10);
	harness.ret(0x10, USER_METHOD, None);
	harness.call(MAIN, USER_METHOD, Vec::new());
	harness.flush(MAIN);

	let faulted = harness.shadow(0x10);
	assert!(matches!(faulted.join(), Some(WorkerExit::Faulted { .. })));
	assert_eq!(harness.reports.count_category("invariant"), 1);
	assert!(harness.scheduler.schedule_method_called(harness.info(0x10), USER_METHOD, Vec::new()).is_err());
	assert_eq!(harness.recorder.kinds_on(MAIN).last(), Some(&Kind::MethodCalled));
}

#[test]
fn destroyed_thread_drains_before_its_final_event() {
	let harness = Harness::new();
	harness.start();
	harness.spawn(0x10);
	for _ in 0..10 {
		harness.call(0x10, USER_METHOD, Vec::new());
		harness.ret(0x10, USER_METHOD, None);
	}
	let shadow = harness.shadow(0x10);
	harness.scheduler.schedule_thread_destroyed(harness.info(0x10), NativeThreadId(0x10)).unwrap();
	assert!(harness.recorder.wait_count(Kind::ThreadDestroyed, 1));

	let kinds = harness.recorder.kinds_on(0x10);
	assert_eq!(kinds.iter().filter(|kind| **kind == Kind::MethodCalled).count(), 10);
	assert_eq!(kinds.last(), Some(&Kind::ThreadDestroyed));
	assert!(shadow.is_closed());
	assert!(matches!(
		harness.scheduler.schedule_method_called(harness.info(0x10), USER_METHOD, Vec::new()),
		Err(SchedulerError::UnknownThread { .. })
	));
}

#[test]
fn terminated_scheduler_rejects_everything() {
	let harness = Harness::new();
	harness.start();
	harness.spawn(0x10);
	harness.terminate();

	assert_eq!(harness.recorder.count(Kind::ProfilerDestroyed), 1);
	assert_eq!(harness.scheduler.runtime().state(), RuntimeState::Terminated);
	assert_eq!(harness.scheduler.runtime().thread_count(), 0);
	assert!(harness.scheduler.is_terminated());
	assert!(harness.scheduler.epoch().is_closed());

	let raised = harness.recorder.events().len();
	assert!(matches!(
		harness.scheduler.schedule_method_called(harness.info(MAIN), USER_METHOD, Vec::new()),
		Err(SchedulerError::Terminated(ProcessId(PID)))
	));
	assert!(matches!(
		harness.scheduler.schedule_thread_created(harness.info(MAIN), NativeThreadId(0x30)),
		Err(SchedulerError::Terminated(_))
	));
	assert!(matches!(harness.scheduler.schedule_profiler_destroyed(harness.info(MAIN)), Err(SchedulerError::Terminated(_))));
	assert!(matches!(harness.scheduler.schedule_heartbeat(harness.info(MAIN)), Err(SchedulerError::Terminated(_))));
	assert_eq!(harness.recorder.events().len(), raised);
}

#[test]
fn profiler_destroyed_from_a_gone_thread_lands_on_a_live_one() {
	let harness = Harness::new();
	harness.start();
	harness.spawn(0x10);
	harness.scheduler.schedule_thread_destroyed(harness.info(0x10), NativeThreadId(0x10)).unwrap();
	assert!(harness.recorder.wait_count(Kind::ThreadDestroyed, 1));

	harness.scheduler.schedule_profiler_destroyed(harness.info(0x10)).unwrap();

	assert_eq!(harness.recorder.count(Kind::ProfilerDestroyed), 1);
	assert_eq!(harness.recorder.kinds_on(MAIN).last(), Some(&Kind::ProfilerDestroyed));
	assert!(harness.scheduler.is_terminated());
}

#[test]
fn profiler_destroyed_from_an_unknown_thread_still_raises() {
	let harness = Harness::new();
	harness.start();
	harness.scheduler.schedule_profiler_destroyed(harness.info(0x99)).unwrap();

	let destroyed: Vec<_> = harness.recorder.events().into_iter().filter(|recorded| recorded.event.kind() == Kind::ProfilerDestroyed).collect();
	assert_eq!(destroyed.len(), 1);
	assert_eq!(destroyed[0].thread, NativeThreadId(MAIN));
}

#[test]
fn worker_snapshots_name_every_worker() {
	let harness = Harness::new();
	harness.start();
	harness.spawn(0x10);
	harness.flush(MAIN);
	harness.flush(0x10);

	let names: Vec<_> = harness.scheduler.worker_snapshots().into_iter().map(|record| record.name).collect();
	assert_eq!(names, vec![format!("reaper-{PID}"), format!("shadow-thread-{PID}-1"), format!("shadow-thread-{PID}-2")]);
}

#[test]
fn loaded_entities_are_recorded_once_per_type() {
	let harness = Harness::new();
	harness.start();
	let ty = umbra_primitives::TypeInfo {
		module_id: umbra_primitives::ModuleId(MODULE),
		type_token: umbra_primitives::MdToken(0x0200_0001),
	};
	harness.scheduler.schedule_type_loaded(harness.info(MAIN), ty).unwrap();
	harness.scheduler.schedule_type_loaded(harness.info(MAIN), ty).unwrap();
	harness.scheduler.schedule_jit_compilation_started(harness.info(MAIN), USER_METHOD).unwrap();
	harness.flush(MAIN);

	let runtime = harness.scheduler.runtime();
	assert_eq!(runtime.module(umbra_primitives::ModuleId(MODULE)).unwrap().path, "/app/Program.dll");
	assert_eq!(runtime.type_count(), 1);
	assert_eq!(runtime.jit_compilations(), 1);
	assert_eq!(harness.recorder.count(Kind::TypeLoaded), 2);
	assert_eq!(harness.recorder.count(Kind::JitCompilationStarted), 1);
}
