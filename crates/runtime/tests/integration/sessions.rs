use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use umbra_primitives::{FunctionInfo, ProcessId, RawArgument, RawEventInfo, RawValue};
use umbra_runtime::{
	EventArgs, MethodDescriptorRegistry, NotificationPayload, NullCommandSink, Plugin, PluginHost, RawNotification, ReportingService, RuntimeConfig, RuntimeEventKind as Kind, RuntimeEventsHub,
	SchedulerError, SessionRegistry, Severity,
};

use crate::common::*;

fn registry(config: umbra_runtime::SchedulerConfig) -> (SessionRegistry, Arc<Recorder>) {
	let hub = Arc::new(RuntimeEventsHub::new());
	let recorder = Recorder::attach(&hub);
	let registry = SessionRegistry::new(
		config,
		hub,
		ReportingService::new(),
		Arc::new(NullCommandSink),
		Arc::new(metadata()),
		Arc::new(MethodDescriptorRegistry::with_defaults()),
	);
	(registry, recorder)
}

fn notification(id: u64, pid: u32, payload: NotificationPayload) -> RawNotification {
	RawNotification::new(RawEventInfo::new(id, pid, MAIN), payload)
}

#[test]
fn sessions_are_keyed_by_process() {
	let (registry, recorder) = registry(test_config());
	registry.dispatch(notification(0, 1, NotificationPayload::ProfilerInitialized)).unwrap();
	registry.dispatch(notification(0, 2, NotificationPayload::ProfilerInitialized)).unwrap();
	assert_eq!(registry.processes(), vec![ProcessId(1), ProcessId(2)]);

	let call = NotificationPayload::MethodCalled {
		function: USER_METHOD,
		arguments: Vec::new(),
	};
	registry.dispatch(notification(1, 1, call.clone())).unwrap();
	let err = registry.dispatch(notification(1, 3, call)).unwrap_err();
	assert!(matches!(err, SchedulerError::UnknownProcess(ProcessId(3))));
	assert_eq!(registry.reports().count_category("protocol"), 1);

	registry.dispatch(notification(2, 1, NotificationPayload::ProfilerDestroyed)).unwrap();
	assert_eq!(registry.processes(), vec![ProcessId(2)]);
	assert_eq!(recorder.count(Kind::MethodCalled), 1);
	assert_eq!(recorder.count(Kind::ProfilerDestroyed), 1);

	registry.shutdown();
	assert!(registry.is_empty());
}

#[test]
fn unknown_thread_is_reported_as_warning() {
	let (registry, _) = registry(test_config());
	registry.dispatch(notification(0, 1, NotificationPayload::ProfilerInitialized)).unwrap();
	let stray = RawNotification::new(
		RawEventInfo::new(1, 1, 0x999),
		NotificationPayload::MethodReturned {
			function: USER_METHOD,
			return_value: None,
			by_ref_arguments: Vec::new(),
		},
	);
	assert!(matches!(registry.dispatch(stray), Err(SchedulerError::UnknownThread { .. })));
	let reports = registry.reports().reports();
	assert_eq!(reports.len(), 1);
	assert_eq!(reports[0].severity, Severity::Warning);
}

#[test]
fn watchdog_reaps_silent_sessions() {
	let (registry, _) = registry(umbra_runtime::SchedulerConfig {
		watchdog_timeout_ms: 50,
		..test_config()
	});
	registry.dispatch(notification(0, 1, NotificationPayload::ProfilerInitialized)).unwrap();
	registry.dispatch(notification(1, 1, NotificationPayload::Heartbeat)).unwrap();
	assert!(registry.check_watchdogs(Instant::now()).is_empty());

	let crashed = registry.check_watchdogs(Instant::now() + Duration::from_secs(1));
	assert_eq!(crashed, vec![ProcessId(1)]);
	assert!(registry.session(ProcessId(1)).is_none());
	assert_eq!(registry.reports().count_category("watchdog"), 1);
	assert_eq!(registry.reports().count(Severity::Error), 1);
}

#[test]
fn json_lines_drive_a_session_from_config() {
	let config = RuntimeConfig::parse(
		r#"
[scheduler]
sync_block_poll_ms = 2
shutdown_grace_ms = 100

[[symbols]]
module = 789
token = 0x06000011
name = "System.Threading.Monitor::Enter"
"#,
	)
	.unwrap();
	let hub = Arc::new(RuntimeEventsHub::new());
	let recorder = Recorder::attach(&hub);
	let registry = SessionRegistry::from_config(&config, hub, Arc::new(NullCommandSink));

	let trace = [
		r#"{"info":{"id":0,"process_id":7,"thread_id":456},"type":"profiler_initialized"}"#,
		r#"{"info":{"id":1,"process_id":7,"thread_id":456},"type":"method_called","function":{"module_id":789,"type_token":33554448,"function_token":100663313},"arguments":[{"index":0,"value":{"kind":"object","value":4096}}]}"#,
		r#"{"info":{"id":2,"process_id":7,"thread_id":456},"type":"method_returned","function":{"module_id":789,"type_token":33554448,"function_token":100663313}}"#,
		r#"{"info":{"id":3,"process_id":7,"thread_id":456},"type":"profiler_destroyed"}"#,
	];
	for line in trace {
		registry.dispatch(serde_json::from_str(line).unwrap()).unwrap();
	}

	assert_eq!(recorder.count(Kind::LockAcquireAttempted), 1);
	assert_eq!(recorder.count(Kind::LockAcquireReturned), 1);
	assert!(registry.is_empty());
}

#[derive(Default)]
struct CountingPlugin {
	calls: AtomicUsize,
	returns: AtomicUsize,
	acquired: AtomicUsize,
}

impl Plugin for CountingPlugin {
	fn name(&self) -> &str {
		"counting"
	}

	fn method_called(&self, _args: &EventArgs<'_>, _function: &FunctionInfo, _arguments: &[RawArgument]) {
		self.calls.fetch_add(1, Ordering::Relaxed);
	}

	fn method_returned(&self, _args: &EventArgs<'_>, _function: &FunctionInfo, _return_value: Option<&RawValue>, _by_ref_arguments: &[RawArgument]) {
		self.returns.fetch_add(1, Ordering::Relaxed);
	}

	fn lock_acquire_returned(&self, args: &EventArgs<'_>, object: &Arc<umbra_runtime::ShadowObject>, success: bool) {
		if success && object.sync_block().owner() == Some(args.thread.id()) {
			self.acquired.fetch_add(1, Ordering::Relaxed);
		}
	}
}

#[test]
fn plugin_host_visits_each_event() {
	let harness = Harness::new();
	let plugin = Arc::new(CountingPlugin::default());
	let host = PluginHost::new(vec![plugin.clone()]);
	host.attach(harness.scheduler.hub());
	assert_eq!(host.plugins()[0].name(), "counting");

	harness.start();
	harness.call(MAIN, USER_METHOD, Vec::new());
	harness.ret(MAIN, USER_METHOD, None);
	harness.enter(MAIN, 0x1000);
	harness.flush(MAIN);

	assert_eq!(plugin.calls.load(Ordering::Relaxed), 2);
	assert_eq!(plugin.returns.load(Ordering::Relaxed), 2);
	assert_eq!(plugin.acquired.load(Ordering::Relaxed), 1);
}

#[test]
fn panicking_handler_is_contained() {
	let harness = Harness::new();
	harness.scheduler.hub().subscribe(Kind::MethodCalled, |_, _| panic!("handler exploded"));
	harness.start();
	harness.call(MAIN, USER_METHOD, Vec::new());
	harness.ret(MAIN, USER_METHOD, None);
	harness.flush(MAIN);

	assert_eq!(harness.reports.count_category("plugin"), 1);
	assert_eq!(harness.recorder.count(Kind::MethodCalled), 1);
	assert_eq!(harness.recorder.count(Kind::MethodReturned), 1);
	assert_eq!(harness.shadow(MAIN).call_stack_depth(), 0);
}
