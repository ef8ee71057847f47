//! Scheduler harness shared by the integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use umbra_primitives::{FunctionInfo, NativeThreadId, NotificationId, ObjectAddress, ProcessId, RawArgument, RawEventInfo, RawValue};
use umbra_runtime::{
	HappensBeforeScheduler, Job, JobFlags, MethodDescriptorRegistry, RecordingCommandSink, ReportingService, RuntimeEvent, RuntimeEventKind, RuntimeEventsHub, SchedulerConfig, ShadowObject,
	ShadowRuntime, ShadowThread, StaticMetadataResolver,
};

pub const PID: u32 = 123;
pub const MAIN: usize = 456;
pub const MODULE: usize = 789;
pub const TIMEOUT: Duration = Duration::from_secs(5);

const MONITOR_TYPE: u32 = 0x0200_0010;
const DISPATCHER_TYPE: u32 = 0x0200_0020;

/// A method the metadata does not know; interpreted as a regular call.
pub const USER_METHOD: FunctionInfo = FunctionInfo::new(MODULE, 0x0200_0001, 0x0600_0001);
pub const ENTER: FunctionInfo = FunctionInfo::new(MODULE, MONITOR_TYPE, 0x0600_0011);
pub const EXIT: FunctionInfo = FunctionInfo::new(MODULE, MONITOR_TYPE, 0x0600_0012);
pub const WAIT: FunctionInfo = FunctionInfo::new(MODULE, MONITOR_TYPE, 0x0600_0013);
pub const PULSE: FunctionInfo = FunctionInfo::new(MODULE, MONITOR_TYPE, 0x0600_0014);
pub const FIELD_ACCESS: FunctionInfo = FunctionInfo::new(MODULE, DISPATCHER_TYPE, 0x0600_0021);
pub const FIELD_INSTANCE_ACCESS: FunctionInfo = FunctionInfo::new(MODULE, DISPATCHER_TYPE, 0x0600_0022);
pub const ARRAY_ELEMENT_ACCESS: FunctionInfo = FunctionInfo::new(MODULE, DISPATCHER_TYPE, 0x0600_0023);
pub const ARRAY_INSTANCE_ACCESS: FunctionInfo = FunctionInfo::new(MODULE, DISPATCHER_TYPE, 0x0600_0024);
pub const ARRAY_INDEX_ACCESS: FunctionInfo = FunctionInfo::new(MODULE, DISPATCHER_TYPE, 0x0600_0025);

const SYMBOLS: &[(FunctionInfo, &str)] = &[
	(ENTER, "System.Threading.Monitor::Enter"),
	(EXIT, "System.Threading.Monitor::Exit"),
	(WAIT, "System.Threading.Monitor::Wait"),
	(PULSE, "System.Threading.Monitor::Pulse"),
	(FIELD_ACCESS, "Umbra.Instrumentation.EventDispatcher::FieldAccess"),
	(FIELD_INSTANCE_ACCESS, "Umbra.Instrumentation.EventDispatcher::FieldInstanceAccess"),
	(ARRAY_ELEMENT_ACCESS, "Umbra.Instrumentation.EventDispatcher::ArrayElementAccess"),
	(ARRAY_INSTANCE_ACCESS, "Umbra.Instrumentation.EventDispatcher::ArrayInstanceAccess"),
	(ARRAY_INDEX_ACCESS, "Umbra.Instrumentation.EventDispatcher::ArrayIndexAccess"),
];

/// Metadata resolver that knows the monitor and dispatcher helpers above.
pub fn metadata() -> StaticMetadataResolver {
	let metadata = StaticMetadataResolver::new();
	for (function, name) in SYMBOLS {
		metadata.insert_method(function.module_id, function.function_token, *name);
	}
	metadata
}

pub fn test_config() -> SchedulerConfig {
	SchedulerConfig {
		sync_block_poll_ms: 2,
		shutdown_grace_ms: 100,
		..SchedulerConfig::default()
	}
}

pub fn object_arg(index: u16, address: usize) -> RawArgument {
	RawArgument::new(index, RawValue::Object(ObjectAddress(address)))
}

/// One event as seen by a hub handler.
#[derive(Debug, Clone)]
pub struct Recorded {
	pub thread: NativeThreadId,
	pub notification: NotificationId,
	pub event: RuntimeEvent,
}

/// Records every raised event in raise order.
pub struct Recorder {
	events: Mutex<Vec<Recorded>>,
	changed: Condvar,
}

impl Recorder {
	pub fn attach(hub: &RuntimeEventsHub) -> Arc<Self> {
		let recorder = Arc::new(Self {
			events: Mutex::new(Vec::new()),
			changed: Condvar::new(),
		});
		let sink = Arc::clone(&recorder);
		hub.subscribe_all(move |args, event| {
			sink.events.lock().push(Recorded {
				thread: args.thread.native_id(),
				notification: args.info.id,
				event: event.clone(),
			});
			sink.changed.notify_all();
		});
		recorder
	}

	pub fn events(&self) -> Vec<Recorded> {
		self.events.lock().clone()
	}

	pub fn count(&self, kind: RuntimeEventKind) -> usize {
		self.events.lock().iter().filter(|recorded| recorded.event.kind() == kind).count()
	}

	/// Kinds raised by the shadow thread of `native`, in order.
	pub fn kinds_on(&self, native: usize) -> Vec<RuntimeEventKind> {
		self.events
			.lock()
			.iter()
			.filter(|recorded| recorded.thread == NativeThreadId(native))
			.map(|recorded| recorded.event.kind())
			.collect()
	}

	pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&[Recorded]) -> bool) -> bool {
		let deadline = Instant::now() + timeout;
		let mut events = self.events.lock();
		loop {
			if predicate(&events) {
				return true;
			}
			if self.changed.wait_until(&mut events, deadline).timed_out() {
				return predicate(&events);
			}
		}
	}

	pub fn wait_count(&self, kind: RuntimeEventKind, count: usize) -> bool {
		self.wait_for(TIMEOUT, |events| events.iter().filter(|recorded| recorded.event.kind() == kind).count() >= count)
	}
}

/// A scheduler for process [`PID`] with a recorder and recording command sink.
pub struct Harness {
	pub scheduler: HappensBeforeScheduler,
	pub recorder: Arc<Recorder>,
	pub commands: Arc<RecordingCommandSink>,
	pub reports: ReportingService,
	next_id: AtomicU64,
}

impl Harness {
	pub fn new() -> Self {
		Self::with_config(test_config())
	}

	pub fn with_config(config: SchedulerConfig) -> Self {
		let reports = ReportingService::new();
		let commands = Arc::new(RecordingCommandSink::new());
		let runtime = Arc::new(ShadowRuntime::new(ProcessId(PID), reports.clone(), commands.clone(), Arc::new(metadata())));
		let hub = Arc::new(RuntimeEventsHub::new());
		let recorder = Recorder::attach(&hub);
		let scheduler = HappensBeforeScheduler::new(runtime, hub, Arc::new(MethodDescriptorRegistry::with_defaults()), config).unwrap();
		Self {
			scheduler,
			recorder,
			commands,
			reports,
			next_id: AtomicU64::new(0),
		}
	}

	/// Fresh envelope for a notification delivered on `native`.
	pub fn info(&self, native: usize) -> RawEventInfo {
		RawEventInfo::new(self.next_id.fetch_add(1, Ordering::Relaxed), PID, native)
	}

	/// `ProfilerInitialized` and `ModuleLoaded` on the main thread.
	pub fn start(&self) {
		self.scheduler.schedule_profiler_initialized(self.info(MAIN)).unwrap();
		self.scheduler
			.schedule_module_loaded(self.info(MAIN), umbra_primitives::ModuleId(MODULE), "/app/Program.dll".to_owned())
			.unwrap();
	}

	pub fn spawn(&self, native: usize) {
		self.scheduler.schedule_thread_created(self.info(MAIN), NativeThreadId(native)).unwrap();
	}

	pub fn call(&self, native: usize, function: FunctionInfo, arguments: Vec<RawArgument>) {
		self.scheduler.schedule_method_called(self.info(native), function, arguments).unwrap();
	}

	pub fn ret(&self, native: usize, function: FunctionInfo, return_value: Option<RawValue>) {
		self.scheduler.schedule_method_returned(self.info(native), function, return_value, Vec::new()).unwrap();
	}

	/// `Monitor.Enter(object)` that returned.
	pub fn enter(&self, native: usize, object: usize) {
		self.call(native, ENTER, vec![object_arg(0, object)]);
		self.ret(native, ENTER, None);
	}

	pub fn exit(&self, native: usize, object: usize) {
		self.call(native, EXIT, vec![object_arg(0, object)]);
		self.ret(native, EXIT, None);
	}

	pub fn field_access(&self, native: usize, field: u64, is_write: bool) {
		self.call(native, FIELD_ACCESS, vec![RawArgument::new(0, RawValue::Bool(is_write)), RawArgument::new(1, RawValue::U64(field))]);
		self.ret(native, FIELD_ACCESS, None);
	}

	pub fn shadow(&self, native: usize) -> Arc<ShadowThread> {
		self.scheduler.runtime().thread(NativeThreadId(native)).unwrap()
	}

	pub fn object(&self, address: usize) -> Arc<ShadowObject> {
		self.scheduler.runtime().memory().get(ObjectAddress(address)).unwrap()
	}

	/// Waits until everything queued on `native` so far has run.
	pub fn flush(&self, native: usize) {
		assert!(self.try_flush(native, TIMEOUT), "shadow thread {native:#x} did not drain");
	}

	/// Like [`flush`](Self::flush), but reports a timeout instead of failing.
	pub fn try_flush(&self, native: usize, timeout: Duration) -> bool {
		let (tx, rx) = mpsc::channel();
		let marker = Job::new(NotificationId(u64::MAX), JobFlags::CONCURRENT, "flush", move |_| {
			let _ = tx.send(());
			Ok(())
		});
		self.shadow(native).execute(marker).unwrap();
		rx.recv_timeout(timeout).is_ok()
	}

	pub fn terminate(&self) {
		self.scheduler.schedule_profiler_destroyed(self.info(MAIN)).unwrap();
	}
}
