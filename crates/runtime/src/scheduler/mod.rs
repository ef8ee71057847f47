//! Happens-before scheduler: routes notifications onto shadow threads.
//!
//! `schedule_*` methods run on whatever thread delivers the notification.
//! They only look up the target shadow thread, arm barriers and enqueue a
//! job; they never wait on a worker, except for teardown, which joins them.

pub(crate) mod barrier;
mod reaper;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use umbra_primitives::{FunctionInfo, GcGenerationRange, ModuleId, NativeThreadId, ObjectAddress, ProcessId, RawArgument, RawEventInfo, RawValue, SuspendReason, TypeInfo};
use umbra_worker::{GenerationClock, WorkerRecord, WorkerRegistry};

use self::barrier::BarrierCoordinator;
use self::reaper::Reaper;
use crate::config::SchedulerConfig;
use crate::epoch::EpochSource;
use crate::error::{JobError, Result, SchedulerError};
use crate::executor::RuntimeEventExecutor;
use crate::hub::RuntimeEventsHub;
use crate::metadata::MethodDescriptorRegistry;
use crate::notification::{NotificationPayload, RawNotification};
use crate::reporting::Report;
use crate::runtime::{Registration, RuntimeState, ShadowRuntime};
use crate::thread::{Job, JobFlags, ShadowThread, ShadowThreadId, WorkerExit};

/// Per-process scheduler.
///
/// Each target thread gets one [`ShadowThread`]; its jobs run in the order
/// their notifications were scheduled. Jobs not flagged
/// [`JobFlags::CONCURRENT`] additionally wait until the shared epoch has
/// caught up with the thread's local epoch, which is how suspend barriers
/// keep analysis from running ahead of a runtime checkpoint.
pub struct HappensBeforeScheduler {
	process_id: ProcessId,
	config: SchedulerConfig,
	runtime: Arc<ShadowRuntime>,
	hub: Arc<RuntimeEventsHub>,
	epoch: Arc<EpochSource>,
	executor: Arc<RuntimeEventExecutor>,
	barriers: Arc<Mutex<BarrierCoordinator>>,
	workers: WorkerRegistry,
	thread_ids: GenerationClock,
	reaper: Reaper,
	terminated: AtomicBool,
	last_heartbeat: Mutex<Instant>,
}

impl HappensBeforeScheduler {
	pub fn new(runtime: Arc<ShadowRuntime>, hub: Arc<RuntimeEventsHub>, descriptors: Arc<MethodDescriptorRegistry>, config: SchedulerConfig) -> Result<Self> {
		let process_id = runtime.process_id();
		let epoch = Arc::new(EpochSource::new());
		let barriers = Arc::new(Mutex::new(BarrierCoordinator::new()));
		let workers = WorkerRegistry::new();
		let reaper = Reaper::spawn(process_id, &workers)?;
		let executor = Arc::new(RuntimeEventExecutor::new(
			Arc::clone(&runtime),
			Arc::clone(&hub),
			descriptors,
			Arc::clone(&barriers),
			Arc::clone(&epoch),
			config.sync_block_poll(),
		));
		tracing::debug!(pid = %process_id, "scheduler.created");
		Ok(Self {
			process_id,
			config,
			runtime,
			hub,
			epoch,
			executor,
			barriers,
			workers,
			thread_ids: GenerationClock::new(),
			reaper,
			terminated: AtomicBool::new(false),
			last_heartbeat: Mutex::new(Instant::now()),
		})
	}

	pub fn process_id(&self) -> ProcessId {
		self.process_id
	}

	pub fn runtime(&self) -> &Arc<ShadowRuntime> {
		&self.runtime
	}

	pub fn hub(&self) -> &Arc<RuntimeEventsHub> {
		&self.hub
	}

	pub fn epoch(&self) -> &EpochSource {
		&self.epoch
	}

	pub fn config(&self) -> &SchedulerConfig {
		&self.config
	}

	/// Status of every worker this scheduler spawned, sorted by name.
	pub fn worker_snapshots(&self) -> Vec<WorkerRecord> {
		for thread in self.runtime.threads() {
			if let Some(name) = thread.worker_name() {
				self.workers.update(&name, |record| {
					record.processed = thread.processed();
					record.pending = thread.pending();
				});
			}
		}
		self.workers.snapshots()
	}

	pub fn last_heartbeat(&self) -> Instant {
		*self.last_heartbeat.lock()
	}

	pub fn is_terminated(&self) -> bool {
		self.terminated.load(Ordering::Acquire)
	}

	/// Number of suspend/resume barriers armed but not completed.
	pub fn pending_barriers(&self) -> usize {
		self.barriers.lock().pending()
	}

	/// Routes one raw notification to its `schedule_*` method.
	pub fn dispatch(&self, notification: RawNotification) -> Result<()> {
		let RawNotification { info, payload } = notification;
		match payload {
			NotificationPayload::Heartbeat => self.schedule_heartbeat(info),
			NotificationPayload::ProfilerInitialized => self.schedule_profiler_initialized(info),
			NotificationPayload::ProfilerDestroyed => self.schedule_profiler_destroyed(info),
			NotificationPayload::ModuleLoaded { module_id, path } => self.schedule_module_loaded(info, module_id, path),
			NotificationPayload::TypeLoaded { type_info } => self.schedule_type_loaded(info, type_info),
			NotificationPayload::JitCompilationStarted { function } => self.schedule_jit_compilation_started(info, function),
			NotificationPayload::ThreadCreated { thread_id } => self.schedule_thread_created(info, thread_id),
			NotificationPayload::ThreadRenamed { thread_id, name } => self.schedule_thread_renamed(info, thread_id, name),
			NotificationPayload::ThreadDestroyed { thread_id } => self.schedule_thread_destroyed(info, thread_id),
			NotificationPayload::RuntimeSuspendStarted { reason } => self.schedule_runtime_suspend_started(info, reason),
			NotificationPayload::RuntimeSuspendFinished => self.schedule_runtime_suspend_finished(info),
			NotificationPayload::RuntimeResumeStarted => self.schedule_runtime_resume_started(info),
			NotificationPayload::RuntimeResumeFinished => self.schedule_runtime_resume_finished(info),
			NotificationPayload::RuntimeThreadSuspended { thread_id } => self.schedule_runtime_thread_suspended(info, thread_id),
			NotificationPayload::RuntimeThreadResumed { thread_id } => self.schedule_runtime_thread_resumed(info, thread_id),
			NotificationPayload::GarbageCollectionStarted { generations_collected, bounds } => self.schedule_garbage_collection_started(info, generations_collected, bounds),
			NotificationPayload::GarbageCollectionFinished { bounds } => self.schedule_garbage_collection_finished(info, bounds),
			NotificationPayload::SurvivingReferences { block_starts, lengths } => self.schedule_surviving_references(info, block_starts, lengths),
			NotificationPayload::MovedReferences {
				old_block_starts,
				new_block_starts,
				lengths,
			} => self.schedule_moved_references(info, old_block_starts, new_block_starts, lengths),
			NotificationPayload::MethodCalled { function, arguments } => self.schedule_method_called(info, function, arguments),
			NotificationPayload::MethodReturned {
				function,
				return_value,
				by_ref_arguments,
			} => self.schedule_method_returned(info, function, return_value, by_ref_arguments),
		}
	}

	fn ensure_live(&self) -> Result<()> {
		if self.is_terminated() {
			return Err(SchedulerError::Terminated(self.process_id));
		}
		Ok(())
	}

	fn thread(&self, native: NativeThreadId) -> Result<Arc<ShadowThread>> {
		self.runtime.thread(native).ok_or(SchedulerError::UnknownThread {
			process: self.process_id,
			thread: native,
		})
	}

	/// Enqueues `body` on `thread`. The job runs inside a span naming the notification.
	fn submit(&self, thread: &ShadowThread, info: RawEventInfo, flags: JobFlags, label: &'static str, body: impl FnOnce(&RuntimeEventExecutor, &ShadowThread, &RawEventInfo) -> Result<(), JobError> + Send + 'static) -> Result<()> {
		let span = tracing::debug_span!("notification", id = %info.id, kind = label);
		let job = {
			let _enter = span.enter();
			let executor = Arc::clone(&self.executor);
			Job::new(info.id, flags, label, move |thread| body(&executor, thread, &info))
		};
		thread.execute(job).map_err(|source| SchedulerError::JobRejected {
			thread: thread.id(),
			notification: info.id,
			source,
		})
	}

	/// Creates, starts and registers a shadow thread. `None` if `native` is already live.
	///
	/// The virtual id is only allocated for a new thread, and a session
	/// already torn down gets no new workers.
	fn spawn_thread(&self, native: NativeThreadId) -> Result<Option<Arc<ShadowThread>>> {
		let registration = self.runtime.register_thread(native, || -> Result<Arc<ShadowThread>> {
			let id = ShadowThreadId(self.thread_ids.next());
			let thread = ShadowThread::new(self.process_id, native, id, Arc::clone(&self.epoch), self.runtime.reports().clone());
			thread.start(&self.config.thread_name_prefix, &self.workers)?;
			Ok(thread)
		})?;
		match registration {
			Registration::Registered(thread) => {
				tracing::debug!(pid = %self.process_id, thread = %native, vid = %thread.id(), "scheduler.thread.created");
				Ok(Some(thread))
			}
			Registration::Duplicate => Ok(None),
			Registration::Closed => Err(SchedulerError::Terminated(self.process_id)),
		}
	}

	/// Creates the bootstrap shadow thread and moves the runtime to `Executing`.
	pub fn schedule_profiler_initialized(&self, info: RawEventInfo) -> Result<()> {
		self.ensure_live()?;
		let thread = match self.runtime.thread(info.thread_id) {
			Some(thread) => thread,
			None => match self.spawn_thread(info.thread_id)? {
				Some(thread) => thread,
				None => self.thread(info.thread_id)?,
			},
		};
		self.submit(&thread, info, JobFlags::CONCURRENT, "profiler_initialized", |executor, thread, info| executor.profiler_initialized(thread, info))
	}

	/// Terminates the session: closes every queue and joins every worker.
	///
	/// Blocks until the workers have exited. Jobs that still make progress
	/// drain; once no worker progresses for `shutdown_grace_ms`, the epoch
	/// source is closed and parked workers are cancelled.
	pub fn schedule_profiler_destroyed(&self, info: RawEventInfo) -> Result<()> {
		self.teardown(Some(info))
	}

	/// Tears the session down without a `ProfilerDestroyed` event.
	pub fn shutdown(&self) -> Result<()> {
		self.teardown(None)
	}

	fn teardown(&self, info: Option<RawEventInfo>) -> Result<()> {
		if self.terminated.swap(true, Ordering::AcqRel) {
			return Err(SchedulerError::Terminated(self.process_id));
		}
		if let Err(err) = self.runtime.transition(RuntimeState::Terminated) {
			tracing::warn!(pid = %self.process_id, error = %err, "scheduler.teardown.transition");
		}
		if let Some(info) = info
			&& let Some(thread) = self.destroyed_event_carrier(info.thread_id)
			&& let Err(err) = self.submit(&thread, info, JobFlags::CONCURRENT, "profiler_destroyed", |executor, thread, info| executor.profiler_destroyed(thread, info))
		{
			tracing::warn!(pid = %self.process_id, error = %err, "scheduler.teardown.event_rejected");
		}

		let threads = self.runtime.take_threads();
		tracing::debug!(pid = %self.process_id, threads = threads.len(), held = self.reaper.held().len(), "scheduler.teardown");
		for thread in &threads {
			thread.close();
		}
		self.await_workers(&threads);
		for thread in &threads {
			if let Some(WorkerExit::Faulted { reason, .. }) = thread.join() {
				tracing::warn!(pid = %self.process_id, vid = %thread.id(), reason = %reason, "scheduler.teardown.worker_faulted");
			}
		}
		self.reaper.shutdown();
		self.epoch.close();
		tracing::debug!(pid = %self.process_id, "scheduler.terminated");
		Ok(())
	}

	/// Picks the shadow thread that raises `ProfilerDestroyed`.
	///
	/// Falls back to the lowest live virtual id when the reporting native
	/// thread is unknown or already destroyed.
	fn destroyed_event_carrier(&self, native: NativeThreadId) -> Option<Arc<ShadowThread>> {
		if let Some(thread) = self.runtime.thread(native) {
			return Some(thread);
		}
		let fallback = self.runtime.threads().into_iter().next();
		match &fallback {
			Some(thread) => tracing::warn!(pid = %self.process_id, thread = %native, vid = %thread.id(), "scheduler.teardown.event_rerouted"),
			None => tracing::warn!(pid = %self.process_id, thread = %native, "scheduler.teardown.event_dropped"),
		}
		fallback
	}

	/// Waits for every worker to exit, escalating once progress stalls.
	fn await_workers(&self, threads: &[Arc<ShadowThread>]) {
		let grace = self.config.shutdown_grace();
		let poll = self.config.sync_block_poll();
		let mut last_progress = None;
		let mut last_change = Instant::now();
		loop {
			let held = self.reaper.held();
			let all = || threads.iter().chain(held.iter());
			if all().all(|thread| thread.is_finished()) {
				return;
			}
			let progress: u64 = all().map(|thread| thread.progress()).sum();
			if last_progress != Some(progress) {
				last_progress = Some(progress);
				last_change = Instant::now();
			} else if last_change.elapsed() >= grace {
				let stuck: Vec<_> = all().filter(|thread| !thread.is_finished()).map(|thread| thread.id().to_string()).collect();
				tracing::warn!(pid = %self.process_id, stuck = ?stuck, "scheduler.teardown.stalled");
				self.epoch.close();
				for thread in all() {
					thread.cancel();
				}
				return;
			}
			std::thread::sleep(poll);
		}
	}

	pub fn schedule_module_loaded(&self, info: RawEventInfo, module: ModuleId, path: String) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(info.thread_id)?;
		self.submit(&thread, info, JobFlags::CONCURRENT, "module_loaded", move |executor, thread, info| executor.module_loaded(thread, info, module, path))
	}

	pub fn schedule_type_loaded(&self, info: RawEventInfo, ty: TypeInfo) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(info.thread_id)?;
		self.submit(&thread, info, JobFlags::CONCURRENT, "type_loaded", move |executor, thread, info| executor.type_loaded(thread, info, ty))
	}

	pub fn schedule_jit_compilation_started(&self, info: RawEventInfo, function: FunctionInfo) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(info.thread_id)?;
		self.submit(&thread, info, JobFlags::CONCURRENT, "jit_compilation_started", move |executor, thread, info| {
			executor.jit_compilation_started(thread, info, function)
		})
	}

	/// Registers a shadow thread for `native`. A duplicate is reported and ignored.
	pub fn schedule_thread_created(&self, info: RawEventInfo, native: NativeThreadId) -> Result<()> {
		self.ensure_live()?;
		let Some(thread) = self.spawn_thread(native)? else {
			self.runtime
				.reports()
				.report(Report::warning("protocol", format!("thread {native} created twice")).with_event(&info));
			return Ok(());
		};
		self.submit(&thread, info, JobFlags::CONCURRENT, "thread_created", |executor, thread, info| executor.thread_created(thread, info))
	}

	pub fn schedule_thread_renamed(&self, info: RawEventInfo, native: NativeThreadId, name: String) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(native)?;
		self.submit(&thread, info, JobFlags::CONCURRENT, "thread_renamed", move |executor, thread, info| executor.thread_renamed(thread, info, name))
	}

	/// Queues the final job for `native`, closes its queue and hands it to the reaper.
	pub fn schedule_thread_destroyed(&self, info: RawEventInfo, native: NativeThreadId) -> Result<()> {
		self.ensure_live()?;
		let Some(thread) = self.runtime.remove_thread(native) else {
			return Err(SchedulerError::UnknownThread {
				process: self.process_id,
				thread: native,
			});
		};
		let submitted = self.submit(&thread, info, JobFlags::CONCURRENT, "thread_destroyed", |executor, thread, info| executor.thread_destroyed(thread, info));
		if submitted.is_err() {
			// The worker faulted; its final job never runs, so release its barriers here.
			self.barriers.lock().forget(thread.id());
		}
		thread.close();
		tracing::debug!(pid = %self.process_id, thread = %native, vid = %thread.id(), pending = thread.pending(), "scheduler.thread.destroyed");
		self.reaper.reap(thread);
		submitted
	}

	/// Arms a suspend barrier over every live thread and queues the initiator's arrival.
	pub fn schedule_runtime_suspend_started(&self, info: RawEventInfo, reason: SuspendReason) -> Result<()> {
		self.ensure_live()?;
		let initiator = self.thread(info.thread_id)?;
		let (barrier, target) = self
			.barriers
			.lock()
			.arm_suspend(initiator.id(), reason, self.runtime.thread_ids(), Instant::now());
		tracing::debug!(pid = %self.process_id, barrier, epoch = target, reason = reason.as_str(), "scheduler.suspend.armed");
		self.submit(&initiator, info, JobFlags::empty(), "runtime_suspend_started", move |executor, thread, info| {
			executor.runtime_suspend_started(thread, info, barrier, target, reason)
		})
	}

	/// Completion is derived from thread arrivals; the runtime's own notice is only logged.
	pub fn schedule_runtime_suspend_finished(&self, info: RawEventInfo) -> Result<()> {
		self.ensure_live()?;
		tracing::debug!(pid = %self.process_id, notification = %info.id, pending = self.pending_barriers(), "scheduler.suspend.finished_notice");
		Ok(())
	}

	/// Arms a resume barrier over the surviving suspend cohort.
	pub fn schedule_runtime_resume_started(&self, info: RawEventInfo) -> Result<()> {
		self.ensure_live()?;
		let initiator = self.thread(info.thread_id)?;
		let barrier = self.barriers.lock().arm_resume(initiator.id(), &self.runtime.thread_ids(), Instant::now());
		tracing::debug!(pid = %self.process_id, barrier, "scheduler.resume.armed");
		self.submit(&initiator, info, JobFlags::empty(), "runtime_resume_started", move |executor, thread, info| {
			executor.runtime_resume_started(thread, info, barrier)
		})
	}

	pub fn schedule_runtime_resume_finished(&self, info: RawEventInfo) -> Result<()> {
		self.ensure_live()?;
		tracing::debug!(pid = %self.process_id, notification = %info.id, pending = self.pending_barriers(), "scheduler.resume.finished_notice");
		Ok(())
	}

	/// Queued on the suspended thread itself, behind everything it still has to run.
	pub fn schedule_runtime_thread_suspended(&self, info: RawEventInfo, native: NativeThreadId) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(native)?;
		self.submit(&thread, info, JobFlags::CONCURRENT, "runtime_thread_suspended", |executor, thread, info| {
			executor.runtime_thread_suspended(thread, info)
		})
	}

	pub fn schedule_runtime_thread_resumed(&self, info: RawEventInfo, native: NativeThreadId) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(native)?;
		self.submit(&thread, info, JobFlags::empty(), "runtime_thread_resumed", |executor, thread, info| executor.runtime_thread_resumed(thread, info))
	}

	pub fn schedule_garbage_collection_started(&self, info: RawEventInfo, generations_collected: Vec<bool>, bounds: Vec<GcGenerationRange>) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(info.thread_id)?;
		self.submit(&thread, info, JobFlags::empty(), "garbage_collection_started", move |executor, thread, info| {
			executor.garbage_collection_started(thread, info, generations_collected, bounds)
		})
	}

	pub fn schedule_surviving_references(&self, info: RawEventInfo, block_starts: Vec<ObjectAddress>, lengths: Vec<usize>) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(info.thread_id)?;
		self.submit(&thread, info, JobFlags::empty(), "surviving_references", move |executor, thread, info| {
			executor.surviving_references(thread, info, block_starts, lengths)
		})
	}

	pub fn schedule_moved_references(&self, info: RawEventInfo, old_block_starts: Vec<ObjectAddress>, new_block_starts: Vec<ObjectAddress>, lengths: Vec<usize>) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(info.thread_id)?;
		self.submit(&thread, info, JobFlags::empty(), "moved_references", move |executor, thread, info| {
			executor.moved_references(thread, info, old_block_starts, new_block_starts, lengths)
		})
	}

	pub fn schedule_garbage_collection_finished(&self, info: RawEventInfo, bounds: Vec<GcGenerationRange>) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(info.thread_id)?;
		self.submit(&thread, info, JobFlags::empty(), "garbage_collection_finished", move |executor, thread, info| {
			executor.garbage_collection_finished(thread, info, bounds)
		})
	}

	pub fn schedule_method_called(&self, info: RawEventInfo, function: FunctionInfo, arguments: Vec<RawArgument>) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(info.thread_id)?;
		self.submit(&thread, info, JobFlags::empty(), "method_called", move |executor, thread, info| {
			executor.method_called(thread, info, function, arguments)
		})
	}

	pub fn schedule_method_returned(&self, info: RawEventInfo, function: FunctionInfo, return_value: Option<RawValue>, by_ref_arguments: Vec<RawArgument>) -> Result<()> {
		self.ensure_live()?;
		let thread = self.thread(info.thread_id)?;
		self.submit(&thread, info, JobFlags::empty(), "method_returned", move |executor, thread, info| {
			executor.method_returned(thread, info, function, return_value, by_ref_arguments)
		})
	}

	/// Records liveness and reports suspend/resume barriers pending for too long.
	pub fn schedule_heartbeat(&self, info: RawEventInfo) -> Result<()> {
		self.ensure_live()?;
		let now = Instant::now();
		*self.last_heartbeat.lock() = now;
		let stalled = self.barriers.lock().stalled(now, self.config.barrier_stall_warning());
		for barrier in stalled {
			let remaining: Vec<_> = barrier.remaining.iter().map(ToString::to_string).collect();
			let message = format!(
				"{} barrier {} pending for {}ms, waiting on [{}]",
				barrier.kind,
				barrier.id,
				barrier.waited.as_millis(),
				remaining.join(", ")
			);
			self.runtime.reports().report(Report::warning("barrier", message).with_event(&info));
		}
		Ok(())
	}
}

impl Drop for HappensBeforeScheduler {
	fn drop(&mut self) {
		if !self.is_terminated() {
			let _ = self.shutdown();
		}
	}
}

impl std::fmt::Debug for HappensBeforeScheduler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HappensBeforeScheduler")
			.field("process_id", &self.process_id)
			.field("state", &self.runtime.state())
			.field("epoch", &self.epoch.current())
			.field("threads", &self.runtime.thread_count())
			.field("terminated", &self.is_terminated())
			.finish_non_exhaustive()
	}
}
