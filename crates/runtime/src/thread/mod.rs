//! Shadow threads: one ordered job queue and one OS worker per target thread.

mod call_stack;
mod operation;
mod worker;


use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};
use umbra_primitives::{NativeThreadId, NotificationId, ProcessId};
use umbra_worker::{CancelToken, Mailbox, MailboxReceiver, MailboxSendError, MailboxSender, TaskClass, WorkerRecord, WorkerRegistry};

pub use self::call_stack::CallFrame;
use self::call_stack::CallStack;
pub use self::operation::OperationContext;
use crate::epoch::EpochSource;
use crate::error::{JobError, SchedulerError, ShadowThreadError};
use crate::reporting::ReportingService;

/// Dense identifier assigned to a shadow thread at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShadowThreadId(pub u64);

impl fmt::Display for ShadowThreadId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "vt{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
	Running,
	Suspended,
	GarbageCollecting,
}

bitflags! {
	/// Scheduling flags attached to a [`Job`].
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct JobFlags: u8 {
		/// Runs without waiting for the shared epoch to reach the thread's epoch.
		const CONCURRENT = 1 << 0;
	}
}

type JobAction = Box<dyn FnOnce(&ShadowThread) -> Result<(), JobError> + Send>;

/// One unit of work bound to a shadow thread's queue.
pub struct Job {
	pub notification: NotificationId,
	pub flags: JobFlags,
	/// Short name used in logs.
	pub label: &'static str,
	span: tracing::Span,
	action: JobAction,
}

impl Job {
	/// Builds a job. The current tracing span is captured and re-entered on the worker.
	pub fn new(notification: NotificationId, flags: JobFlags, label: &'static str, action: impl FnOnce(&ShadowThread) -> Result<(), JobError> + Send + 'static) -> Self {
		Self {
			notification,
			flags,
			label,
			span: tracing::Span::current(),
			action: Box::new(action),
		}
	}

	pub fn is_concurrent(&self) -> bool {
		self.flags.contains(JobFlags::CONCURRENT)
	}
}

impl fmt::Debug for Job {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Job")
			.field("notification", &self.notification)
			.field("flags", &self.flags)
			.field("label", &self.label)
			.finish_non_exhaustive()
	}
}

/// How a shadow thread worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
	/// Queue closed and drained.
	Drained { processed: u64, discarded: u64 },
	/// An invariant break stopped the worker; the rest of the queue was discarded.
	Faulted { reason: String, processed: u64, discarded: u64 },
}

/// Analysis-side mirror of one target thread.
///
/// Any thread may [`execute`](Self::execute) jobs; exactly one worker,
/// started by [`start`](Self::start), consumes them in enqueue order.
pub struct ShadowThread {
	process_id: ProcessId,
	native_id: NativeThreadId,
	id: ShadowThreadId,
	name: Mutex<Option<String>>,
	state: Mutex<ThreadState>,
	local_epoch: AtomicU64,
	call_stack: Mutex<CallStack>,
	operations: Mutex<OperationContext>,
	jobs: MailboxSender<Job>,
	receiver: Mutex<Option<MailboxReceiver<Job>>>,
	worker: Mutex<Option<JoinHandle<WorkerExit>>>,
	worker_name: Mutex<Option<String>>,
	epoch: Arc<EpochSource>,
	cancel: CancelToken,
	processed: AtomicU64,
	discarded: AtomicU64,
	reports: ReportingService,
}

impl ShadowThread {
	/// Creates a stopped shadow thread in state `Running` at local epoch 0.
	pub fn new(process_id: ProcessId, native_id: NativeThreadId, id: ShadowThreadId, epoch: Arc<EpochSource>, reports: ReportingService) -> Arc<Self> {
		let (jobs, receiver) = Mailbox::new().split();
		Arc::new(Self {
			process_id,
			native_id,
			id,
			name: Mutex::new(None),
			state: Mutex::new(ThreadState::Running),
			local_epoch: AtomicU64::new(0),
			call_stack: Mutex::new(CallStack::default()),
			operations: Mutex::new(OperationContext::default()),
			jobs,
			receiver: Mutex::new(Some(receiver)),
			worker: Mutex::new(None),
			worker_name: Mutex::new(None),
			epoch,
			cancel: CancelToken::new(),
			processed: AtomicU64::new(0),
			discarded: AtomicU64::new(0),
			reports,
		})
	}

	/// Spawns the worker loop. A second call fails with `AlreadyStarted`.
	pub fn start(self: &Arc<Self>, name_prefix: &str, workers: &WorkerRegistry) -> Result<(), SchedulerError> {
		let Some(receiver) = self.receiver.lock().take() else {
			return Err(ShadowThreadError::AlreadyStarted(self.id).into());
		};
		let name = format!("{name_prefix}-{}-{}", self.process_id, self.id.0);
		workers.upsert(WorkerRecord::new(name.clone(), TaskClass::ShadowThread, self.id.0));
		let thread = Arc::clone(self);
		let registry = workers.clone();
		let record_name = name.clone();
		let handle = match umbra_worker::spawn_named_thread(TaskClass::ShadowThread, name.clone(), move || worker::run(&thread, receiver, &registry, &record_name)) {
			Ok(handle) => handle,
			Err(error) => {
				workers.remove(&name);
				return Err(SchedulerError::Spawn { name, error });
			}
		};
		*self.worker_name.lock() = Some(name);
		*self.worker.lock() = Some(handle);
		tracing::debug!(pid = %self.process_id, thread = %self.native_id, vid = %self.id, "shadow_thread.started");
		Ok(())
	}

	/// Enqueues a job without blocking.
	///
	/// A closed queue rejects the job; the rejection is logged and counted
	/// as a discard.
	pub fn execute(&self, job: Job) -> Result<(), ShadowThreadError> {
		match self.jobs.send(job) {
			Ok(()) => Ok(()),
			Err(MailboxSendError::Closed(job)) => {
				self.discard(&job, "queue closed");
				Err(ShadowThreadError::Closed(self.id))
			}
		}
	}

	pub(crate) fn discard(&self, job: &Job, reason: &str) {
		self.discarded.fetch_add(1, Ordering::Relaxed);
		tracing::warn!(pid = %self.process_id, vid = %self.id, notification = %job.notification, job = job.label, reason, "shadow_thread.job.discarded");
	}

	/// Records that this thread reached the next checkpoint. Returns the new local epoch.
	pub fn enter_new_epoch(&self) -> u64 {
		self.local_epoch.fetch_add(1, Ordering::AcqRel) + 1
	}

	/// Raises the local epoch to `target`. Never lowers it.
	pub fn enter_epoch(&self, target: u64) -> u64 {
		self.local_epoch.fetch_max(target, Ordering::AcqRel).max(target)
	}

	pub fn local_epoch(&self) -> u64 {
		self.local_epoch.load(Ordering::Acquire)
	}

	pub fn push_call_stack(&self, frame: CallFrame) {
		self.call_stack.lock().push(frame);
	}

	/// Pops the innermost frame. An empty stack means a missed method-enter upstream.
	pub fn pop_call_stack(&self) -> Result<CallFrame, ShadowThreadError> {
		self.call_stack.lock().pop().ok_or(ShadowThreadError::EmptyCallStack(self.id))
	}

	pub fn peek_call_stack(&self) -> Option<CallFrame> {
		self.call_stack.lock().peek().cloned()
	}

	pub fn call_stack_depth(&self) -> usize {
		self.call_stack.lock().depth()
	}

	pub fn operations(&self) -> MutexGuard<'_, OperationContext> {
		self.operations.lock()
	}

	pub fn set_name(&self, name: impl Into<String>) {
		let name = name.into();
		tracing::debug!(vid = %self.id, name = %name, "shadow_thread.renamed");
		*self.name.lock() = Some(name);
	}

	pub fn name(&self) -> Option<String> {
		self.name.lock().clone()
	}

	pub fn state(&self) -> ThreadState {
		*self.state.lock()
	}

	pub(crate) fn set_state(&self, state: ThreadState) {
		let mut current = self.state.lock();
		if *current != state {
			tracing::trace!(vid = %self.id, from = ?*current, to = ?state, "shadow_thread.state");
			*current = state;
		}
	}

	pub fn id(&self) -> ShadowThreadId {
		self.id
	}

	pub fn native_id(&self) -> NativeThreadId {
		self.native_id
	}

	pub fn process_id(&self) -> ProcessId {
		self.process_id
	}

	pub fn cancel_token(&self) -> &CancelToken {
		&self.cancel
	}

	/// Interrupts a job parked on a contended monitor.
	pub fn cancel(&self) {
		if self.cancel.cancel() {
			tracing::debug!(vid = %self.id, "shadow_thread.cancelled");
		}
	}

	/// Closes the queue. Already queued jobs still drain.
	pub fn close(&self) -> bool {
		self.jobs.close()
	}

	pub fn is_closed(&self) -> bool {
		self.jobs.is_closed()
	}

	pub fn pending(&self) -> usize {
		self.jobs.len()
	}

	pub fn processed(&self) -> u64 {
		self.processed.load(Ordering::Relaxed)
	}

	pub fn discarded(&self) -> u64 {
		self.discarded.load(Ordering::Relaxed)
	}

	/// Monotonic count of jobs taken off the queue (run or discarded).
	pub fn progress(&self) -> u64 {
		self.processed() + self.discarded()
	}

	pub fn is_finished(&self) -> bool {
		self.worker.lock().as_ref().is_none_or(JoinHandle::is_finished)
	}

	/// Joins the worker. `None` if it was never started or already joined.
	pub fn join(&self) -> Option<WorkerExit> {
		let handle = self.worker.lock().take()?;
		match handle.join() {
			Ok(exit) => Some(exit),
			Err(payload) => {
				let reason = umbra_worker::panic_message(payload.as_ref());
				tracing::error!(vid = %self.id, reason = %reason, "shadow_thread.worker.panicked");
				Some(WorkerExit::Faulted {
					reason,
					processed: self.processed(),
					discarded: self.discarded(),
				})
			}
		}
	}

	pub fn worker_name(&self) -> Option<String> {
		self.worker_name.lock().clone()
	}

	pub(crate) fn epoch(&self) -> &EpochSource {
		&self.epoch
	}

	pub(crate) fn reports(&self) -> &ReportingService {
		&self.reports
	}

	pub(crate) fn count_processed(&self) {
		self.processed.fetch_add(1, Ordering::Relaxed);
	}
}

impl fmt::Debug for ShadowThread {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ShadowThread")
			.field("process_id", &self.process_id)
			.field("native_id", &self.native_id)
			.field("id", &self.id)
			.field("state", &self.state())
			.field("local_epoch", &self.local_epoch())
			.finish_non_exhaustive()
	}
}
