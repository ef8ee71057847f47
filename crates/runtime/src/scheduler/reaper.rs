use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use umbra_primitives::ProcessId;
use umbra_worker::{Mailbox, MailboxSendError, MailboxSender, TaskClass, WorkerRecord, WorkerRegistry};

use crate::error::SchedulerError;
use crate::thread::{ShadowThread, WorkerExit};

/// Joins destroyed shadow threads off the delivery path.
///
/// Threads stay in `held` until joined so teardown can still cancel a
/// worker parked on a monitor. A joined thread's worker record is dropped
/// from the registry.
pub(crate) struct Reaper {
	sender: MailboxSender<Arc<ShadowThread>>,
	held: Arc<Mutex<Vec<Arc<ShadowThread>>>>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
	pub(crate) fn spawn(process_id: ProcessId, workers: &WorkerRegistry) -> Result<Self, SchedulerError> {
		let (sender, receiver) = Mailbox::<Arc<ShadowThread>>::new().split();
		let held: Arc<Mutex<Vec<Arc<ShadowThread>>>> = Arc::new(Mutex::new(Vec::new()));
		let name = format!("reaper-{process_id}");
		workers.upsert(WorkerRecord::new(name.clone(), TaskClass::Reaper, 0));

		let loop_held = Arc::clone(&held);
		let registry = workers.clone();
		let record_name = name.clone();
		let handle = umbra_worker::spawn_named_thread(TaskClass::Reaper, name.clone(), move || {
			let mut reaped = 0u64;
			while let Some(thread) = receiver.recv() {
				let exit = thread.join();
				log_exit(&thread, exit.as_ref());
				if let Some(name) = thread.worker_name() {
					registry.remove(&name);
				}
				loop_held.lock().retain(|held| !Arc::ptr_eq(held, &thread));
				reaped += 1;
				registry.update(&record_name, |record| {
					record.processed = reaped;
					record.pending = receiver.len();
				});
			}
			tracing::debug!(pid = %process_id, reaped, "reaper.exit");
		})
		.map_err(|error| SchedulerError::Spawn { name, error })?;

		Ok(Self {
			sender,
			held,
			handle: Mutex::new(Some(handle)),
		})
	}

	/// Hands over a thread whose queue is already closed.
	pub(crate) fn reap(&self, thread: Arc<ShadowThread>) {
		self.held.lock().push(Arc::clone(&thread));
		if let Err(MailboxSendError::Closed(thread)) = self.sender.send(thread) {
			tracing::debug!(vid = %thread.id(), "reaper.closed");
		}
	}

	/// Threads handed over but not joined yet.
	pub(crate) fn held(&self) -> Vec<Arc<ShadowThread>> {
		self.held.lock().clone()
	}

	/// Stops the reaper and joins every thread it still holds.
	pub(crate) fn shutdown(&self) {
		self.sender.close();
		if let Some(handle) = self.handle.lock().take()
			&& handle.join().is_err()
		{
			tracing::error!("reaper.panicked");
		}
		let rest = std::mem::take(&mut *self.held.lock());
		for thread in rest {
			let exit = thread.join();
			log_exit(&thread, exit.as_ref());
		}
	}
}

fn log_exit(thread: &ShadowThread, exit: Option<&WorkerExit>) {
	match exit {
		Some(WorkerExit::Faulted { reason, .. }) => tracing::warn!(vid = %thread.id(), reason = %reason, "reaper.joined.faulted"),
		Some(exit) => tracing::debug!(vid = %thread.id(), ?exit, "reaper.joined"),
		None => {}
	}
}
