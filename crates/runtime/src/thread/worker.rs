use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use umbra_worker::{MailboxReceiver, WorkerRegistry};

use super::{Job, ShadowThread, WorkerExit};
use crate::error::JobError;
use crate::reporting::Report;

/// Job loop of one shadow thread.
///
/// Dequeue, wait for the epoch unless the job is concurrent, run. Job
/// failures are contained here: panics and interrupted waits are logged and
/// the loop continues; an invariant break stops this worker only.
pub(super) fn run(thread: &Arc<ShadowThread>, jobs: MailboxReceiver<Job>, workers: &WorkerRegistry, name: &str) -> WorkerExit {
	let span = tracing::debug_span!("shadow_thread", pid = %thread.process_id(), tid = %thread.native_id(), vid = %thread.id());
	let _guard = span.enter();

	while let Some(job) = jobs.recv() {
		if !job.is_concurrent() {
			let target = thread.local_epoch();
			if let Err(err) = thread.epoch().wait_until(target) {
				tracing::debug!(error = %err, "shadow_thread.epoch.closed");
				thread.discard(&job, "epoch source closed");
				continue;
			}
		}

		let Job {
			notification,
			label,
			span: job_span,
			action,
			..
		} = job;
		let outcome = {
			let _job_guard = job_span.enter();
			catch_unwind(AssertUnwindSafe(|| action(&**thread)))
		};
		thread.count_processed();

		match outcome {
			Ok(Ok(())) => {}
			Ok(Err(JobError::Interrupted(err))) => {
				tracing::debug!(notification = %notification, job = label, error = %err, "shadow_thread.job.interrupted");
			}
			Ok(Err(JobError::Invariant(reason))) => {
				tracing::error!(notification = %notification, job = label, reason = %reason, "shadow_thread.job.invariant");
				let mut report = Report::error("invariant", format!("{label} job for {notification} stopped shadow thread {}: {reason}", thread.id())).with_process(thread.process_id());
				report.thread = Some(thread.native_id());
				report.notification = Some(notification);
				thread.reports().report(report);

				thread.close();
				for job in jobs.drain() {
					thread.discard(&job, "worker faulted");
				}
				let exit = WorkerExit::Faulted {
					reason,
					processed: thread.processed(),
					discarded: thread.discarded(),
				};
				record_exit(workers, name, thread, &exit);
				return exit;
			}
			Err(payload) => {
				let reason = umbra_worker::panic_message(payload.as_ref());
				tracing::error!(notification = %notification, job = label, reason = %reason, "shadow_thread.job.panicked");
				let mut report = Report::error("plugin", format!("{label} job for {notification} panicked: {reason}")).with_process(thread.process_id());
				report.thread = Some(thread.native_id());
				report.notification = Some(notification);
				thread.reports().report(report);
			}
		}
	}

	let exit = WorkerExit::Drained {
		processed: thread.processed(),
		discarded: thread.discarded(),
	};
	tracing::debug!(processed = thread.processed(), discarded = thread.discarded(), "shadow_thread.worker.exit");
	record_exit(workers, name, thread, &exit);
	exit
}

fn record_exit(workers: &WorkerRegistry, name: &str, thread: &ShadowThread, exit: &WorkerExit) {
	workers.update(name, |record| {
		record.processed = thread.processed();
		record.pending = 0;
		record.last_exit = Some(format!("{exit:?}"));
	});
}
