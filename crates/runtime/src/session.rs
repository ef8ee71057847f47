//! Per-process sessions keyed by process id.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rustc_hash::FxHashMap as HashMap;
use umbra_primitives::ProcessId;

use crate::commands::CommandSink;
use crate::config::{RuntimeConfig, SchedulerConfig};
use crate::error::{Result, SchedulerError};
use crate::hub::RuntimeEventsHub;
use crate::metadata::{MetadataResolver, MethodDescriptorRegistry, StaticMetadataResolver};
use crate::notification::{NotificationPayload, RawNotification};
use crate::reporting::{Report, ReportingService};
use crate::runtime::ShadowRuntime;
use crate::scheduler::HappensBeforeScheduler;

/// Demultiplexes notifications from any number of profiled processes.
///
/// A session starts with `ProfilerInitialized` and ends with
/// `ProfilerDestroyed`, a missed watchdog deadline, or [`shutdown`](Self::shutdown).
/// Every session shares the registry's hub, reporting service, command sink
/// and metadata.
pub struct SessionRegistry {
	config: SchedulerConfig,
	hub: Arc<RuntimeEventsHub>,
	reports: ReportingService,
	commands: Arc<dyn CommandSink>,
	metadata: Arc<dyn MetadataResolver>,
	descriptors: Arc<MethodDescriptorRegistry>,
	sessions: RwLock<HashMap<ProcessId, Arc<HappensBeforeScheduler>>>,
}

impl SessionRegistry {
	pub fn new(
		config: SchedulerConfig,
		hub: Arc<RuntimeEventsHub>,
		reports: ReportingService,
		commands: Arc<dyn CommandSink>,
		metadata: Arc<dyn MetadataResolver>,
		descriptors: Arc<MethodDescriptorRegistry>,
	) -> Self {
		Self {
			config,
			hub,
			reports,
			commands,
			metadata,
			descriptors,
			sessions: RwLock::new(HashMap::default()),
		}
	}

	/// Builds a registry whose metadata and method descriptors come from `config`.
	pub fn from_config(config: &RuntimeConfig, hub: Arc<RuntimeEventsHub>, commands: Arc<dyn CommandSink>) -> Self {
		Self::new(
			config.scheduler.clone(),
			hub,
			ReportingService::new(),
			commands,
			Arc::new(StaticMetadataResolver::from_symbols(&config.symbols)),
			Arc::new(MethodDescriptorRegistry::from_config(&config.methods)),
		)
	}

	pub fn hub(&self) -> &Arc<RuntimeEventsHub> {
		&self.hub
	}

	pub fn reports(&self) -> &ReportingService {
		&self.reports
	}

	pub fn session(&self, process: ProcessId) -> Option<Arc<HappensBeforeScheduler>> {
		self.sessions.read().get(&process).cloned()
	}

	/// Live session process ids, ascending.
	pub fn processes(&self) -> Vec<ProcessId> {
		let mut processes: Vec<_> = self.sessions.read().keys().copied().collect();
		processes.sort_unstable();
		processes
	}

	pub fn len(&self) -> usize {
		self.sessions.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.read().is_empty()
	}

	/// Routes `notification` to its process's scheduler.
	///
	/// Unknown processes and threads are reported as protocol warnings and
	/// returned as errors; the registry itself keeps going.
	pub fn dispatch(&self, notification: RawNotification) -> Result<()> {
		let process = notification.info.process_id;
		let info = notification.info;
		let scheduler = match &notification.payload {
			NotificationPayload::ProfilerInitialized => self.open(process),
			NotificationPayload::ProfilerDestroyed => self.sessions.write().remove(&process).ok_or(SchedulerError::UnknownProcess(process)),
			_ => self.session(process).ok_or(SchedulerError::UnknownProcess(process)),
		};
		let result = scheduler.and_then(|scheduler| scheduler.dispatch(notification));
		if let Err(err @ (SchedulerError::UnknownProcess(_) | SchedulerError::UnknownThread { .. })) = &result {
			self.reports.report(Report::warning("protocol", err.to_string()).with_event(&info));
		}
		result
	}

	fn open(&self, process: ProcessId) -> Result<Arc<HappensBeforeScheduler>> {
		let mut sessions = self.sessions.write();
		if let Some(existing) = sessions.get(&process) {
			return Ok(Arc::clone(existing));
		}
		let runtime = Arc::new(ShadowRuntime::new(process, self.reports.clone(), Arc::clone(&self.commands), Arc::clone(&self.metadata)));
		let scheduler = Arc::new(HappensBeforeScheduler::new(runtime, Arc::clone(&self.hub), Arc::clone(&self.descriptors), self.config.clone())?);
		sessions.insert(process, Arc::clone(&scheduler));
		tracing::info!(pid = %process, "session.opened");
		Ok(scheduler)
	}

	/// Terminates sessions whose last heartbeat is older than the watchdog timeout.
	///
	/// Each one is reported as crashed. Returns the affected process ids.
	pub fn check_watchdogs(&self, now: Instant) -> Vec<ProcessId> {
		let timeout = self.config.watchdog_timeout();
		let expired: Vec<_> = {
			let mut sessions = self.sessions.write();
			let mut expired: Vec<_> = sessions
				.iter()
				.filter(|(_, scheduler)| now.saturating_duration_since(scheduler.last_heartbeat()) > timeout)
				.map(|(process, _)| *process)
				.collect();
			expired.sort_unstable();
			expired.into_iter().filter_map(|process| sessions.remove(&process).map(|scheduler| (process, scheduler))).collect()
		};

		let mut crashed = Vec::with_capacity(expired.len());
		for (process, scheduler) in expired {
			let silent = now.saturating_duration_since(scheduler.last_heartbeat());
			self.reports.report(Report::error("watchdog", format!("no heartbeat for {}ms, process presumed crashed", silent.as_millis())).with_process(process));
			if let Err(err) = scheduler.shutdown() {
				tracing::debug!(pid = %process, error = %err, "session.watchdog.shutdown");
			}
			crashed.push(process);
		}
		crashed
	}

	/// Terminates every live session.
	pub fn shutdown(&self) {
		let sessions: Vec<_> = self.sessions.write().drain().collect();
		for (process, scheduler) in sessions {
			match scheduler.shutdown() {
				Ok(()) => tracing::info!(pid = %process, "session.closed"),
				Err(err) => tracing::debug!(pid = %process, error = %err, "session.shutdown"),
			}
		}
	}
}

impl Drop for SessionRegistry {
	fn drop(&mut self) {
		self.shutdown();
	}
}
