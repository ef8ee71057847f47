//! Collected diagnostics: protocol violations, plugin failures, stalls.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use umbra_primitives::{NativeThreadId, NotificationId, ProcessId, RawEventInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
	Warning,
	Error,
}

impl Severity {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Warning => "warning",
			Self::Error => "error",
		}
	}
}

/// One diagnostic produced by the runtime or a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
	pub severity: Severity,
	/// Short machine-friendly category, e.g. `"protocol"` or `"plugin"`.
	pub category: &'static str,
	pub message: String,
	pub process: Option<ProcessId>,
	pub thread: Option<NativeThreadId>,
	pub notification: Option<NotificationId>,
}

impl Report {
	pub fn new(severity: Severity, category: &'static str, message: impl Into<String>) -> Self {
		Self {
			severity,
			category,
			message: message.into(),
			process: None,
			thread: None,
			notification: None,
		}
	}

	pub fn warning(category: &'static str, message: impl Into<String>) -> Self {
		Self::new(Severity::Warning, category, message)
	}

	pub fn error(category: &'static str, message: impl Into<String>) -> Self {
		Self::new(Severity::Error, category, message)
	}

	pub fn with_process(mut self, process: ProcessId) -> Self {
		self.process = Some(process);
		self
	}

	/// Attaches process, thread and notification ids from a raw event.
	pub fn with_event(mut self, info: &RawEventInfo) -> Self {
		self.process = Some(info.process_id);
		self.thread = Some(info.thread_id);
		self.notification = Some(info.id);
		self
	}
}

impl fmt::Display for Report {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}/{}]", self.severity.as_str(), self.category)?;
		if let Some(process) = self.process {
			write!(f, " pid={process}")?;
		}
		if let Some(thread) = self.thread {
			write!(f, " tid={thread}")?;
		}
		if let Some(notification) = self.notification {
			write!(f, " {notification}")?;
		}
		write!(f, ": {}", self.message)
	}
}

/// Shared sink for [`Report`]s. Cloning shares the underlying list.
#[derive(Debug, Clone, Default)]
pub struct ReportingService {
	reports: Arc<Mutex<Vec<Report>>>,
}

impl ReportingService {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn report(&self, report: Report) {
		match report.severity {
			Severity::Warning => tracing::warn!(category = report.category, pid = ?report.process, tid = ?report.thread, "report.warning: {}", report.message),
			Severity::Error => tracing::error!(category = report.category, pid = ?report.process, tid = ?report.thread, "report.error: {}", report.message),
		}
		self.reports.lock().push(report);
	}

	/// Snapshot of everything reported so far, in report order.
	pub fn reports(&self) -> Vec<Report> {
		self.reports.lock().clone()
	}

	pub fn count(&self, severity: Severity) -> usize {
		self.reports.lock().iter().filter(|report| report.severity == severity).count()
	}

	pub fn count_category(&self, category: &str) -> usize {
		self.reports.lock().iter().filter(|report| report.category == category).count()
	}

	pub fn is_empty(&self) -> bool {
		self.reports.lock().is_empty()
	}
}
