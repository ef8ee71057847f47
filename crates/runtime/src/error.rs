//! Error types for the shadow execution layer.

use std::path::PathBuf;

use thiserror::Error;
use umbra_primitives::{NativeThreadId, NotificationId, ProcessId};

use crate::runtime::RuntimeState;
use crate::thread::ShadowThreadId;

/// Errors surfaced by `schedule_*` entry points.
#[derive(Debug, Error)]
pub enum SchedulerError {
	/// The notification names a thread the scheduler never saw created.
	#[error("unknown thread {thread} in process {process}")]
	UnknownThread {
		/// Owning process.
		process: ProcessId,
		/// Native id carried by the notification.
		thread: NativeThreadId,
	},

	/// The notification names a process with no live session.
	#[error("no session for process {0}")]
	UnknownProcess(ProcessId),

	/// The scheduler already processed `ProfilerDestroyed`.
	#[error("scheduler for process {0} is terminated")]
	Terminated(ProcessId),

	/// The target shadow thread no longer accepts jobs.
	#[error("job {notification} rejected by shadow thread {thread}: {source}")]
	JobRejected {
		/// Shadow thread that refused the job.
		thread: ShadowThreadId,
		/// Notification the job was built from.
		notification: NotificationId,
		/// Underlying queue error.
		source: ShadowThreadError,
	},

	/// A shadow thread refused an operation.
	#[error(transparent)]
	Thread(#[from] ShadowThreadError),

	/// A worker thread could not be spawned.
	#[error("failed to spawn worker {name}: {error}")]
	Spawn {
		/// Thread name that was requested.
		name: String,
		/// The underlying I/O error.
		error: std::io::Error,
	},
}

/// Errors raised by a single shadow thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShadowThreadError {
	/// A return was observed with no matching call on the shadow call stack.
	#[error("call stack of shadow thread {0} is empty")]
	EmptyCallStack(ShadowThreadId),

	/// The job queue is closed.
	#[error("job queue of shadow thread {0} is closed")]
	Closed(ShadowThreadId),

	/// `start` was called twice.
	#[error("shadow thread {0} already started")]
	AlreadyStarted(ShadowThreadId),
}

/// Monitor bookkeeping failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncBlockError {
	/// Released by a thread that does not own it.
	#[error("monitor owned by {owner} released by {thread}")]
	NotOwner {
		/// Current owner.
		owner: ShadowThreadId,
		/// Thread that attempted the release.
		thread: ShadowThreadId,
	},

	/// Released while unowned.
	#[error("monitor released by {0} while not held")]
	NotHeld(ShadowThreadId),

	/// A parked acquire was cancelled.
	#[error("acquire by {0} interrupted")]
	Interrupted(ShadowThreadId),
}

/// Invalid shadow runtime state machine transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuntimeStateError {
	#[error("invalid runtime transition {from:?} -> {to:?}")]
	InvalidTransition { from: RuntimeState, to: RuntimeState },
}

/// Epoch source failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EpochError {
	/// The source was closed before the awaited epoch was reached.
	#[error("epoch source closed at {current} while waiting for {target}")]
	Closed { current: u64, target: u64 },
}

/// Outcome of a job body that did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
	/// Internal invariant break. Fatal to the executing worker only.
	#[error("invariant violated: {0}")]
	Invariant(String),

	/// The job was cancelled while parked.
	#[error("interrupted: {0}")]
	Interrupted(#[from] SyncBlockError),
}

impl From<ShadowThreadError> for JobError {
	fn from(err: ShadowThreadError) -> Self {
		Self::Invariant(err.to_string())
	}
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or schema.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
