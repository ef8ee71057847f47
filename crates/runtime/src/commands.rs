//! Outbound commands to the profiler. Fire-and-forget from the runtime's view.

use parking_lot::Mutex;
use umbra_primitives::{NativeThreadId, ProcessId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
	/// Lets the target continue after a garbage collection was processed.
	ContinueExecution { process: ProcessId },
	/// Requests a stack snapshot of one target thread.
	CaptureStackSnapshot { process: ProcessId, thread: NativeThreadId },
}

/// Transport side of outbound commands.
pub trait CommandSink: Send + Sync {
	fn send(&self, command: Command);
}

/// Drops every command.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCommandSink;

impl CommandSink for NullCommandSink {
	fn send(&self, command: Command) {
		tracing::trace!(?command, "command.dropped");
	}
}

/// Keeps every command in memory.
#[derive(Debug, Default)]
pub struct RecordingCommandSink {
	sent: Mutex<Vec<Command>>,
}

impl RecordingCommandSink {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn sent(&self) -> Vec<Command> {
		self.sent.lock().clone()
	}
}

impl CommandSink for RecordingCommandSink {
	fn send(&self, command: Command) {
		tracing::debug!(?command, "command.sent");
		self.sent.lock().push(command);
	}
}
