use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use umbra_worker::CancelToken;

use crate::error::SyncBlockError;
use crate::thread::ShadowThreadId;

#[derive(Debug, Default)]
struct MonitorState {
	owner: Option<ShadowThreadId>,
	recursion: u32,
}

/// Reentrant lock-ownership record mirroring a managed monitor.
///
/// The owner is stored as a [`ShadowThreadId`] and resolved through the
/// runtime's thread lookup, so objects never keep threads alive. Readers on
/// other threads see an eventually consistent snapshot.
#[derive(Debug, Default)]
pub struct SyncBlock {
	state: Mutex<MonitorState>,
	released: Condvar,
}

impl SyncBlock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn owner(&self) -> Option<ShadowThreadId> {
		self.state.lock().owner
	}

	pub fn recursion(&self) -> u32 {
		self.state.lock().recursion
	}

	/// Acquires without parking. Fails if another thread owns the monitor.
	pub fn try_acquire(&self, thread: ShadowThreadId) -> bool {
		let mut state = self.state.lock();
		Self::enter(&mut state, thread, 1)
	}

	/// Acquires, parking while another thread owns the monitor.
	///
	/// `cancel` is polled every `poll` while parked.
	pub fn acquire(&self, thread: ShadowThreadId, cancel: &CancelToken, poll: Duration) -> Result<(), SyncBlockError> {
		self.acquire_with_recursion(thread, 1, cancel, poll)
	}

	/// Acquires and restores a saved recursion count (return from a monitor wait).
	pub fn acquire_with_recursion(&self, thread: ShadowThreadId, count: u32, cancel: &CancelToken, poll: Duration) -> Result<(), SyncBlockError> {
		let mut state = self.state.lock();
		let mut parked = false;
		loop {
			if Self::enter(&mut state, thread, count.max(1)) {
				if parked {
					tracing::trace!(thread = %thread, "sync_block.acquired_after_wait");
				}
				return Ok(());
			}
			if cancel.is_cancelled() {
				return Err(SyncBlockError::Interrupted(thread));
			}
			if !parked {
				tracing::trace!(thread = %thread, owner = ?state.owner, "sync_block.contended");
				parked = true;
			}
			let _ = self.released.wait_for(&mut state, poll);
		}
	}

	/// Releases one level. Returns `true` once the monitor is free.
	pub fn release(&self, thread: ShadowThreadId) -> Result<bool, SyncBlockError> {
		let mut state = self.state.lock();
		Self::check_owner(&state, thread)?;
		state.recursion -= 1;
		if state.recursion > 0 {
			return Ok(false);
		}
		state.owner = None;
		drop(state);
		self.released.notify_all();
		Ok(true)
	}

	/// Releases every level at once and returns the saved recursion count.
	pub fn release_all(&self, thread: ShadowThreadId) -> Result<u32, SyncBlockError> {
		let mut state = self.state.lock();
		Self::check_owner(&state, thread)?;
		let saved = std::mem::take(&mut state.recursion);
		state.owner = None;
		drop(state);
		self.released.notify_all();
		Ok(saved)
	}

	fn enter(state: &mut MonitorState, thread: ShadowThreadId, count: u32) -> bool {
		match state.owner {
			None => {
				state.owner = Some(thread);
				state.recursion = count;
				true
			}
			Some(owner) if owner == thread => {
				state.recursion += count;
				true
			}
			Some(_) => false,
		}
	}

	fn check_owner(state: &MonitorState, thread: ShadowThreadId) -> Result<(), SyncBlockError> {
		match state.owner {
			None => Err(SyncBlockError::NotHeld(thread)),
			Some(owner) if owner != thread => Err(SyncBlockError::NotOwner { owner, thread }),
			Some(_) => Ok(()),
		}
	}
}
