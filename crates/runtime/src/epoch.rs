//! Process-wide epoch counter with broadcast wake.

use parking_lot::{Condvar, Mutex};

use crate::error::EpochError;

#[derive(Debug)]
struct EpochState {
	value: u64,
	closed: bool,
}

/// Monotonic generation counter that shadow threads park on.
///
/// The counter and the closed flag live under one mutex; waiters re-check
/// both after every wake, so an advance racing with a new waiter is never
/// lost.
///
/// Policy: [`increment`](Self::increment) advances by exactly one per call,
/// so `N` concurrent calls advance by `N`. [`advance_to`](Self::advance_to)
/// coalesces: it raises the counter to a target and is a no-op when the
/// counter is already there. The scheduler only uses `advance_to`, one call
/// per completed suspend barrier.
#[derive(Debug)]
pub struct EpochSource {
	state: Mutex<EpochState>,
	changed: Condvar,
}

impl Default for EpochSource {
	fn default() -> Self {
		Self::new()
	}
}

impl EpochSource {
	/// Creates a source at epoch 0.
	pub fn new() -> Self {
		Self {
			state: Mutex::new(EpochState { value: 0, closed: false }),
			changed: Condvar::new(),
		}
	}

	pub fn current(&self) -> u64 {
		self.state.lock().value
	}

	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	/// Advances by one and wakes every waiter. Returns the new epoch.
	pub fn increment(&self) -> Result<u64, EpochError> {
		let mut state = self.state.lock();
		if state.closed {
			return Err(EpochError::Closed {
				current: state.value,
				target: state.value + 1,
			});
		}
		state.value += 1;
		let value = state.value;
		drop(state);
		self.changed.notify_all();
		tracing::trace!(epoch = value, "epoch.increment");
		Ok(value)
	}

	/// Raises the epoch to `target` if it is behind. Returns `true` if it moved.
	pub fn advance_to(&self, target: u64) -> Result<bool, EpochError> {
		let mut state = self.state.lock();
		if state.closed {
			return Err(EpochError::Closed { current: state.value, target });
		}
		if state.value >= target {
			return Ok(false);
		}
		state.value = target;
		drop(state);
		self.changed.notify_all();
		tracing::trace!(epoch = target, "epoch.advance");
		Ok(true)
	}

	/// Parks until the epoch reaches `target`.
	///
	/// Returns the observed epoch, or [`EpochError::Closed`] if the source was
	/// closed while still behind `target`.
	pub fn wait_until(&self, target: u64) -> Result<u64, EpochError> {
		let mut state = self.state.lock();
		loop {
			if state.value >= target {
				return Ok(state.value);
			}
			if state.closed {
				return Err(EpochError::Closed { current: state.value, target });
			}
			self.changed.wait(&mut state);
		}
	}

	/// Closes the source, waking every waiter. Idempotent.
	pub fn close(&self) {
		let mut state = self.state.lock();
		if state.closed {
			return;
		}
		state.closed = true;
		let value = state.value;
		drop(state);
		self.changed.notify_all();
		tracing::debug!(epoch = value, "epoch.closed");
	}
}
