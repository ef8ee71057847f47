use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Mailbox send error. Carries the rejected message back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxSendError<T> {
	/// Mailbox is closed.
	Closed(T),
}

struct MailboxState<T> {
	queue: VecDeque<T>,
	closed: bool,
}

struct MailboxInner<T> {
	state: Mutex<MailboxState<T>>,
	notify_recv: Condvar,
}

/// Multi-producer mailbox sender. Sending never blocks.
pub struct MailboxSender<T> {
	inner: Arc<MailboxInner<T>>,
}

/// Mailbox receiver. Intended for exactly one consuming thread.
pub struct MailboxReceiver<T> {
	inner: Arc<MailboxInner<T>>,
}

/// Unbounded FIFO mailbox with close-then-drain semantics.
pub struct Mailbox<T> {
	inner: Arc<MailboxInner<T>>,
}

impl<T> Clone for MailboxSender<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> Default for Mailbox<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Mailbox<T> {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(MailboxInner {
				state: Mutex::new(MailboxState {
					queue: VecDeque::new(),
					closed: false,
				}),
				notify_recv: Condvar::new(),
			}),
		}
	}

	/// Returns a sender handle.
	pub fn sender(&self) -> MailboxSender<T> {
		MailboxSender {
			inner: Arc::clone(&self.inner),
		}
	}

	/// Returns the receiver handle.
	pub fn receiver(&self) -> MailboxReceiver<T> {
		MailboxReceiver {
			inner: Arc::clone(&self.inner),
		}
	}

	/// Splits into sender and receiver.
	pub fn split(self) -> (MailboxSender<T>, MailboxReceiver<T>) {
		(self.sender(), self.receiver())
	}
}

impl<T> MailboxSender<T> {
	/// Requests mailbox closure. Receivers drain existing items then return `None`.
	///
	/// Returns `true` if this call closed the mailbox.
	pub fn close(&self) -> bool {
		let mut state = self.inner.state.lock();
		let first = !state.closed;
		state.closed = true;
		drop(state);
		self.inner.notify_recv.notify_all();
		first
	}

	/// Enqueues at the back without blocking.
	pub fn send(&self, msg: T) -> Result<(), MailboxSendError<T>> {
		let mut state = self.inner.state.lock();
		if state.closed {
			return Err(MailboxSendError::Closed(msg));
		}
		state.queue.push_back(msg);
		drop(state);
		self.inner.notify_recv.notify_one();
		Ok(())
	}

	/// Returns current queue length.
	pub fn len(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}
}

impl<T> MailboxReceiver<T> {
	/// Receives one message, parking while the queue is empty.
	/// Returns `None` once the mailbox is closed and drained.
	pub fn recv(&self) -> Option<T> {
		let mut state = self.inner.state.lock();
		loop {
			if let Some(msg) = state.queue.pop_front() {
				return Some(msg);
			}
			if state.closed {
				return None;
			}
			self.inner.notify_recv.wait(&mut state);
		}
	}

	/// Takes every queued message in FIFO order.
	pub fn drain(&self) -> Vec<T> {
		self.inner.state.lock().queue.drain(..).collect()
	}

	/// Returns current queue length.
	pub fn len(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
