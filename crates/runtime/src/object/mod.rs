//! Shadow objects: identity, liveness and monitor state of managed objects.

mod sync_block;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;
use umbra_primitives::ObjectAddress;

pub use self::sync_block::SyncBlock;

/// Logical identity of a tracked object.
///
/// Unlike the address, an id is never reused: an address recycled after a
/// collection gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "obj#{}", self.0)
	}
}

/// Analysis-side mirror of one managed object.
#[derive(Debug)]
pub struct ShadowObject {
	id: ObjectId,
	address: AtomicUsize,
	alive: AtomicBool,
	sync_block: SyncBlock,
}

impl ShadowObject {
	pub fn new(id: ObjectId, address: ObjectAddress) -> Self {
		Self {
			id,
			address: AtomicUsize::new(address.0),
			alive: AtomicBool::new(true),
			sync_block: SyncBlock::new(),
		}
	}

	pub fn id(&self) -> ObjectId {
		self.id
	}

	/// Current address. Changes when a compacting collection moves the object.
	pub fn address(&self) -> ObjectAddress {
		ObjectAddress(self.address.load(Ordering::Acquire))
	}

	pub fn is_alive(&self) -> bool {
		self.alive.load(Ordering::Acquire)
	}

	pub fn sync_block(&self) -> &SyncBlock {
		&self.sync_block
	}

	pub(crate) fn relocate(&self, address: ObjectAddress) {
		self.address.store(address.0, Ordering::Release);
	}

	pub(crate) fn mark_dead(&self) {
		self.alive.store(false, Ordering::Release);
	}
}

impl PartialEq for ShadowObject {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for ShadowObject {}

impl fmt::Display for ShadowObject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{:#x}", self.id, self.address().0)
	}
}
