use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::TaskClass;

/// Snapshot for one registered worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
	pub name: String,
	pub class: TaskClass,
	pub generation: u64,
	pub processed: u64,
	pub pending: usize,
	pub last_exit: Option<String>,
}

impl WorkerRecord {
	pub fn new(name: impl Into<String>, class: TaskClass, generation: u64) -> Self {
		Self {
			name: name.into(),
			class,
			generation,
			processed: 0,
			pending: 0,
			last_exit: None,
		}
	}
}

/// In-memory worker registry for status snapshots.
#[derive(Debug, Default, Clone)]
pub struct WorkerRegistry {
	inner: Arc<RwLock<HashMap<String, WorkerRecord>>>,
}

impl WorkerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Upserts one record.
	pub fn upsert(&self, record: WorkerRecord) {
		self.inner.write().insert(record.name.clone(), record);
	}

	/// Applies `f` to an existing record. Returns `false` if `name` is unknown.
	pub fn update(&self, name: &str, f: impl FnOnce(&mut WorkerRecord)) -> bool {
		match self.inner.write().get_mut(name) {
			Some(record) => {
				f(record);
				true
			}
			None => false,
		}
	}

	pub fn remove(&self, name: &str) -> Option<WorkerRecord> {
		self.inner.write().remove(name)
	}

	pub fn get(&self, name: &str) -> Option<WorkerRecord> {
		self.inner.read().get(name).cloned()
	}

	/// Returns snapshots sorted by name.
	pub fn snapshots(&self) -> Vec<WorkerRecord> {
		let mut records: Vec<_> = self.inner.read().values().cloned().collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		records
	}
}
