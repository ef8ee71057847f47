//! Address-keyed object tracking across garbage collections.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use umbra_primitives::{GcGeneration, GcGenerationRange, ObjectAddress};
use umbra_worker::GenerationClock;

use crate::object::{ObjectId, ShadowObject};

/// Counters produced when a collection finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionSummary {
	/// Objects that were condemned and not reported as surviving or moved.
	pub collected: usize,
	/// Objects still tracked after the collection.
	pub tracked: usize,
}

/// Counters produced by one `MovedReferences` batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveSummary {
	/// Objects now tracked at their new address.
	pub relocated: usize,
	/// Objects left in place because their new address overflowed.
	pub overflowed: usize,
}

#[derive(Debug, Default)]
struct Collection {
	condemned: HashMap<ObjectId, Arc<ShadowObject>>,
}

#[derive(Debug, Default)]
struct MemoryState {
	objects: HashMap<usize, Arc<ShadowObject>>,
	ranges: Vec<GcGenerationRange>,
	collection: Option<Collection>,
	collections: u64,
}

impl MemoryState {
	fn generation_of(&self, address: usize) -> Option<GcGeneration> {
		self.ranges.iter().find(|range| range.contains(address)).map(|range| range.generation)
	}
}

/// Tracks every object the analysis has observed, keyed by current address.
///
/// Collection protocol: [`begin_collection`](Self::begin_collection)
/// condemns tracked objects that live in a collected generation;
/// [`surviving`](Self::surviving) and [`moved`](Self::moved) rescue them;
/// [`finish_collection`](Self::finish_collection) marks whatever is still
/// condemned dead and forgets it, so a reused address yields a new object.
#[derive(Debug, Default)]
pub struct ShadowMemory {
	ids: GenerationClock,
	state: Mutex<MemoryState>,
}

impl ShadowMemory {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the live object at `address`, tracking a new one if needed.
	/// `None` for the null address.
	pub fn get_or_track(&self, address: ObjectAddress) -> Option<Arc<ShadowObject>> {
		if address.0 == 0 {
			return None;
		}
		let mut state = self.state.lock();
		if let Some(object) = state.objects.get(&address.0).filter(|object| object.is_alive()) {
			return Some(Arc::clone(object));
		}
		let object = Arc::new(ShadowObject::new(ObjectId(self.ids.next()), address));
		tracing::trace!(object = %object, "memory.track");
		state.objects.insert(address.0, Arc::clone(&object));
		Some(object)
	}

	pub fn get(&self, address: ObjectAddress) -> Option<Arc<ShadowObject>> {
		self.state.lock().objects.get(&address.0).cloned()
	}

	pub fn len(&self) -> usize {
		self.state.lock().objects.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Number of finished collections.
	pub fn collections(&self) -> u64 {
		self.state.lock().collections
	}

	pub fn generation_of(&self, address: ObjectAddress) -> Option<GcGeneration> {
		self.state.lock().generation_of(address.0)
	}

	pub fn is_collecting(&self) -> bool {
		self.state.lock().collection.is_some()
	}

	/// Starts a collection. `generations_collected` is indexed by [`GcGeneration::index`].
	pub fn begin_collection(&self, generations_collected: &[bool], bounds: &[GcGenerationRange]) -> usize {
		let mut state = self.state.lock();
		if state.collection.is_some() {
			tracing::warn!("memory.collection.restarted");
		}
		state.ranges = bounds.to_vec();
		let collected = |generation: GcGeneration| generations_collected.get(generation.index()).copied().unwrap_or(false);
		let condemned: HashMap<_, _> = state
			.objects
			.values()
			.filter(|object| state.generation_of(object.address().0).is_some_and(collected))
			.map(|object| (object.id(), Arc::clone(object)))
			.collect();
		let count = condemned.len();
		tracing::debug!(condemned = count, tracked = state.objects.len(), "memory.collection.begin");
		state.collection = Some(Collection { condemned });
		count
	}

	/// Rescues condemned objects inside each `[start, start + length)` block.
	pub fn surviving(&self, starts: &[ObjectAddress], lengths: &[usize]) -> usize {
		let mut state = self.state.lock();
		let MemoryState { objects, collection, .. } = &mut *state;
		let Some(collection) = collection.as_mut() else {
			tracing::warn!("memory.surviving.outside_collection");
			return 0;
		};
		let mut rescued = 0;
		for (start, length) in starts.iter().zip(lengths) {
			for object in objects.values().filter(|object| in_block(object.address().0, start.0, *length)) {
				if collection.condemned.remove(&object.id()).is_some() {
					rescued += 1;
				}
			}
		}
		rescued
	}

	/// Relocates objects in each old block to the matching new block.
	///
	/// An object whose new address would not fit in `usize` keeps its old
	/// address and is counted in [`MoveSummary::overflowed`].
	pub fn moved(&self, old_starts: &[ObjectAddress], new_starts: &[ObjectAddress], lengths: &[usize]) -> MoveSummary {
		let mut state = self.state.lock();
		let MemoryState { objects, collection, .. } = &mut *state;
		let mut relocated = Vec::new();
		let mut overflowed = 0;
		for ((old, new), length) in old_starts.iter().zip(new_starts).zip(lengths) {
			for (address, object) in objects.iter().filter(|(address, _)| in_block(**address, old.0, *length)) {
				match new.0.checked_add(address - old.0) {
					Some(to) => relocated.push((*address, to, Arc::clone(object))),
					None => {
						tracing::warn!(from = *address, old = old.0, new = new.0, "memory.moved.overflow");
						overflowed += 1;
					}
				}
			}
		}
		for (from, _, _) in &relocated {
			objects.remove(from);
		}
		for (_, to, object) in &relocated {
			object.relocate(ObjectAddress(*to));
			if let Some(collection) = collection.as_mut() {
				collection.condemned.remove(&object.id());
			}
			objects.insert(*to, Arc::clone(object));
		}
		MoveSummary {
			relocated: relocated.len(),
			overflowed,
		}
	}

	/// Ends the collection: condemned objects die and are forgotten.
	pub fn finish_collection(&self, bounds: &[GcGenerationRange]) -> CollectionSummary {
		let mut state = self.state.lock();
		let collection = state.collection.take().unwrap_or_default();
		let mut collected = 0;
		for object in collection.condemned.values() {
			object.mark_dead();
			let address = object.address().0;
			if state.objects.get(&address).is_some_and(|tracked| tracked.id() == object.id()) {
				state.objects.remove(&address);
			}
			collected += 1;
		}
		if !bounds.is_empty() {
			state.ranges = bounds.to_vec();
		}
		state.collections += 1;
		let summary = CollectionSummary {
			collected,
			tracked: state.objects.len(),
		};
		tracing::debug!(collected = summary.collected, tracked = summary.tracked, "memory.collection.finish");
		summary
	}
}

fn in_block(address: usize, start: usize, length: usize) -> bool {
	address >= start && address - start < length
}
