//! Shadow runtime: per-process state visible to plugins.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use umbra_primitives::{FunctionInfo, ModuleId, NativeThreadId, ProcessId, TypeInfo};

use crate::commands::CommandSink;
use crate::error::RuntimeStateError;
use crate::memory::ShadowMemory;
use crate::metadata::MetadataResolver;
use crate::reporting::ReportingService;
use crate::thread::{ShadowThread, ShadowThreadId};

/// Runtime-wide execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeState {
	Initiated,
	Executing,
	Suspending,
	Suspended,
	Resuming,
	Terminated,
}

impl RuntimeState {
	pub const fn can_transition(self, to: RuntimeState) -> bool {
		use RuntimeState::*;
		matches!(
			(self, to),
			(Initiated, Executing) | (Executing, Suspending) | (Suspending, Suspended) | (Suspended, Resuming) | (Resuming, Executing) | (Initiated | Executing | Suspending | Suspended | Resuming, Terminated)
		)
	}
}

/// A module reported by `ModuleLoaded`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
	pub id: ModuleId,
	pub path: String,
}

/// Outcome of [`ShadowRuntime::register_thread`].
pub(crate) enum Registration {
	Registered(Arc<ShadowThread>),
	/// The native id is already live; nothing was created.
	Duplicate,
	/// Teardown has taken the table; nothing was created.
	Closed,
}

#[derive(Debug, Default, Clone)]
struct ThreadTable {
	by_native: HashMap<NativeThreadId, Arc<ShadowThread>>,
	by_id: HashMap<ShadowThreadId, Arc<ShadowThread>>,
}

/// Per-process state shared by the scheduler, the executor and plugins.
///
/// Thread lookups read an immutable snapshot; registration swaps in a new
/// one, so delivery threads never contend with each other on reads.
pub struct ShadowRuntime {
	process_id: ProcessId,
	state: Mutex<RuntimeState>,
	threads: ArcSwap<ThreadTable>,
	/// Serializes table swaps. `true` once [`take_threads`](Self::take_threads) ran.
	threads_closed: Mutex<bool>,
	modules: RwLock<HashMap<ModuleId, LoadedModule>>,
	types: RwLock<HashSet<TypeInfo>>,
	jit_compilations: AtomicU64,
	memory: ShadowMemory,
	reports: ReportingService,
	commands: Arc<dyn CommandSink>,
	metadata: Arc<dyn MetadataResolver>,
}

impl ShadowRuntime {
	pub fn new(process_id: ProcessId, reports: ReportingService, commands: Arc<dyn CommandSink>, metadata: Arc<dyn MetadataResolver>) -> Self {
		Self {
			process_id,
			state: Mutex::new(RuntimeState::Initiated),
			threads: ArcSwap::from_pointee(ThreadTable::default()),
			threads_closed: Mutex::new(false),
			modules: RwLock::new(HashMap::default()),
			types: RwLock::new(HashSet::default()),
			jit_compilations: AtomicU64::new(0),
			memory: ShadowMemory::new(),
			reports,
			commands,
			metadata,
		}
	}

	pub fn process_id(&self) -> ProcessId {
		self.process_id
	}

	pub fn state(&self) -> RuntimeState {
		*self.state.lock()
	}

	/// Moves to `to`. Returns the previous state.
	pub fn transition(&self, to: RuntimeState) -> Result<RuntimeState, RuntimeStateError> {
		let mut state = self.state.lock();
		let from = *state;
		if !from.can_transition(to) {
			return Err(RuntimeStateError::InvalidTransition { from, to });
		}
		*state = to;
		tracing::debug!(pid = %self.process_id, ?from, ?to, "runtime.state");
		Ok(from)
	}

	pub fn is_terminated(&self) -> bool {
		self.state() == RuntimeState::Terminated
	}

	pub fn thread(&self, native: NativeThreadId) -> Option<Arc<ShadowThread>> {
		self.threads.load().by_native.get(&native).cloned()
	}

	/// Resolves a [`ShadowThreadId`], e.g. a monitor owner.
	pub fn thread_by_id(&self, id: ShadowThreadId) -> Option<Arc<ShadowThread>> {
		self.threads.load().by_id.get(&id).cloned()
	}

	/// Live threads ordered by id.
	pub fn threads(&self) -> Vec<Arc<ShadowThread>> {
		let mut threads: Vec<_> = self.threads.load().by_id.values().cloned().collect();
		threads.sort_by_key(|thread| thread.id());
		threads
	}

	pub fn thread_ids(&self) -> Vec<ShadowThreadId> {
		let mut ids: Vec<_> = self.threads.load().by_id.keys().copied().collect();
		ids.sort_unstable();
		ids
	}

	pub fn thread_count(&self) -> usize {
		self.threads.load().by_id.len()
	}

	/// Registers the thread built by `create` for `native`.
	///
	/// `create` runs under the table lock and only when `native` is new and
	/// the table is still open, so a thread it starts is always visible to
	/// teardown.
	pub(crate) fn register_thread<E>(&self, native: NativeThreadId, create: impl FnOnce() -> Result<Arc<ShadowThread>, E>) -> Result<Registration, E> {
		let closed = self.threads_closed.lock();
		if *closed {
			return Ok(Registration::Closed);
		}
		let current = self.threads.load();
		if current.by_native.contains_key(&native) {
			return Ok(Registration::Duplicate);
		}
		let thread = create()?;
		let mut next = ThreadTable::clone(&current);
		next.by_native.insert(native, Arc::clone(&thread));
		next.by_id.insert(thread.id(), Arc::clone(&thread));
		self.threads.store(Arc::new(next));
		Ok(Registration::Registered(thread))
	}

	pub(crate) fn remove_thread(&self, native: NativeThreadId) -> Option<Arc<ShadowThread>> {
		let _write = self.threads_closed.lock();
		let current = self.threads.load();
		let thread = current.by_native.get(&native).cloned()?;
		let mut next = ThreadTable::clone(&current);
		next.by_native.remove(&native);
		next.by_id.remove(&thread.id());
		self.threads.store(Arc::new(next));
		Some(thread)
	}

	/// Empties the table and refuses every later registration.
	pub(crate) fn take_threads(&self) -> Vec<Arc<ShadowThread>> {
		let mut closed = self.threads_closed.lock();
		*closed = true;
		let table = self.threads.swap(Arc::new(ThreadTable::default()));
		let mut threads: Vec<_> = table.by_id.values().cloned().collect();
		threads.sort_by_key(|thread| thread.id());
		threads
	}

	pub(crate) fn record_module(&self, id: ModuleId, path: String) {
		self.modules.write().insert(id, LoadedModule { id, path });
	}

	pub fn module(&self, id: ModuleId) -> Option<LoadedModule> {
		self.modules.read().get(&id).cloned()
	}

	pub fn module_count(&self) -> usize {
		self.modules.read().len()
	}

	/// Returns `false` if the type was already recorded.
	pub(crate) fn record_type(&self, ty: TypeInfo) -> bool {
		self.types.write().insert(ty)
	}

	pub fn type_count(&self) -> usize {
		self.types.read().len()
	}

	pub(crate) fn record_jit_compilation(&self) -> u64 {
		self.jit_compilations.fetch_add(1, Ordering::Relaxed) + 1
	}

	pub fn jit_compilations(&self) -> u64 {
		self.jit_compilations.load(Ordering::Relaxed)
	}

	pub fn memory(&self) -> &ShadowMemory {
		&self.memory
	}

	pub fn reports(&self) -> &ReportingService {
		&self.reports
	}

	pub fn commands(&self) -> &dyn CommandSink {
		self.commands.as_ref()
	}

	pub fn metadata(&self) -> &dyn MetadataResolver {
		self.metadata.as_ref()
	}

	/// Method name for diagnostics, `"unknown"` when metadata has none.
	pub fn method_name(&self, function: &FunctionInfo) -> String {
		self.metadata
			.resolve_method(self.process_id, function)
			.map_or_else(|| "unknown".to_owned(), |def| def.name)
	}
}

impl std::fmt::Debug for ShadowRuntime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ShadowRuntime")
			.field("process_id", &self.process_id)
			.field("state", &self.state())
			.field("threads", &self.thread_count())
			.finish_non_exhaustive()
	}
}
