use std::sync::Arc;

use umbra_primitives::{FunctionInfo, GcGeneration, GcGenerationRange, ModuleId, NativeThreadId, RawArgument, RawValue, SuspendReason, TypeInfo};

use crate::object::ShadowObject;
use crate::thread::ShadowThreadId;

/// Typed event raised on the hub, in per-thread causal order.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
	ProfilerInitialized,
	ProfilerDestroyed,
	ModuleLoaded { module: ModuleId, path: String },
	TypeLoaded { ty: TypeInfo },
	JitCompilationStarted { function: FunctionInfo },
	ThreadCreated { thread: ShadowThreadId, native: NativeThreadId },
	ThreadRenamed { thread: ShadowThreadId, name: String },
	ThreadDestroyed { thread: ShadowThreadId },
	RuntimeSuspendStarted { reason: SuspendReason },
	/// Every thread of the suspend cohort arrived; `epoch` is the new shared epoch.
	RuntimeSuspendFinished { reason: SuspendReason, epoch: u64 },
	RuntimeThreadSuspended { thread: ShadowThreadId },
	RuntimeResumeStarted,
	RuntimeThreadResumed { thread: ShadowThreadId },
	RuntimeResumeFinished,
	GarbageCollectionStarted { generations: Vec<GcGeneration>, bounds: Vec<GcGenerationRange> },
	SurvivingReferences { blocks: usize, rescued: usize },
	MovedReferences { blocks: usize, relocated: usize },
	GarbageCollectionFinished { collected: usize, tracked: usize },
	MethodCalled { function: FunctionInfo, arguments: Vec<RawArgument> },
	MethodReturned { function: FunctionInfo, return_value: Option<RawValue>, by_ref_arguments: Vec<RawArgument> },
	LockAcquireAttempted { function: FunctionInfo, object: Arc<ShadowObject> },
	LockAcquireReturned { function: FunctionInfo, object: Arc<ShadowObject>, success: bool },
	LockReleaseCalled { function: FunctionInfo, object: Arc<ShadowObject> },
	LockReleased { function: FunctionInfo, object: Arc<ShadowObject> },
	ObjectWaitAttempted { function: FunctionInfo, object: Arc<ShadowObject> },
	ObjectWaitReturned { function: FunctionInfo, object: Arc<ShadowObject>, success: bool },
	ObjectPulseCalled { function: FunctionInfo, object: Arc<ShadowObject>, all: bool },
	ObjectPulseReturned { function: FunctionInfo, object: Arc<ShadowObject>, all: bool },
	FieldInstanceAccessed { object: Arc<ShadowObject> },
	/// `instance` is `None` for static fields.
	FieldAccessed { field: u64, is_write: bool, instance: Option<Arc<ShadowObject>> },
	ArrayInstanceAccessed { object: Arc<ShadowObject> },
	ArrayIndexAccessed { index: i32 },
	ArrayElementAccessed { element: u64, is_write: bool, array: Arc<ShadowObject>, index: i32 },
}

macro_rules! event_kinds {
	($($variant:ident => $name:literal),+ $(,)?) => {
		/// Discriminant of [`RuntimeEvent`], used as the subscription key.
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
		pub enum RuntimeEventKind {
			$($variant),+
		}

		impl RuntimeEventKind {
			pub const ALL: &'static [RuntimeEventKind] = &[$(Self::$variant),+];

			pub const fn as_str(self) -> &'static str {
				match self {
					$(Self::$variant => $name),+
				}
			}
		}

		impl RuntimeEvent {
			pub const fn kind(&self) -> RuntimeEventKind {
				match self {
					$(Self::$variant { .. } => RuntimeEventKind::$variant),+
				}
			}
		}
	};
}

event_kinds! {
	ProfilerInitialized => "profiler_initialized",
	ProfilerDestroyed => "profiler_destroyed",
	ModuleLoaded => "module_loaded",
	TypeLoaded => "type_loaded",
	JitCompilationStarted => "jit_compilation_started",
	ThreadCreated => "thread_created",
	ThreadRenamed => "thread_renamed",
	ThreadDestroyed => "thread_destroyed",
	RuntimeSuspendStarted => "runtime_suspend_started",
	RuntimeSuspendFinished => "runtime_suspend_finished",
	RuntimeThreadSuspended => "runtime_thread_suspended",
	RuntimeResumeStarted => "runtime_resume_started",
	RuntimeThreadResumed => "runtime_thread_resumed",
	RuntimeResumeFinished => "runtime_resume_finished",
	GarbageCollectionStarted => "garbage_collection_started",
	SurvivingReferences => "surviving_references",
	MovedReferences => "moved_references",
	GarbageCollectionFinished => "garbage_collection_finished",
	MethodCalled => "method_called",
	MethodReturned => "method_returned",
	LockAcquireAttempted => "lock_acquire_attempted",
	LockAcquireReturned => "lock_acquire_returned",
	LockReleaseCalled => "lock_release_called",
	LockReleased => "lock_released",
	ObjectWaitAttempted => "object_wait_attempted",
	ObjectWaitReturned => "object_wait_returned",
	ObjectPulseCalled => "object_pulse_called",
	ObjectPulseReturned => "object_pulse_returned",
	FieldInstanceAccessed => "field_instance_accessed",
	FieldAccessed => "field_accessed",
	ArrayInstanceAccessed => "array_instance_accessed",
	ArrayIndexAccessed => "array_index_accessed",
	ArrayElementAccessed => "array_element_accessed",
}
