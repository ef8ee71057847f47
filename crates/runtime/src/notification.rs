//! Raw notifications as delivered by the profiler transport.

use serde::{Deserialize, Serialize};
use umbra_primitives::{FunctionInfo, GcGenerationRange, ModuleId, NativeThreadId, ObjectAddress, RawArgument, RawEventInfo, RawValue, SuspendReason, TypeInfo};

/// One already-deserialized notification: envelope plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNotification {
	pub info: RawEventInfo,
	#[serde(flatten)]
	pub payload: NotificationPayload,
}

impl RawNotification {
	pub fn new(info: RawEventInfo, payload: NotificationPayload) -> Self {
		Self { info, payload }
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationPayload {
	Heartbeat,
	ProfilerInitialized,
	ProfilerDestroyed,
	ModuleLoaded {
		module_id: ModuleId,
		path: String,
	},
	TypeLoaded {
		type_info: TypeInfo,
	},
	JitCompilationStarted {
		function: FunctionInfo,
	},
	ThreadCreated {
		thread_id: NativeThreadId,
	},
	ThreadRenamed {
		thread_id: NativeThreadId,
		name: String,
	},
	ThreadDestroyed {
		thread_id: NativeThreadId,
	},
	RuntimeSuspendStarted {
		reason: SuspendReason,
	},
	RuntimeSuspendFinished,
	RuntimeResumeStarted,
	RuntimeResumeFinished,
	RuntimeThreadSuspended {
		thread_id: NativeThreadId,
	},
	RuntimeThreadResumed {
		thread_id: NativeThreadId,
	},
	GarbageCollectionStarted {
		generations_collected: Vec<bool>,
		bounds: Vec<GcGenerationRange>,
	},
	GarbageCollectionFinished {
		bounds: Vec<GcGenerationRange>,
	},
	SurvivingReferences {
		block_starts: Vec<ObjectAddress>,
		lengths: Vec<usize>,
	},
	MovedReferences {
		old_block_starts: Vec<ObjectAddress>,
		new_block_starts: Vec<ObjectAddress>,
		lengths: Vec<usize>,
	},
	MethodCalled {
		function: FunctionInfo,
		#[serde(default)]
		arguments: Vec<RawArgument>,
	},
	MethodReturned {
		function: FunctionInfo,
		#[serde(default)]
		return_value: Option<RawValue>,
		#[serde(default)]
		by_ref_arguments: Vec<RawArgument>,
	},
}

impl NotificationPayload {
	pub const fn name(&self) -> &'static str {
		match self {
			Self::Heartbeat => "heartbeat",
			Self::ProfilerInitialized => "profiler_initialized",
			Self::ProfilerDestroyed => "profiler_destroyed",
			Self::ModuleLoaded { .. } => "module_loaded",
			Self::TypeLoaded { .. } => "type_loaded",
			Self::JitCompilationStarted { .. } => "jit_compilation_started",
			Self::ThreadCreated { .. } => "thread_created",
			Self::ThreadRenamed { .. } => "thread_renamed",
			Self::ThreadDestroyed { .. } => "thread_destroyed",
			Self::RuntimeSuspendStarted { .. } => "runtime_suspend_started",
			Self::RuntimeSuspendFinished => "runtime_suspend_finished",
			Self::RuntimeResumeStarted => "runtime_resume_started",
			Self::RuntimeResumeFinished => "runtime_resume_finished",
			Self::RuntimeThreadSuspended { .. } => "runtime_thread_suspended",
			Self::RuntimeThreadResumed { .. } => "runtime_thread_resumed",
			Self::GarbageCollectionStarted { .. } => "garbage_collection_started",
			Self::GarbageCollectionFinished { .. } => "garbage_collection_finished",
			Self::SurvivingReferences { .. } => "surviving_references",
			Self::MovedReferences { .. } => "moved_references",
			Self::MethodCalled { .. } => "method_called",
			Self::MethodReturned { .. } => "method_returned",
		}
	}
}
