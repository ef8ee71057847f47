//! Statically known plugin interface: one visit method per event group.

use std::sync::Arc;

use umbra_primitives::{FunctionInfo, ModuleId, RawArgument, RawValue, SuspendReason, TypeInfo};

use crate::hub::{EventArgs, HandlerId, RuntimeEvent, RuntimeEventsHub};
use crate::object::ShadowObject;
use crate::thread::ShadowThreadId;

/// Analysis plugin. Every visit method defaults to a no-op.
///
/// Calls happen on shadow-thread workers: calls for one target thread are
/// sequential and in order, calls for different threads are concurrent.
#[allow(unused_variables)]
pub trait Plugin: Send + Sync {
	fn name(&self) -> &str;

	fn profiler_initialized(&self, args: &EventArgs<'_>) {}
	fn profiler_destroyed(&self, args: &EventArgs<'_>) {}
	fn module_loaded(&self, args: &EventArgs<'_>, module: ModuleId, path: &str) {}
	fn type_loaded(&self, args: &EventArgs<'_>, ty: &TypeInfo) {}
	fn jit_compilation_started(&self, args: &EventArgs<'_>, function: &FunctionInfo) {}
	fn thread_created(&self, args: &EventArgs<'_>, thread: ShadowThreadId) {}
	fn thread_renamed(&self, args: &EventArgs<'_>, thread: ShadowThreadId, name: &str) {}
	fn thread_destroyed(&self, args: &EventArgs<'_>, thread: ShadowThreadId) {}
	fn runtime_suspend_started(&self, args: &EventArgs<'_>, reason: SuspendReason) {}
	fn runtime_suspend_finished(&self, args: &EventArgs<'_>, reason: SuspendReason, epoch: u64) {}
	fn runtime_thread_suspended(&self, args: &EventArgs<'_>, thread: ShadowThreadId) {}
	fn runtime_resume_started(&self, args: &EventArgs<'_>) {}
	fn runtime_thread_resumed(&self, args: &EventArgs<'_>, thread: ShadowThreadId) {}
	fn runtime_resume_finished(&self, args: &EventArgs<'_>) {}
	fn garbage_collection_started(&self, args: &EventArgs<'_>) {}
	fn garbage_collection_finished(&self, args: &EventArgs<'_>, collected: usize) {}
	fn method_called(&self, args: &EventArgs<'_>, function: &FunctionInfo, arguments: &[RawArgument]) {}
	fn method_returned(&self, args: &EventArgs<'_>, function: &FunctionInfo, return_value: Option<&RawValue>, by_ref_arguments: &[RawArgument]) {}
	fn lock_acquire_attempted(&self, args: &EventArgs<'_>, object: &Arc<ShadowObject>) {}
	fn lock_acquire_returned(&self, args: &EventArgs<'_>, object: &Arc<ShadowObject>, success: bool) {}
	fn lock_release_called(&self, args: &EventArgs<'_>, object: &Arc<ShadowObject>) {}
	fn lock_released(&self, args: &EventArgs<'_>, object: &Arc<ShadowObject>) {}
	fn object_wait_attempted(&self, args: &EventArgs<'_>, object: &Arc<ShadowObject>) {}
	fn object_wait_returned(&self, args: &EventArgs<'_>, object: &Arc<ShadowObject>, success: bool) {}
	fn object_pulse_called(&self, args: &EventArgs<'_>, object: &Arc<ShadowObject>, all: bool) {}
	fn object_pulse_returned(&self, args: &EventArgs<'_>, object: &Arc<ShadowObject>, all: bool) {}
	fn field_accessed(&self, args: &EventArgs<'_>, field: u64, is_write: bool, instance: Option<&Arc<ShadowObject>>) {}
	fn array_element_accessed(&self, args: &EventArgs<'_>, element: u64, is_write: bool, array: &Arc<ShadowObject>, index: i32) {}
}

/// Routes hub events to a fixed list of plugins.
pub struct PluginHost {
	plugins: Arc<[Arc<dyn Plugin>]>,
}

impl PluginHost {
	pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
		Self { plugins: plugins.into() }
	}

	pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
		&self.plugins
	}

	/// Subscribes the host to every event on `hub`.
	pub fn attach(&self, hub: &RuntimeEventsHub) -> HandlerId {
		let plugins = Arc::clone(&self.plugins);
		tracing::debug!(plugins = plugins.len(), "plugin_host.attach");
		hub.subscribe_all(move |args, event| {
			for plugin in plugins.iter() {
				dispatch(plugin.as_ref(), args, event);
			}
		})
	}
}

/// Operand-only events (field/array instance and index) carry no plugin call.
fn dispatch(plugin: &dyn Plugin, args: &EventArgs<'_>, event: &RuntimeEvent) {
	match event {
		RuntimeEvent::ProfilerInitialized => plugin.profiler_initialized(args),
		RuntimeEvent::ProfilerDestroyed => plugin.profiler_destroyed(args),
		RuntimeEvent::ModuleLoaded { module, path } => plugin.module_loaded(args, *module, path),
		RuntimeEvent::TypeLoaded { ty } => plugin.type_loaded(args, ty),
		RuntimeEvent::JitCompilationStarted { function } => plugin.jit_compilation_started(args, function),
		RuntimeEvent::ThreadCreated { thread, .. } => plugin.thread_created(args, *thread),
		RuntimeEvent::ThreadRenamed { thread, name } => plugin.thread_renamed(args, *thread, name),
		RuntimeEvent::ThreadDestroyed { thread } => plugin.thread_destroyed(args, *thread),
		RuntimeEvent::RuntimeSuspendStarted { reason } => plugin.runtime_suspend_started(args, *reason),
		RuntimeEvent::RuntimeSuspendFinished { reason, epoch } => plugin.runtime_suspend_finished(args, *reason, *epoch),
		RuntimeEvent::RuntimeThreadSuspended { thread } => plugin.runtime_thread_suspended(args, *thread),
		RuntimeEvent::RuntimeResumeStarted => plugin.runtime_resume_started(args),
		RuntimeEvent::RuntimeThreadResumed { thread } => plugin.runtime_thread_resumed(args, *thread),
		RuntimeEvent::RuntimeResumeFinished => plugin.runtime_resume_finished(args),
		RuntimeEvent::GarbageCollectionStarted { .. } => plugin.garbage_collection_started(args),
		RuntimeEvent::GarbageCollectionFinished { collected, .. } => plugin.garbage_collection_finished(args, *collected),
		RuntimeEvent::MethodCalled { function, arguments } => plugin.method_called(args, function, arguments),
		RuntimeEvent::MethodReturned {
			function,
			return_value,
			by_ref_arguments,
		} => plugin.method_returned(args, function, return_value.as_ref(), by_ref_arguments),
		RuntimeEvent::LockAcquireAttempted { object, .. } => plugin.lock_acquire_attempted(args, object),
		RuntimeEvent::LockAcquireReturned { object, success, .. } => plugin.lock_acquire_returned(args, object, *success),
		RuntimeEvent::LockReleaseCalled { object, .. } => plugin.lock_release_called(args, object),
		RuntimeEvent::LockReleased { object, .. } => plugin.lock_released(args, object),
		RuntimeEvent::ObjectWaitAttempted { object, .. } => plugin.object_wait_attempted(args, object),
		RuntimeEvent::ObjectWaitReturned { object, success, .. } => plugin.object_wait_returned(args, object, *success),
		RuntimeEvent::ObjectPulseCalled { object, all, .. } => plugin.object_pulse_called(args, object, *all),
		RuntimeEvent::ObjectPulseReturned { object, all, .. } => plugin.object_pulse_returned(args, object, *all),
		RuntimeEvent::FieldAccessed { field, is_write, instance } => plugin.field_accessed(args, *field, *is_write, instance.as_ref()),
		RuntimeEvent::ArrayElementAccessed { element, is_write, array, index } => plugin.array_element_accessed(args, *element, *is_write, array, *index),
		RuntimeEvent::SurvivingReferences { .. }
		| RuntimeEvent::MovedReferences { .. }
		| RuntimeEvent::FieldInstanceAccessed { .. }
		| RuntimeEvent::ArrayInstanceAccessed { .. }
		| RuntimeEvent::ArrayIndexAccessed { .. } => {}
	}
}
