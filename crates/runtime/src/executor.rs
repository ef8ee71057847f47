//! Job bodies: what runs on a shadow-thread worker for each notification.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use umbra_primitives::MethodInterpretation as I;
use umbra_primitives::{FunctionInfo, GcGeneration, GcGenerationRange, ModuleId, ObjectAddress, RawArgument, RawEventInfo, RawValue, SuspendReason, TypeInfo};

use crate::commands::Command;
use crate::epoch::EpochSource;
use crate::error::JobError;
use crate::hub::{EventArgs, RuntimeEvent, RuntimeEventsHub};
use crate::metadata::{MethodDescriptor, MethodDescriptorRegistry};
use crate::object::ShadowObject;
use crate::reporting::Report;
use crate::runtime::{RuntimeState, ShadowRuntime};
use crate::scheduler::barrier::{BarrierCoordinator, Completion};
use crate::thread::{CallFrame, ShadowThread, ThreadState};

/// Applies notifications to shadow state and raises the resulting events.
///
/// Every method runs on the worker of the thread the notification belongs
/// to; state is mutated before the matching event is raised.
pub(crate) struct RuntimeEventExecutor {
	runtime: Arc<ShadowRuntime>,
	hub: Arc<RuntimeEventsHub>,
	descriptors: Arc<MethodDescriptorRegistry>,
	barriers: Arc<Mutex<BarrierCoordinator>>,
	epoch: Arc<EpochSource>,
	poll: Duration,
}

impl RuntimeEventExecutor {
	pub(crate) fn new(
		runtime: Arc<ShadowRuntime>,
		hub: Arc<RuntimeEventsHub>,
		descriptors: Arc<MethodDescriptorRegistry>,
		barriers: Arc<Mutex<BarrierCoordinator>>,
		epoch: Arc<EpochSource>,
		poll: Duration,
	) -> Self {
		Self {
			runtime,
			hub,
			descriptors,
			barriers,
			epoch,
			poll,
		}
	}

	fn raise(&self, thread: &ShadowThread, info: &RawEventInfo, event: RuntimeEvent) {
		let args = EventArgs {
			runtime: &self.runtime,
			thread,
			info,
		};
		self.hub.raise(&args, event);
	}

	fn warn(&self, info: &RawEventInfo, category: &'static str, message: String) {
		self.runtime.reports().report(Report::warning(category, message).with_event(info));
	}

	pub(crate) fn profiler_initialized(&self, thread: &ShadowThread, info: &RawEventInfo) -> Result<(), JobError> {
		if let Err(err) = self.runtime.transition(RuntimeState::Executing) {
			self.warn(info, "protocol", err.to_string());
		}
		self.raise(thread, info, RuntimeEvent::ProfilerInitialized);
		Ok(())
	}

	pub(crate) fn profiler_destroyed(&self, thread: &ShadowThread, info: &RawEventInfo) -> Result<(), JobError> {
		self.raise(thread, info, RuntimeEvent::ProfilerDestroyed);
		Ok(())
	}

	pub(crate) fn module_loaded(&self, thread: &ShadowThread, info: &RawEventInfo, module: ModuleId, path: String) -> Result<(), JobError> {
		self.runtime.record_module(module, path.clone());
		self.raise(thread, info, RuntimeEvent::ModuleLoaded { module, path });
		Ok(())
	}

	pub(crate) fn type_loaded(&self, thread: &ShadowThread, info: &RawEventInfo, ty: TypeInfo) -> Result<(), JobError> {
		if !self.runtime.record_type(ty) {
			tracing::debug!(module = %ty.module_id, token = %ty.type_token, "executor.type.reloaded");
		}
		self.raise(thread, info, RuntimeEvent::TypeLoaded { ty });
		Ok(())
	}

	pub(crate) fn jit_compilation_started(&self, thread: &ShadowThread, info: &RawEventInfo, function: FunctionInfo) -> Result<(), JobError> {
		self.runtime.record_jit_compilation();
		self.raise(thread, info, RuntimeEvent::JitCompilationStarted { function });
		Ok(())
	}

	pub(crate) fn thread_created(&self, thread: &ShadowThread, info: &RawEventInfo) -> Result<(), JobError> {
		self.raise(
			thread,
			info,
			RuntimeEvent::ThreadCreated {
				thread: thread.id(),
				native: thread.native_id(),
			},
		);
		Ok(())
	}

	pub(crate) fn thread_renamed(&self, thread: &ShadowThread, info: &RawEventInfo, name: String) -> Result<(), JobError> {
		thread.set_name(name.clone());
		self.raise(thread, info, RuntimeEvent::ThreadRenamed { thread: thread.id(), name });
		Ok(())
	}

	pub(crate) fn thread_destroyed(&self, thread: &ShadowThread, info: &RawEventInfo) -> Result<(), JobError> {
		let depth = thread.call_stack_depth();
		if depth > 0 {
			tracing::debug!(vid = %thread.id(), depth, "executor.thread.destroyed_with_frames");
		}
		let completions = {
			let mut barriers = self.barriers.lock();
			barriers.forget(thread.id());
			barriers.pump(&self.runtime, &self.epoch)
		};
		self.raise(thread, info, RuntimeEvent::ThreadDestroyed { thread: thread.id() });
		self.complete(thread, info, completions);
		Ok(())
	}

	pub(crate) fn runtime_suspend_started(&self, thread: &ShadowThread, info: &RawEventInfo, barrier: u64, target: u64, reason: SuspendReason) -> Result<(), JobError> {
		thread.enter_epoch(target);
		self.raise(thread, info, RuntimeEvent::RuntimeSuspendStarted { reason });
		self.initiator_arrived(thread, info, barrier);
		Ok(())
	}

	pub(crate) fn runtime_resume_started(&self, thread: &ShadowThread, info: &RawEventInfo, barrier: u64) -> Result<(), JobError> {
		self.raise(thread, info, RuntimeEvent::RuntimeResumeStarted);
		self.initiator_arrived(thread, info, barrier);
		Ok(())
	}

	fn initiator_arrived(&self, thread: &ShadowThread, info: &RawEventInfo, barrier: u64) {
		let completions = {
			let mut barriers = self.barriers.lock();
			if !barriers.initiator_arrived(barrier) {
				tracing::debug!(barrier, "executor.barrier.gone");
			}
			barriers.pump(&self.runtime, &self.epoch)
		};
		self.complete(thread, info, completions);
	}

	pub(crate) fn runtime_thread_suspended(&self, thread: &ShadowThread, info: &RawEventInfo) -> Result<(), JobError> {
		let (target, completions) = {
			let mut barriers = self.barriers.lock();
			let target = barriers.thread_suspended(thread.id());
			if let Some(target) = target {
				thread.enter_epoch(target);
			}
			(target, barriers.pump(&self.runtime, &self.epoch))
		};
		if target.is_none() {
			self.warn(info, "protocol", format!("thread {} suspended outside of a suspend barrier", thread.id()));
		}
		thread.set_state(ThreadState::Suspended);
		self.raise(thread, info, RuntimeEvent::RuntimeThreadSuspended { thread: thread.id() });
		self.complete(thread, info, completions);
		Ok(())
	}

	pub(crate) fn runtime_thread_resumed(&self, thread: &ShadowThread, info: &RawEventInfo) -> Result<(), JobError> {
		let (matched, completions) = {
			let mut barriers = self.barriers.lock();
			let matched = barriers.thread_resumed(thread.id());
			(matched, barriers.pump(&self.runtime, &self.epoch))
		};
		if !matched {
			self.warn(info, "protocol", format!("thread {} resumed outside of a resume barrier", thread.id()));
		}
		thread.set_state(ThreadState::Running);
		self.raise(thread, info, RuntimeEvent::RuntimeThreadResumed { thread: thread.id() });
		self.complete(thread, info, completions);
		Ok(())
	}

	/// Raises the finish events of barriers completed by this worker's arrival.
	fn complete(&self, thread: &ShadowThread, info: &RawEventInfo, completions: Vec<Completion>) {
		for completion in completions {
			let event = match completion {
				Completion::Suspended { reason, epoch } => RuntimeEvent::RuntimeSuspendFinished { reason, epoch },
				Completion::Resumed => RuntimeEvent::RuntimeResumeFinished,
			};
			self.raise(thread, info, event);
		}
	}

	pub(crate) fn garbage_collection_started(&self, thread: &ShadowThread, info: &RawEventInfo, generations_collected: Vec<bool>, bounds: Vec<GcGenerationRange>) -> Result<(), JobError> {
		let condemned = self.runtime.memory().begin_collection(&generations_collected, &bounds);
		tracing::debug!(condemned, "executor.gc.started");
		thread.set_state(ThreadState::GarbageCollecting);
		let generations = GcGeneration::ALL
			.into_iter()
			.filter(|generation| generations_collected.get(generation.index()).copied().unwrap_or(false))
			.collect();
		self.raise(thread, info, RuntimeEvent::GarbageCollectionStarted { generations, bounds });
		Ok(())
	}

	pub(crate) fn surviving_references(&self, thread: &ShadowThread, info: &RawEventInfo, starts: Vec<ObjectAddress>, lengths: Vec<usize>) -> Result<(), JobError> {
		let rescued = self.runtime.memory().surviving(&starts, &lengths);
		self.raise(thread, info, RuntimeEvent::SurvivingReferences { blocks: starts.len(), rescued });
		Ok(())
	}

	pub(crate) fn moved_references(&self, thread: &ShadowThread, info: &RawEventInfo, old_starts: Vec<ObjectAddress>, new_starts: Vec<ObjectAddress>, lengths: Vec<usize>) -> Result<(), JobError> {
		if old_starts.len() != new_starts.len() || old_starts.len() != lengths.len() {
			self.warn(info, "protocol", format!("moved references with mismatched block lists ({}/{}/{})", old_starts.len(), new_starts.len(), lengths.len()));
		}
		let moved = self.runtime.memory().moved(&old_starts, &new_starts, &lengths);
		if moved.overflowed > 0 {
			self.warn(info, "protocol", format!("moved references overflow the address space for {} objects", moved.overflowed));
		}
		self.raise(
			thread,
			info,
			RuntimeEvent::MovedReferences {
				blocks: old_starts.len(),
				relocated: moved.relocated,
			},
		);
		Ok(())
	}

	pub(crate) fn garbage_collection_finished(&self, thread: &ShadowThread, info: &RawEventInfo, bounds: Vec<GcGenerationRange>) -> Result<(), JobError> {
		let summary = self.runtime.memory().finish_collection(&bounds);
		thread.set_state(ThreadState::Running);
		self.raise(
			thread,
			info,
			RuntimeEvent::GarbageCollectionFinished {
				collected: summary.collected,
				tracked: summary.tracked,
			},
		);
		self.runtime.commands().send(Command::ContinueExecution {
			process: self.runtime.process_id(),
		});
		Ok(())
	}

	fn descriptor(&self, function: &FunctionInfo) -> Option<&MethodDescriptor> {
		let name = self.runtime.method_name(function);
		self.descriptors.get(&name)
	}

	/// Resolves the object passed as argument `index`, tracking it on first sight.
	fn object_argument(&self, arguments: &[RawArgument], index: u16) -> Option<Arc<ShadowObject>> {
		let address = argument(arguments, index)?.as_object()?;
		self.runtime.memory().get_or_track(address)
	}

	pub(crate) fn method_called(&self, thread: &ShadowThread, info: &RawEventInfo, function: FunctionInfo, arguments: Vec<RawArgument>) -> Result<(), JobError> {
		let interpretation = self.descriptor(&function).map_or(I::Regular, |descriptor| descriptor.interpretation);
		let mut frame = CallFrame::new(function, interpretation).with_arguments(arguments.clone());

		match interpretation {
			I::Regular => thread.push_call_stack(frame),
			I::LockTryAcquire | I::LockBlockingAcquire | I::LockRelease | I::SignalPulseOne | I::SignalPulseAll => {
				let object = self.object_argument(&arguments, 0);
				thread.push_call_stack(frame.with_object(object.clone()));
				match object {
					Some(object) => {
						let event = match interpretation {
							I::LockRelease => RuntimeEvent::LockReleaseCalled { function, object },
							I::SignalPulseOne | I::SignalPulseAll => RuntimeEvent::ObjectPulseCalled {
								function,
								object,
								all: interpretation == I::SignalPulseAll,
							},
							_ => RuntimeEvent::LockAcquireAttempted { function, object },
						};
						self.raise(thread, info, event);
					}
					None => self.warn(info, "protocol", format!("{interpretation:?} call without an object argument")),
				}
			}
			I::SignalTryWait | I::SignalBlockingWait => {
				let object = self.object_argument(&arguments, 0);
				// Nested wait overloads release the monitor once, on the outermost call.
				let already_waiting = thread.peek_call_stack().is_some_and(|caller| caller.interpretation.is_signal_wait());
				if !already_waiting
					&& let Some(object) = &object
				{
					match object.sync_block().release_all(thread.id()) {
						Ok(saved) => frame = frame.with_saved_recursion(Some(saved)),
						Err(err) => self.warn(info, "lock", format!("wait on {object}: {err}")),
					}
				}
				thread.push_call_stack(frame.with_object(object.clone()));
				match object {
					Some(object) => self.raise(thread, info, RuntimeEvent::ObjectWaitAttempted { function, object }),
					None => self.warn(info, "protocol", format!("{interpretation:?} call without an object argument")),
				}
			}
			I::FieldAccess => {
				thread.push_call_stack(frame);
				let is_write = argument(&arguments, 0).and_then(RawValue::as_bool);
				let field = argument(&arguments, 1).and_then(RawValue::as_u64);
				let instance = thread.operations().take_field_instance();
				match (is_write, field) {
					(Some(is_write), Some(field)) => self.raise(thread, info, RuntimeEvent::FieldAccessed { field, is_write, instance }),
					_ => self.warn(info, "protocol", "field access with malformed arguments".to_owned()),
				}
			}
			I::FieldInstanceAccess => {
				thread.push_call_stack(frame);
				let object = self.object_argument(&arguments, 0);
				thread.operations().push_field_instance(object.clone());
				if let Some(object) = object {
					self.raise(thread, info, RuntimeEvent::FieldInstanceAccessed { object });
				}
			}
			I::ArrayElementAccess => {
				thread.push_call_stack(frame);
				let is_write = argument(&arguments, 0).and_then(RawValue::as_bool);
				let element = argument(&arguments, 1).and_then(RawValue::as_u64);
				let (array, index) = {
					let mut operations = thread.operations();
					(operations.take_array_instance(), operations.take_array_index())
				};
				match (is_write, element, array, index) {
					(Some(is_write), Some(element), Some(array), Some(index)) => self.raise(
						thread,
						info,
						RuntimeEvent::ArrayElementAccessed {
							element,
							is_write,
							array,
							index,
						},
					),
					_ => self.warn(info, "protocol", "array element access without array operands".to_owned()),
				}
			}
			I::ArrayInstanceAccess => {
				thread.push_call_stack(frame);
				let object = self.object_argument(&arguments, 0);
				thread.operations().push_array_instance(object.clone());
				if let Some(object) = object {
					self.raise(thread, info, RuntimeEvent::ArrayInstanceAccessed { object });
				}
			}
			I::ArrayIndexAccess => {
				thread.push_call_stack(frame);
				match argument(&arguments, 0).and_then(RawValue::as_i32) {
					Some(index) => {
						thread.operations().push_array_index(index);
						self.raise(thread, info, RuntimeEvent::ArrayIndexAccessed { index });
					}
					None => self.warn(info, "protocol", "array index access without an index".to_owned()),
				}
			}
		}

		self.raise(thread, info, RuntimeEvent::MethodCalled { function, arguments });
		Ok(())
	}

	pub(crate) fn method_returned(&self, thread: &ShadowThread, info: &RawEventInfo, function: FunctionInfo, return_value: Option<RawValue>, by_ref_arguments: Vec<RawArgument>) -> Result<(), JobError> {
		let frame = thread.pop_call_stack()?;
		if frame.function != function {
			self.warn(info, "protocol", format!("return from {} does not match call of {}", self.runtime.method_name(&function), self.runtime.method_name(&frame.function)));
		}
		let succeeded = self
			.descriptor(&frame.function)
			.is_some_and(|descriptor| descriptor.succeeded(return_value.as_ref(), &by_ref_arguments));

		match (frame.interpretation, frame.object) {
			(I::LockTryAcquire | I::LockBlockingAcquire, Some(object)) => {
				if succeeded {
					object.sync_block().acquire(thread.id(), thread.cancel_token(), self.poll)?;
				}
				self.raise(
					thread,
					info,
					RuntimeEvent::LockAcquireReturned {
						function,
						object,
						success: succeeded,
					},
				);
			}
			(I::LockRelease, Some(object)) => {
				if let Err(err) = object.sync_block().release(thread.id()) {
					self.warn(info, "lock", format!("release of {object}: {err}"));
				}
				self.raise(thread, info, RuntimeEvent::LockReleased { function, object });
			}
			(I::SignalTryWait | I::SignalBlockingWait, Some(object)) => {
				// The outermost wait overload reacquires and reports.
				let still_waiting = thread.peek_call_stack().is_some_and(|caller| caller.interpretation == I::SignalTryWait);
				if !still_waiting {
					let count = frame.saved_recursion.unwrap_or(1);
					object.sync_block().acquire_with_recursion(thread.id(), count, thread.cancel_token(), self.poll)?;
					self.raise(
						thread,
						info,
						RuntimeEvent::ObjectWaitReturned {
							function,
							object,
							success: succeeded,
						},
					);
				}
			}
			(interpretation @ (I::SignalPulseOne | I::SignalPulseAll), Some(object)) => {
				self.raise(
					thread,
					info,
					RuntimeEvent::ObjectPulseReturned {
						function,
						object,
						all: interpretation == I::SignalPulseAll,
					},
				);
			}
			_ => {}
		}

		self.raise(
			thread,
			info,
			RuntimeEvent::MethodReturned {
				function,
				return_value,
				by_ref_arguments,
			},
		);
		Ok(())
	}
}

fn argument(arguments: &[RawArgument], index: u16) -> Option<&RawValue> {
	arguments.iter().find(|argument| argument.index == index).map(|argument| &argument.value)
}
