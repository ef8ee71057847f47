//! Core types shared by every shadow execution layer: identifiers, raw event
//! records, runtime enums and raw argument values.

/// Identifier newtypes for processes, threads, notifications and metadata.
pub mod ids;
/// Event envelopes and metadata handles carried by raw notifications.
pub mod info;
/// Method interpretation tags and success checks.
pub mod interpretation;
/// Runtime suspension and garbage collection payloads.
pub mod runtime;
/// Raw argument and return values as delivered by the profiler.
pub mod values;

pub use ids::{MdToken, ModuleId, NativeThreadId, NotificationId, ProcessId};
pub use info::{FunctionInfo, ModuleInfo, RawEventInfo, TypeInfo};
pub use interpretation::{MethodInterpretation, SuccessCheck};
pub use runtime::{GcGeneration, GcGenerationRange, SuspendReason};
pub use values::{ObjectAddress, RawArgument, RawValue};
