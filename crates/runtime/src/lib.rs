//! Shadow execution of a managed process.
//!
//! Raw runtime notifications arrive on arbitrary delivery threads. The
//! [`HappensBeforeScheduler`] re-serializes them per target thread onto a
//! dedicated [`ShadowThread`] worker, gates them on the process-wide
//! [`EpochSource`] while the runtime is suspended, and raises typed
//! [`RuntimeEvent`]s on the [`RuntimeEventsHub`] in per-thread causal order.

pub mod commands;
pub mod config;
pub mod epoch;
pub mod error;
mod executor;
pub mod hub;
pub mod memory;
pub mod metadata;
pub mod notification;
pub mod object;
pub mod plugin;
pub mod reporting;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod thread;

pub use commands::{Command, CommandSink, NullCommandSink, RecordingCommandSink};
pub use config::{MethodDescriptorConfig, RuntimeConfig, SchedulerConfig, SymbolConfig};
pub use epoch::EpochSource;
pub use error::{ConfigError, EpochError, JobError, RuntimeStateError, SchedulerError, ShadowThreadError, SyncBlockError};
pub use hub::{EventArgs, HandlerId, RuntimeEvent, RuntimeEventKind, RuntimeEventsHub};
pub use memory::ShadowMemory;
pub use metadata::{MetadataResolver, MethodDef, MethodDescriptor, MethodDescriptorRegistry, ModuleDef, StaticMetadataResolver, TypeDef};
pub use notification::{NotificationPayload, RawNotification};
pub use object::{ObjectId, ShadowObject, SyncBlock};
pub use plugin::{Plugin, PluginHost};
pub use reporting::{Report, ReportingService, Severity};
pub use runtime::{RuntimeState, ShadowRuntime};
pub use scheduler::HappensBeforeScheduler;
pub use session::SessionRegistry;
pub use thread::{CallFrame, Job, JobFlags, ShadowThread, ShadowThreadId, ThreadState, WorkerExit};
