use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{MdToken, ModuleId, NativeThreadId, NotificationId, ProcessId};

/// Envelope attached to every raw notification.
///
/// The transport guarantees that notifications sharing a `thread_id` are
/// delivered in the order the runtime produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawEventInfo {
	pub id: NotificationId,
	pub process_id: ProcessId,
	pub thread_id: NativeThreadId,
}

impl RawEventInfo {
	pub const fn new(id: u64, process_id: u32, thread_id: usize) -> Self {
		Self {
			id: NotificationId(id),
			process_id: ProcessId(process_id),
			thread_id: NativeThreadId(thread_id),
		}
	}
}

impl fmt::Display for RawEventInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} pid={} tid={}", self.id, self.process_id, self.thread_id)
	}
}

/// Loaded module handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleInfo {
	pub id: ModuleId,
}

/// Type handle: declaring module plus type definition token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeInfo {
	pub module_id: ModuleId,
	pub type_token: MdToken,
}

/// Function handle: declaring module, declaring type and method token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionInfo {
	pub module_id: ModuleId,
	pub type_token: MdToken,
	pub function_token: MdToken,
}

impl FunctionInfo {
	pub const fn new(module_id: usize, type_token: u32, function_token: u32) -> Self {
		Self {
			module_id: ModuleId(module_id),
			type_token: MdToken(type_token),
			function_token: MdToken(function_token),
		}
	}

	pub const fn declaring_type(&self) -> TypeInfo {
		TypeInfo {
			module_id: self.module_id,
			type_token: self.type_token,
		}
	}
}

impl fmt::Display for FunctionInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.module_id, self.function_token)
	}
}
