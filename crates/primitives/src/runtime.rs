use serde::{Deserialize, Serialize};

/// Why the runtime is suspending managed threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
	Other,
	Gc,
	AppDomainShutdown,
	CodePitching,
	Shutdown,
	InprocDebugger,
	GcPrep,
	ProfilerRequest,
}

impl SuspendReason {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Other => "other",
			Self::Gc => "gc",
			Self::AppDomainShutdown => "app_domain_shutdown",
			Self::CodePitching => "code_pitching",
			Self::Shutdown => "shutdown",
			Self::InprocDebugger => "inproc_debugger",
			Self::GcPrep => "gc_prep",
			Self::ProfilerRequest => "profiler_request",
		}
	}

	/// Whether a garbage collection may run while suspended for this reason.
	pub const fn allows_gc(self) -> bool {
		matches!(self, Self::Gc | Self::GcPrep)
	}
}

/// Managed heap generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcGeneration {
	Gen0,
	Gen1,
	Gen2,
	LargeObjectHeap,
	PinnedObjectHeap,
}

impl GcGeneration {
	pub const ALL: [GcGeneration; 5] = [Self::Gen0, Self::Gen1, Self::Gen2, Self::LargeObjectHeap, Self::PinnedObjectHeap];

	/// Index into the `generations_collected` flags of a GC start notification.
	pub const fn index(self) -> usize {
		match self {
			Self::Gen0 => 0,
			Self::Gen1 => 1,
			Self::Gen2 => 2,
			Self::LargeObjectHeap => 3,
			Self::PinnedObjectHeap => 4,
		}
	}
}

/// Address range occupied by one generation segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GcGenerationRange {
	pub generation: GcGeneration,
	pub start: usize,
	pub length: usize,
	pub reserved_length: usize,
}

impl GcGenerationRange {
	pub const fn contains(&self, address: usize) -> bool {
		address >= self.start && address - self.start < self.reserved_length
	}
}
