/// Execution classes used for worker naming and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Per target-thread job loop.
	ShadowThread,
	/// Joins workers of destroyed shadow threads off the delivery path.
	Reaper,
	/// Feeds notifications into the scheduler (transport or replay).
	Delivery,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::ShadowThread => "shadow_thread",
			Self::Reaper => "reaper",
			Self::Delivery => "delivery",
		}
	}
}
