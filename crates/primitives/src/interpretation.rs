use serde::{Deserialize, Serialize};

/// How the analysis interprets calls to a particular method.
///
/// Regular methods only produce method called/returned events; the other
/// tags make the executor raise the specialised lock, signal, field and
/// array events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodInterpretation {
	#[default]
	Regular,
	LockTryAcquire,
	LockBlockingAcquire,
	LockRelease,
	SignalTryWait,
	SignalBlockingWait,
	SignalPulseOne,
	SignalPulseAll,
	FieldAccess,
	FieldInstanceAccess,
	ArrayElementAccess,
	ArrayInstanceAccess,
	ArrayIndexAccess,
}

impl MethodInterpretation {
	pub const fn is_lock_acquire(self) -> bool {
		matches!(self, Self::LockTryAcquire | Self::LockBlockingAcquire)
	}

	pub const fn is_signal_wait(self) -> bool {
		matches!(self, Self::SignalTryWait | Self::SignalBlockingWait)
	}

	pub const fn is_signal_pulse(self) -> bool {
		matches!(self, Self::SignalPulseOne | Self::SignalPulseAll)
	}
}

/// Decides whether a returning acquire/wait call succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum SuccessCheck {
	/// Blocking calls that only return on success.
	#[default]
	Always,
	/// `bool` return value.
	ReturnValueTrue,
	/// `ref bool` argument at the given parameter index.
	ByRefArgumentTrue(u16),
}
