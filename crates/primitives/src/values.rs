use serde::{Deserialize, Serialize};

/// Address of a managed object at the time the notification was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectAddress(pub usize);

/// Argument or return value captured by injected instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RawValue {
	Bool(bool),
	I32(i32),
	U32(u32),
	I64(i64),
	U64(u64),
	F64(f64),
	/// Reference to a managed object. Address zero encodes `null`.
	Object(ObjectAddress),
}

impl RawValue {
	pub const fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(value) => Some(*value),
			_ => None,
		}
	}

	/// Widens any integral value to `u64`. Negative values are rejected.
	pub fn as_u64(&self) -> Option<u64> {
		match *self {
			Self::I32(value) => u64::try_from(value).ok(),
			Self::U32(value) => Some(u64::from(value)),
			Self::I64(value) => u64::try_from(value).ok(),
			Self::U64(value) => Some(value),
			_ => None,
		}
	}

	pub fn as_i32(&self) -> Option<i32> {
		match *self {
			Self::I32(value) => Some(value),
			Self::U32(value) => i32::try_from(value).ok(),
			Self::I64(value) => i32::try_from(value).ok(),
			Self::U64(value) => i32::try_from(value).ok(),
			_ => None,
		}
	}

	pub const fn as_object(&self) -> Option<ObjectAddress> {
		match self {
			Self::Object(address) if address.0 != 0 => Some(*address),
			_ => None,
		}
	}
}

/// One captured argument: parameter index plus value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawArgument {
	pub index: u16,
	pub value: RawValue,
}

impl RawArgument {
	pub const fn new(index: u16, value: RawValue) -> Self {
		Self { index, value }
	}
}
