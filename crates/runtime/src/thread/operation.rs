use std::sync::Arc;

use crate::object::ShadowObject;

/// Operands announced by instrumentation ahead of a field or array access.
///
/// The injected helpers report the instance (and for arrays the index)
/// first, then the access itself; the access consumes the most recent
/// operand of each kind.
#[derive(Debug, Default)]
pub struct OperationContext {
	field_instances: Vec<Option<Arc<ShadowObject>>>,
	array_instances: Vec<Option<Arc<ShadowObject>>>,
	array_indices: Vec<i32>,
}

impl OperationContext {
	pub fn push_field_instance(&mut self, instance: Option<Arc<ShadowObject>>) {
		self.field_instances.push(instance);
	}

	/// Most recent field instance. `None` means a static field access.
	pub fn take_field_instance(&mut self) -> Option<Arc<ShadowObject>> {
		self.field_instances.pop().flatten()
	}

	pub fn push_array_instance(&mut self, instance: Option<Arc<ShadowObject>>) {
		self.array_instances.push(instance);
	}

	pub fn take_array_instance(&mut self) -> Option<Arc<ShadowObject>> {
		self.array_instances.pop().flatten()
	}

	pub fn push_array_index(&mut self, index: i32) {
		self.array_indices.push(index);
	}

	pub fn take_array_index(&mut self) -> Option<i32> {
		self.array_indices.pop()
	}

	pub fn is_empty(&self) -> bool {
		self.field_instances.is_empty() && self.array_instances.is_empty() && self.array_indices.is_empty()
	}
}
