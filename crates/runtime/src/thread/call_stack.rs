use std::sync::Arc;

use umbra_primitives::{FunctionInfo, MethodInterpretation, RawArgument};

use crate::object::ShadowObject;

/// One managed frame mirrored on the shadow call stack.
#[derive(Debug, Clone)]
pub struct CallFrame {
	pub function: FunctionInfo,
	pub interpretation: MethodInterpretation,
	pub arguments: Vec<RawArgument>,
	/// Monitor the call operates on, for lock and signal interpretations.
	pub object: Option<Arc<ShadowObject>>,
	/// Recursion count released on entry to a monitor wait.
	pub saved_recursion: Option<u32>,
}

impl CallFrame {
	pub fn new(function: FunctionInfo, interpretation: MethodInterpretation) -> Self {
		Self {
			function,
			interpretation,
			arguments: Vec::new(),
			object: None,
			saved_recursion: None,
		}
	}

	pub fn with_arguments(mut self, arguments: Vec<RawArgument>) -> Self {
		self.arguments = arguments;
		self
	}

	pub fn with_object(mut self, object: Option<Arc<ShadowObject>>) -> Self {
		self.object = object;
		self
	}

	pub fn with_saved_recursion(mut self, saved: Option<u32>) -> Self {
		self.saved_recursion = saved;
		self
	}
}

#[derive(Debug, Default)]
pub(crate) struct CallStack {
	frames: Vec<CallFrame>,
}

impl CallStack {
	pub(crate) fn push(&mut self, frame: CallFrame) {
		self.frames.push(frame);
	}

	pub(crate) fn pop(&mut self) -> Option<CallFrame> {
		self.frames.pop()
	}

	pub(crate) fn peek(&self) -> Option<&CallFrame> {
		self.frames.last()
	}

	pub(crate) fn depth(&self) -> usize {
		self.frames.len()
	}
}
