//! Metadata resolution and method interpretation descriptors.

use parking_lot::RwLock;
use rustc_hash::FxHashMap as HashMap;
use umbra_primitives::{FunctionInfo, MdToken, MethodInterpretation, ModuleId, ProcessId, RawArgument, RawValue, SuccessCheck, TypeInfo};

use crate::config::{MethodDescriptorConfig, SymbolConfig};

/// Resolved method identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDef {
	/// Fully qualified `Namespace.Type::Method` name.
	pub name: String,
}

impl MethodDef {
	pub fn declaring_type(&self) -> &str {
		self.name.rsplit_once("::").map_or("", |(ty, _)| ty)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDef {
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleDef {
	pub path: String,
}

/// Read-only metadata lookups. A `None` is reported as "unknown" and
/// never stops event delivery.
pub trait MetadataResolver: Send + Sync {
	fn resolve_method(&self, process: ProcessId, function: &FunctionInfo) -> Option<MethodDef>;

	fn resolve_type(&self, _process: ProcessId, _ty: &TypeInfo) -> Option<TypeDef> {
		None
	}

	fn resolve_module(&self, _process: ProcessId, _module: ModuleId) -> Option<ModuleDef> {
		None
	}
}

/// Symbol table filled from configuration or by hand.
#[derive(Debug, Default)]
pub struct StaticMetadataResolver {
	methods: RwLock<HashMap<(ModuleId, MdToken), MethodDef>>,
	modules: RwLock<HashMap<(ProcessId, ModuleId), ModuleDef>>,
}

impl StaticMetadataResolver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_symbols(symbols: &[SymbolConfig]) -> Self {
		let resolver = Self::new();
		for symbol in symbols {
			resolver.insert_method(ModuleId(symbol.module), MdToken(symbol.token), symbol.name.clone());
		}
		resolver
	}

	pub fn insert_method(&self, module: ModuleId, token: MdToken, name: impl Into<String>) {
		self.methods.write().insert((module, token), MethodDef { name: name.into() });
	}

	pub fn insert_module(&self, process: ProcessId, module: ModuleId, path: impl Into<String>) {
		self.modules.write().insert((process, module), ModuleDef { path: path.into() });
	}
}

impl MetadataResolver for StaticMetadataResolver {
	fn resolve_method(&self, _process: ProcessId, function: &FunctionInfo) -> Option<MethodDef> {
		self.methods.read().get(&(function.module_id, function.function_token)).cloned()
	}

	fn resolve_module(&self, process: ProcessId, module: ModuleId) -> Option<ModuleDef> {
		self.modules.read().get(&(process, module)).cloned()
	}
}

/// How calls to one method are interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
	pub name: String,
	pub interpretation: MethodInterpretation,
	pub success: SuccessCheck,
}

impl MethodDescriptor {
	pub fn new(name: impl Into<String>, interpretation: MethodInterpretation, success: SuccessCheck) -> Self {
		Self {
			name: name.into(),
			interpretation,
			success,
		}
	}

	/// Evaluates the success check against a returning call.
	pub fn succeeded(&self, return_value: Option<&RawValue>, by_ref_arguments: &[RawArgument]) -> bool {
		match self.success {
			SuccessCheck::Always => true,
			SuccessCheck::ReturnValueTrue => return_value.and_then(RawValue::as_bool).unwrap_or(false),
			SuccessCheck::ByRefArgumentTrue(index) => by_ref_arguments
				.iter()
				.find(|argument| argument.index == index)
				.and_then(|argument| argument.value.as_bool())
				.unwrap_or(false),
		}
	}
}

const MONITOR: &str = "System.Threading.Monitor";
const DISPATCHER: &str = "Umbra.Instrumentation.EventDispatcher";

/// Name-keyed method descriptors.
#[derive(Debug, Clone, Default)]
pub struct MethodDescriptorRegistry {
	by_name: HashMap<Box<str>, MethodDescriptor>,
}

impl MethodDescriptorRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Monitor primitives plus the injected field/array helpers.
	pub fn with_defaults() -> Self {
		use MethodInterpretation as I;
		use SuccessCheck as S;

		let mut registry = Self::new();
		for (method, interpretation, success) in [
			("Enter", I::LockBlockingAcquire, S::Always),
			("ReliableEnter", I::LockBlockingAcquire, S::ByRefArgumentTrue(1)),
			("TryEnter", I::LockTryAcquire, S::ReturnValueTrue),
			("ReliableEnterTimeout", I::LockTryAcquire, S::ByRefArgumentTrue(2)),
			("Exit", I::LockRelease, S::Always),
			("Wait", I::SignalBlockingWait, S::ReturnValueTrue),
			("ObjWait", I::SignalTryWait, S::ReturnValueTrue),
			("Pulse", I::SignalPulseOne, S::Always),
			("PulseAll", I::SignalPulseAll, S::Always),
		] {
			registry.insert(MethodDescriptor::new(format!("{MONITOR}::{method}"), interpretation, success));
		}
		for (method, interpretation) in [
			("FieldAccess", I::FieldAccess),
			("FieldInstanceAccess", I::FieldInstanceAccess),
			("ArrayElementAccess", I::ArrayElementAccess),
			("ArrayInstanceAccess", I::ArrayInstanceAccess),
			("ArrayIndexAccess", I::ArrayIndexAccess),
		] {
			registry.insert(MethodDescriptor::new(format!("{DISPATCHER}::{method}"), interpretation, S::Always));
		}
		registry
	}

	/// Defaults with configured entries layered on top.
	pub fn from_config(methods: &[MethodDescriptorConfig]) -> Self {
		let mut registry = Self::with_defaults();
		for method in methods {
			registry.insert(MethodDescriptor::new(method.name.clone(), method.interpretation, method.success));
		}
		registry
	}

	/// Inserts or replaces. Returns the replaced descriptor.
	pub fn insert(&mut self, descriptor: MethodDescriptor) -> Option<MethodDescriptor> {
		self.by_name.insert(descriptor.name.clone().into_boxed_str(), descriptor)
	}

	pub fn get(&self, name: &str) -> Option<&MethodDescriptor> {
		self.by_name.get(name)
	}

	pub fn len(&self) -> usize {
		self.by_name.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_name.is_empty()
	}
}
