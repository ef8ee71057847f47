//! Runtime configuration loaded from TOML.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use umbra_primitives::{MethodInterpretation, SuccessCheck};

use crate::error::ConfigError;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
	pub scheduler: SchedulerConfig,
	/// Extra method descriptors layered over the built-in set.
	pub methods: Vec<MethodDescriptorConfig>,
	/// Static symbol table used when no external metadata resolver is wired.
	pub symbols: Vec<SymbolConfig>,
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
	/// Prefix of shadow-thread worker names.
	pub thread_name_prefix: String,
	/// Granularity at which a worker parked on a monitor re-checks cancellation.
	pub sync_block_poll_ms: u64,
	/// Age after which a pending suspend/resume barrier is reported on heartbeat.
	pub barrier_stall_warning_ms: u64,
	/// Maximum gap between heartbeats before a session is considered crashed.
	pub watchdog_timeout_ms: u64,
	/// How long teardown waits without worker progress before cancelling parked jobs.
	pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			thread_name_prefix: "shadow-thread".to_owned(),
			sync_block_poll_ms: 25,
			barrier_stall_warning_ms: 5_000,
			watchdog_timeout_ms: 30_000,
			shutdown_grace_ms: 1_000,
		}
	}
}

impl SchedulerConfig {
	pub fn sync_block_poll(&self) -> Duration {
		Duration::from_millis(self.sync_block_poll_ms.max(1))
	}

	pub fn barrier_stall_warning(&self) -> Duration {
		Duration::from_millis(self.barrier_stall_warning_ms)
	}

	pub fn watchdog_timeout(&self) -> Duration {
		Duration::from_millis(self.watchdog_timeout_ms)
	}

	pub fn shutdown_grace(&self) -> Duration {
		Duration::from_millis(self.shutdown_grace_ms)
	}
}

/// One `[[methods]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDescriptorConfig {
	/// Fully qualified `Namespace.Type::Method` name.
	pub name: String,
	pub interpretation: MethodInterpretation,
	#[serde(default)]
	pub success: SuccessCheck,
}

/// One `[[symbols]]` entry mapping a method token to a name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolConfig {
	pub module: usize,
	pub token: u32,
	/// Fully qualified `Namespace.Type::Method` name.
	pub name: String,
}

impl RuntimeConfig {
	/// Parses a TOML document.
	pub fn parse(input: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(input)?)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config = Self::parse(&input)?;
		tracing::debug!(path = %path.display(), methods = config.methods.len(), symbols = config.symbols.len(), "config.loaded");
		Ok(config)
	}
}
