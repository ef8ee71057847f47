//! Umbra replay binary.
//!
//! Feeds a recorded JSON-lines notification trace through the session
//! registry and prints what the shadow runtime raised and reported.

mod trace;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use umbra_runtime::{NotificationPayload, NullCommandSink, RuntimeConfig, RuntimeEventsHub, SessionRegistry};

use crate::trace::TraceReader;

/// Replay command line arguments.
#[derive(Parser, Debug)]
#[command(name = "umbra-replay")]
#[command(about = "Replay a recorded runtime notification trace through the shadow runtime")]
struct Args {
	/// JSON-lines notification trace
	#[arg(short, long, value_name = "PATH")]
	trace: PathBuf,

	/// TOML runtime configuration
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Stop at the first malformed line instead of skipping it
	#[arg(long)]
	strict: bool,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
		.with_writer(std::io::stderr)
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let config = match &args.config {
		Some(path) => RuntimeConfig::load(path)?,
		None => RuntimeConfig::default(),
	};
	info!(trace = %args.trace.display(), "replay.start");

	let hub = Arc::new(RuntimeEventsHub::new());
	let registry = SessionRegistry::from_config(&config, Arc::clone(&hub), Arc::new(NullCommandSink));

	let started = Instant::now();
	let mut dispatched = 0u64;
	let mut rejected = 0u64;
	let mut malformed = 0u64;
	for notification in TraceReader::open(&args.trace)? {
		let notification = match notification {
			Ok(notification) => notification,
			Err(err) if !args.strict => {
				tracing::warn!(error = %err, "replay.malformed");
				malformed += 1;
				continue;
			}
			Err(err) => return Err(err.into()),
		};
		let heartbeat = matches!(notification.payload, NotificationPayload::Heartbeat);
		match registry.dispatch(notification) {
			Ok(()) => dispatched += 1,
			Err(err) => {
				tracing::debug!(error = %err, "replay.rejected");
				rejected += 1;
			}
		}
		if heartbeat {
			for process in registry.check_watchdogs(Instant::now()) {
				tracing::warn!(pid = %process, "replay.session.crashed");
			}
		}
	}

	let open = registry.len();
	registry.shutdown();
	info!(dispatched, rejected, malformed, open, elapsed_ms = started.elapsed().as_millis() as u64, "replay.done");

	println!("events:");
	for (kind, count) in hub.raised_counts() {
		println!("  {:<32} {count}", kind.as_str());
	}
	let reports = registry.reports().reports();
	println!("reports: {}", reports.len());
	for report in &reports {
		println!("  {report}");
	}
	Ok(())
}
