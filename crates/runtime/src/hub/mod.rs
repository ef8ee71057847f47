//! Runtime events hub: typed multicast dispatch to subscribed handlers.

mod event;


use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
use umbra_primitives::RawEventInfo;
use umbra_worker::GenerationClock;

pub use self::event::{RuntimeEvent, RuntimeEventKind};
use crate::reporting::Report;
use crate::runtime::ShadowRuntime;
use crate::thread::ShadowThread;

/// Context handed to every handler alongside the event.
#[derive(Clone, Copy)]
pub struct EventArgs<'a> {
	pub runtime: &'a ShadowRuntime,
	/// Shadow thread whose worker raised the event.
	pub thread: &'a ShadowThread,
	pub info: &'a RawEventInfo,
}

pub type EventHandler = Arc<dyn Fn(&EventArgs<'_>, &RuntimeEvent) + Send + Sync>;

/// Token returned by subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct Subscription {
	id: HandlerId,
	filter: Option<RuntimeEventKind>,
	handler: EventHandler,
}

#[derive(Clone, Default)]
struct HandlersSnapshot {
	subscriptions: Vec<Subscription>,
	by_kind: HashMap<RuntimeEventKind, Vec<EventHandler>>,
}

impl HandlersSnapshot {
	fn rebuild(subscriptions: Vec<Subscription>) -> Self {
		let mut by_kind: HashMap<RuntimeEventKind, Vec<EventHandler>> = HashMap::default();
		for subscription in &subscriptions {
			match subscription.filter {
				Some(kind) => by_kind.entry(kind).or_default().push(Arc::clone(&subscription.handler)),
				None => {
					for kind in RuntimeEventKind::ALL {
						by_kind.entry(*kind).or_default().push(Arc::clone(&subscription.handler));
					}
				}
			}
		}
		Self { subscriptions, by_kind }
	}

	#[inline]
	fn for_kind(&self, kind: RuntimeEventKind) -> &[EventHandler] {
		self.by_kind.get(&kind).map_or(&[], Vec::as_slice)
	}
}

/// Multicast point for [`RuntimeEvent`]s.
///
/// Handlers run synchronously on the raising shadow-thread worker, in
/// subscription order, and must not block on other workers. Subscribing
/// swaps in a new snapshot; raising never takes a lock.
///
/// A panicking handler is reported as a `"plugin"` error and skipped; the
/// remaining handlers still see the event and the raise returns normally.
pub struct RuntimeEventsHub {
	snap: ArcSwap<HandlersSnapshot>,
	write: Mutex<()>,
	ids: GenerationClock,
	raised: Box<[AtomicU64]>,
}

impl Default for RuntimeEventsHub {
	fn default() -> Self {
		Self::new()
	}
}

impl RuntimeEventsHub {
	pub fn new() -> Self {
		Self {
			snap: ArcSwap::from_pointee(HandlersSnapshot::default()),
			write: Mutex::new(()),
			ids: GenerationClock::new(),
			raised: RuntimeEventKind::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
		}
	}

	/// Subscribes `handler` to one event kind.
	pub fn subscribe(&self, kind: RuntimeEventKind, handler: impl Fn(&EventArgs<'_>, &RuntimeEvent) + Send + Sync + 'static) -> HandlerId {
		self.insert(Some(kind), Arc::new(handler))
	}

	/// Subscribes `handler` to every event kind.
	pub fn subscribe_all(&self, handler: impl Fn(&EventArgs<'_>, &RuntimeEvent) + Send + Sync + 'static) -> HandlerId {
		self.insert(None, Arc::new(handler))
	}

	/// Removes a subscription. Returns `false` if `id` is unknown.
	pub fn unsubscribe(&self, id: HandlerId) -> bool {
		let _write = self.write.lock();
		let current = self.snap.load();
		let subscriptions: Vec<_> = current.subscriptions.iter().filter(|sub| sub.id != id).cloned().collect();
		if subscriptions.len() == current.subscriptions.len() {
			return false;
		}
		self.snap.store(Arc::new(HandlersSnapshot::rebuild(subscriptions)));
		tracing::debug!(handler = id.0, "hub.unsubscribe");
		true
	}

	fn insert(&self, filter: Option<RuntimeEventKind>, handler: EventHandler) -> HandlerId {
		let id = HandlerId(self.ids.next());
		let _write = self.write.lock();
		let mut subscriptions = self.snap.load().subscriptions.clone();
		subscriptions.push(Subscription { id, filter, handler });
		self.snap.store(Arc::new(HandlersSnapshot::rebuild(subscriptions)));
		tracing::debug!(handler = id.0, kind = filter.map_or("*", RuntimeEventKind::as_str), "hub.subscribe");
		id
	}

	/// Invokes every handler subscribed to the event's kind.
	pub fn raise(&self, args: &EventArgs<'_>, event: RuntimeEvent) {
		let kind = event.kind();
		self.raised[kind as usize].fetch_add(1, Ordering::Relaxed);
		tracing::trace!(kind = kind.as_str(), notification = %args.info.id, vid = %args.thread.id(), "hub.raise");
		let snap = self.snap.load();
		for handler in snap.for_kind(kind) {
			if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(args, &event))) {
				let reason = umbra_worker::panic_message(payload.as_ref());
				tracing::error!(kind = kind.as_str(), notification = %args.info.id, vid = %args.thread.id(), reason = %reason, "hub.handler.panicked");
				let mut report = Report::error("plugin", format!("{} handler for {} panicked: {reason}", kind.as_str(), args.info.id)).with_event(args.info);
				report.process = Some(args.runtime.process_id());
				args.runtime.reports().report(report);
			}
		}
	}

	/// How many times `kind` was raised.
	pub fn raised(&self, kind: RuntimeEventKind) -> u64 {
		self.raised[kind as usize].load(Ordering::Relaxed)
	}

	pub fn raised_total(&self) -> u64 {
		self.raised.iter().map(|count| count.load(Ordering::Relaxed)).sum()
	}

	/// Non-zero raise counters in kind order.
	pub fn raised_counts(&self) -> Vec<(RuntimeEventKind, u64)> {
		RuntimeEventKind::ALL
			.iter()
			.map(|kind| (*kind, self.raised(*kind)))
			.filter(|(_, count)| *count > 0)
			.collect()
	}

	pub fn handler_count(&self) -> usize {
		self.snap.load().subscriptions.len()
	}
}

impl fmt::Debug for RuntimeEventsHub {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RuntimeEventsHub")
			.field("handlers", &self.handler_count())
			.field("raised", &self.raised_total())
			.finish()
	}
}
