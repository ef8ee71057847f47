//! Suspend and resume barriers.
//!
//! A barrier is armed on the delivery thread when the runtime announces a
//! suspend or resume, and completes once its initiator and every thread of
//! its cohort have arrived on their own workers. Barriers complete strictly
//! in arming order; only the front barrier ever transitions the runtime.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet as HashSet;
use umbra_primitives::SuspendReason;

use crate::epoch::EpochSource;
use crate::runtime::{RuntimeState, ShadowRuntime};
use crate::thread::ShadowThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BarrierKind {
	Suspend { target: u64, reason: SuspendReason },
	Resume,
}

impl BarrierKind {
	fn as_str(self) -> &'static str {
		match self {
			Self::Suspend { .. } => "suspend",
			Self::Resume => "resume",
		}
	}
}

#[derive(Debug)]
struct Barrier {
	id: u64,
	kind: BarrierKind,
	initiator: ShadowThreadId,
	initiator_arrived: bool,
	remaining: HashSet<ShadowThreadId>,
	started: bool,
	armed_at: Instant,
	warned: bool,
}

/// A barrier that finished during a [`BarrierCoordinator`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
	Suspended { reason: SuspendReason, epoch: u64 },
	Resumed,
}

/// A barrier pending longer than the stall threshold, reported once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StalledBarrier {
	pub id: u64,
	pub kind: &'static str,
	pub waited: Duration,
	pub remaining: Vec<ShadowThreadId>,
}

#[derive(Debug, Default)]
pub(crate) struct BarrierCoordinator {
	next_id: u64,
	last_target: u64,
	last_suspend_cohort: Vec<ShadowThreadId>,
	pending: VecDeque<Barrier>,
}

impl BarrierCoordinator {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Arms a suspend barrier over `cohort`. Returns the barrier id and the epoch it will publish.
	pub(crate) fn arm_suspend(&mut self, initiator: ShadowThreadId, reason: SuspendReason, cohort: Vec<ShadowThreadId>, now: Instant) -> (u64, u64) {
		self.last_target += 1;
		let target = self.last_target;
		self.last_suspend_cohort = cohort.clone();
		let id = self.push(BarrierKind::Suspend { target, reason }, initiator, cohort, now);
		(id, target)
	}

	/// Arms a resume barrier over the live members of the last suspend cohort.
	pub(crate) fn arm_resume(&mut self, initiator: ShadowThreadId, live: &[ShadowThreadId], now: Instant) -> u64 {
		let mut cohort: Vec<_> = self.last_suspend_cohort.iter().copied().filter(|id| live.contains(id)).collect();
		if !cohort.contains(&initiator) {
			cohort.push(initiator);
		}
		self.push(BarrierKind::Resume, initiator, cohort, now)
	}

	fn push(&mut self, kind: BarrierKind, initiator: ShadowThreadId, cohort: Vec<ShadowThreadId>, now: Instant) -> u64 {
		self.next_id += 1;
		let id = self.next_id;
		let mut remaining: HashSet<_> = cohort.into_iter().collect();
		remaining.insert(initiator);
		tracing::debug!(barrier = id, kind = kind.as_str(), initiator = %initiator, cohort = remaining.len(), "barrier.armed");
		self.pending.push_back(Barrier {
			id,
			kind,
			initiator,
			initiator_arrived: false,
			remaining,
			started: false,
			armed_at: now,
			warned: false,
		});
		id
	}

	/// The initiator's own start job ran.
	pub(crate) fn initiator_arrived(&mut self, id: u64) -> bool {
		let Some(barrier) = self.pending.iter_mut().find(|barrier| barrier.id == id) else {
			return false;
		};
		barrier.initiator_arrived = true;
		barrier.remaining.remove(&barrier.initiator);
		true
	}

	/// A cohort member reported suspension. Returns the epoch it must enter.
	pub(crate) fn thread_suspended(&mut self, thread: ShadowThreadId) -> Option<u64> {
		let barrier = self
			.pending
			.iter_mut()
			.find(|barrier| matches!(barrier.kind, BarrierKind::Suspend { .. }) && barrier.remaining.contains(&thread))?;
		barrier.remaining.remove(&thread);
		match barrier.kind {
			BarrierKind::Suspend { target, .. } => Some(target),
			BarrierKind::Resume => None,
		}
	}

	/// A cohort member reported resumption.
	pub(crate) fn thread_resumed(&mut self, thread: ShadowThreadId) -> bool {
		let Some(barrier) = self
			.pending
			.iter_mut()
			.find(|barrier| barrier.kind == BarrierKind::Resume && barrier.remaining.contains(&thread))
		else {
			return false;
		};
		barrier.remaining.remove(&thread);
		true
	}

	/// Drops a destroyed thread from every pending cohort.
	pub(crate) fn forget(&mut self, thread: ShadowThreadId) {
		self.last_suspend_cohort.retain(|id| *id != thread);
		for barrier in &mut self.pending {
			barrier.remaining.remove(&thread);
			if barrier.initiator == thread {
				barrier.initiator_arrived = true;
			}
		}
	}

	/// Advances the front barrier as far as arrivals allow.
	pub(crate) fn pump(&mut self, runtime: &ShadowRuntime, epoch: &EpochSource) -> Vec<Completion> {
		let mut completions = Vec::new();
		while let Some(front) = self.pending.front_mut() {
			if !front.initiator_arrived {
				break;
			}
			if !front.started {
				front.started = true;
				let to = match front.kind {
					BarrierKind::Suspend { .. } => RuntimeState::Suspending,
					BarrierKind::Resume => RuntimeState::Resuming,
				};
				transition(runtime, to);
			}
			if !front.remaining.is_empty() {
				break;
			}
			let Some(barrier) = self.pending.pop_front() else {
				break;
			};
			match barrier.kind {
				BarrierKind::Suspend { target, reason } => {
					transition(runtime, RuntimeState::Suspended);
					if let Err(err) = epoch.advance_to(target) {
						tracing::debug!(barrier = barrier.id, error = %err, "barrier.epoch.closed");
					}
					tracing::debug!(barrier = barrier.id, epoch = target, "barrier.suspend.finished");
					completions.push(Completion::Suspended { reason, epoch: target });
				}
				BarrierKind::Resume => {
					transition(runtime, RuntimeState::Executing);
					tracing::debug!(barrier = barrier.id, "barrier.resume.finished");
					completions.push(Completion::Resumed);
				}
			}
		}
		completions
	}

	/// Barriers pending for at least `threshold` that were not reported yet.
	pub(crate) fn stalled(&mut self, now: Instant, threshold: Duration) -> Vec<StalledBarrier> {
		let mut stalled = Vec::new();
		for barrier in &mut self.pending {
			let waited = now.saturating_duration_since(barrier.armed_at);
			if barrier.warned || waited < threshold {
				continue;
			}
			barrier.warned = true;
			let mut remaining: Vec<_> = barrier.remaining.iter().copied().collect();
			if !barrier.initiator_arrived && !remaining.contains(&barrier.initiator) {
				remaining.push(barrier.initiator);
			}
			remaining.sort_unstable();
			stalled.push(StalledBarrier {
				id: barrier.id,
				kind: barrier.kind.as_str(),
				waited,
				remaining,
			});
		}
		stalled
	}

	pub(crate) fn pending(&self) -> usize {
		self.pending.len()
	}
}

fn transition(runtime: &ShadowRuntime, to: RuntimeState) {
	if runtime.state() == RuntimeState::Terminated {
		return;
	}
	if let Err(err) = runtime.transition(to) {
		tracing::warn!(pid = %runtime.process_id(), error = %err, "barrier.transition.rejected");
	}
}
