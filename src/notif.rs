//! Asynchronous notification handling and the stop-reply queue (§4.6).
//!
//! Grounded on §9's "notification invariant" note: at most one
//! in-flight event per kind, modeled as an `Option` slot rather than a
//! counter, plus a FIFO queue of drained, not-yet-delivered events.

use std::collections::VecDeque;

use crate::ptid::Ptid;
use crate::waitstatus::{StopReply, WaitStatus};

/// The known notification kinds. Only `Stop` exists on the wire today;
/// the type exists so the single-slot invariant is expressed per-kind
/// rather than assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Stop,
}

/// Tracks, for one notification kind, the single in-flight pending
/// event (owed a `vStopped` drain) and the FIFO queue of events already
/// drained and acked but not yet delivered to a `wait()` call.
#[derive(Debug, Default)]
pub struct NotificationState {
    pending: Option<StopReply>,
    queue: VecDeque<StopReply>,
    /// Set once the ambiguous-stop warning (§4.6) has fired, so it only
    /// fires once per connection.
    warned_ambiguous: bool,
}

impl NotificationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a `%Stop` notification is sitting in the single-slot
    /// in-flight position, meaning a `vStopped` drain is owed before any
    /// further command may be sent.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Record a notification observed inline (via the Framer, or as the
    /// very first `%Stop` of a drain sequence) into the in-flight slot.
    ///
    /// Invariant (§9): this must never be called while the slot is
    /// already occupied -- the stub is required to wait for the drain
    /// before sending another one. A violation is logged and the new
    /// event replaces the old one rather than panicking, since a
    /// protocol-violating stub should degrade, not crash the core.
    pub fn record_notification(&mut self, event: StopReply) {
        if self.pending.is_some() {
            log::warn!("stub sent a second Stop notification before the first was drained");
        }
        self.pending = Some(event);
    }

    /// Begin draining: take the in-flight event, if any, so the caller
    /// can send the first `vStopped` and push it onto the queue. A
    /// caller with no pending event has nothing to drain.
    pub fn take_pending(&mut self) -> Option<StopReply> {
        self.pending.take()
    }

    /// Push one event drained via `vStopped` into the FIFO queue,
    /// unless it was marked `Ignore` (§4.6: "dropped but still acked").
    pub fn push_drained(&mut self, event: StopReply) {
        if !event.is_ignored() {
            self.queue.push_back(event);
        }
    }

    /// Dequeue the next event matching `ptid` (or any event, if `ptid`
    /// is `None`), for non-stop `wait()`.
    pub fn take_matching(&mut self, ptid: Option<Ptid>) -> Option<StopReply> {
        let index = match ptid {
            Some(want) => self.queue.iter().position(|e| e.ptid == Some(want)),
            None => {
                if self.queue.is_empty() {
                    None
                } else {
                    Some(0)
                }
            }
        }?;
        self.queue.remove(index)
    }

    /// True if the queue has nothing waiting for delivery.
    pub fn is_queue_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Resolve an ambiguous stop (no `thread:` field) by picking the
    /// first `Resumed` thread, per §4.6, and warn exactly once per
    /// connection. `resumed_ptids` must be in thread-registry insertion
    /// order (§5 "Resume coalescing is deterministic").
    pub fn disambiguate(&mut self, event: &mut StopReply, resumed_ptids: &[Ptid]) {
        if event.ptid.is_some() {
            return;
        }
        let Some(&first) = resumed_ptids.first() else { return };
        event.ptid = Some(first);
        if !self.warned_ambiguous {
            self.warned_ambiguous = true;
            log::warn!(
                "stop reply for {:?} carried no thread: field; attributing it to the first resumed thread {}",
                event.status,
                first
            );
        }
    }
}

/// True if `status` represents a process-wide stop (exit/signal) for
/// which §4.6's "first Resumed thread in any process" disambiguation
/// rule applies, as opposed to a per-thread stop.
pub fn is_process_wide(status: &WaitStatus) -> bool {
    matches!(status, WaitStatus::Exited(_) | WaitStatus::Signalled(_))
}

#[cfg(test)]
mod test {
    use super::*;

    fn stop(ptid: Option<Ptid>) -> StopReply {
        StopReply {
            ptid,
            status: WaitStatus::Stopped(5),
            reason: crate::waitstatus::StopReason::None,
            expedited_registers: Vec::new(),
            core: None,
            watch_address: None,
        }
    }

    #[test]
    fn single_slot_is_enforced_by_take() {
        let mut state = NotificationState::new();
        assert!(!state.has_pending());
        state.record_notification(stop(Some(Ptid::new(1, Some(1)))));
        assert!(state.has_pending());
        let taken = state.take_pending().unwrap();
        assert_eq!(taken.ptid, Some(Ptid::new(1, Some(1))));
        assert!(!state.has_pending());
    }

    #[test]
    fn drained_ignore_events_are_dropped() {
        let mut state = NotificationState::new();
        let mut ignored = stop(None);
        ignored.status = WaitStatus::Ignore;
        state.push_drained(ignored);
        assert!(state.is_queue_empty());
    }

    #[test]
    fn take_matching_returns_requested_ptid_only() {
        let mut state = NotificationState::new();
        state.push_drained(stop(Some(Ptid::new(1, Some(1)))));
        state.push_drained(stop(Some(Ptid::new(1, Some(2)))));
        let got = state.take_matching(Some(Ptid::new(1, Some(2)))).unwrap();
        assert_eq!(got.ptid, Some(Ptid::new(1, Some(2))));
        assert_eq!(state.queue.len(), 1);
    }

    #[test]
    fn disambiguate_attributes_to_first_resumed_thread_once() {
        let mut state = NotificationState::new();
        let mut event = stop(None);
        state.disambiguate(&mut event, &[Ptid::new(1, Some(1)), Ptid::new(1, Some(2))]);
        assert_eq!(event.ptid, Some(Ptid::new(1, Some(1))));
        assert!(state.warned_ambiguous);
    }
}
