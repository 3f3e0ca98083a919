//! Ctrl-C / interrupt handling (§4.5, §9 "Ctrl-C handling").
//!
//! Grounded on §9's redesign note: a single state enum replaces the
//! source's pair of booleans (`ctrlc_pending_p`, `got_ctrlc_during_io`).

use crate::config::InterruptSequence;
use crate::ptid::Ptid;

/// The interrupt state machine (§9): `None` -> `Pending` on the first
/// Ctrl-C, `Pending` -> `Sent` once the interrupt sequence has actually
/// been written to the transport, and `Sent` -> `Escalate` if a second
/// Ctrl-C arrives before the stop it requested has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptState {
    #[default]
    None,
    Pending,
    Sent,
    Escalate,
}

impl InterruptState {
    /// Record a user-initiated Ctrl-C. Returns the new state; the
    /// caller escalates to an interactive disconnect prompt when this
    /// returns `Escalate` (§4.1, §5 "Cancellation and timeouts").
    pub fn on_ctrlc(self) -> InterruptState {
        match self {
            InterruptState::None => InterruptState::Pending,
            InterruptState::Pending | InterruptState::Sent => InterruptState::Escalate,
            InterruptState::Escalate => InterruptState::Escalate,
        }
    }

    /// Record that the interrupt sequence has been written to the wire.
    pub fn on_sent(self) -> InterruptState {
        match self {
            InterruptState::Pending => InterruptState::Sent,
            other => other,
        }
    }

    /// Record that the stop this interrupt requested has been
    /// observed, resetting the state machine for the next interrupt.
    pub fn on_stop_observed(self) -> InterruptState {
        InterruptState::None
    }

    pub fn is_escalated(self) -> bool {
        matches!(self, InterruptState::Escalate)
    }
}

/// The raw bytes to write to the transport for an all-stop interrupt
/// (§4.5, §6). Not a packet: written via `Framer::write_raw`.
pub fn all_stop_interrupt_bytes(sequence: InterruptSequence) -> Vec<u8> {
    match sequence {
        InterruptSequence::Etx => vec![0x03],
        InterruptSequence::Break => vec![],
        InterruptSequence::BreakG => vec![b'g'],
    }
}

/// True if `sequence` requires a transport-level BREAK condition in
/// addition to (or instead of) ordinary bytes, which the transport must
/// support out-of-band (not expressible as a byte to write).
pub fn requires_transport_break(sequence: InterruptSequence) -> bool {
    matches!(sequence, InterruptSequence::Break | InterruptSequence::BreakG)
}

/// Build the non-stop interrupt request (§4.5): `vCtrlC`, replied to
/// with `OK`, with the actual stop delivered later as an async event.
pub fn build_vctrlc() -> Vec<u8> {
    b"vCtrlC".to_vec()
}

/// One thread in scope for a non-stop "stop for a scope" request,
/// carrying whatever signal-commit decision §4.5 requires before the
/// scope can be quiesced.
#[derive(Debug, Clone, Copy)]
pub struct ScopedThread {
    pub ptid: Ptid,
    /// A signal already queued for this thread via `ResumedPendingVcont`
    /// that must not be lost by being silently dropped (§4.5).
    pub pending_signal: Option<u8>,
}

/// The plan computed for a non-stop "stop for a scope" (§4.5): threads
/// whose pending signal must be committed first (so it isn't lost),
/// threads whose zero-signal stop can be synthesised locally without
/// wire traffic, and the final `vCont;t` scope request.
#[derive(Debug, Clone, Default)]
pub struct StopScopePlan {
    /// Threads needing a real commit (non-zero pending signal) before
    /// the stop request, in scope order.
    pub commit_first: Vec<Ptid>,
    /// Threads whose stop can be synthesised locally (§3 "Stop reply",
    /// `StopReply::synthesised_stop`) with no wire traffic.
    pub synthesise_locally: Vec<Ptid>,
}

/// Plan a non-stop stop for `scope` given the threads currently in it
/// (§4.5): signal-bearing pending resumes are committed first so the
/// signal reaches the inferior; zero-signal pending resumes are
/// synthesised locally instead of round-tripping.
pub fn plan_stop_scope(threads: &[ScopedThread]) -> StopScopePlan {
    let mut plan = StopScopePlan::default();
    for t in threads {
        match t.pending_signal {
            Some(sig) if sig != 0 => plan.commit_first.push(t.ptid),
            Some(_) => plan.synthesise_locally.push(t.ptid),
            None => {}
        }
    }
    plan
}

/// Build the final `vCont;t[:scope]` request that actually quiesces a
/// scope, after any signal-bearing threads have been committed.
pub fn build_vcont_stop(scope: Option<Ptid>) -> Vec<u8> {
    match scope {
        Some(ptid) => format!("vCont;t:{ptid}").into_bytes(),
        None => b"vCont;t".to_vec(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_ctrlc_before_observed_stop_escalates() {
        let mut state = InterruptState::default();
        state = state.on_ctrlc();
        state = state.on_sent();
        assert_eq!(state, InterruptState::Sent);
        state = state.on_ctrlc();
        assert!(state.is_escalated());
    }

    #[test]
    fn observed_stop_resets_state() {
        let state = InterruptState::Pending.on_sent().on_stop_observed();
        assert_eq!(state, InterruptState::None);
    }

    #[test]
    fn stop_scope_commits_nonzero_signals_and_synthesises_zero() {
        let threads = [
            ScopedThread { ptid: Ptid::new(1, Some(1)), pending_signal: Some(5) },
            ScopedThread { ptid: Ptid::new(1, Some(2)), pending_signal: Some(0) },
            ScopedThread { ptid: Ptid::new(1, Some(3)), pending_signal: None },
        ];
        let plan = plan_stop_scope(&threads);
        assert_eq!(plan.commit_first, vec![Ptid::new(1, Some(1))]);
        assert_eq!(plan.synthesise_locally, vec![Ptid::new(1, Some(2))]);
    }

    #[test]
    fn vcont_stop_formats_with_and_without_scope() {
        assert_eq!(build_vcont_stop(None), b"vCont;t");
        assert_eq!(build_vcont_stop(Some(Ptid::process_wildcard(1))), b"vCont;t:p1.-1");
    }
}
