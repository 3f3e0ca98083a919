//! The execution controller: resume state, vCont coalescing, and the
//! all-stop/non-stop/reverse dispatch of §4.4.
//!
//! Grounded on §9's redesign note: a three-state enum replaces the
//! source's pair of booleans spread across `thread_info` and
//! `remote_thread_info`, generalized here into the real
//! narrowest-to-widest vCont coalescing algorithm.

use std::collections::BTreeMap;

use crate::ptid::Ptid;

/// What a pending or in-flight resume action asks a thread to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeKind {
    Step,
    Continue,
    /// `vCont;r<start>,<end>:tid` (§4.4); only ever used in all-stop or
    /// non-stop forward execution, never under reverse execution.
    RangeStep { start: u64, end: u64 },
}

/// A thread's resume request, recorded but not yet sent (non-stop) or
/// about to be sent immediately (all-stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingResume {
    pub kind: ResumeKind,
    pub signal: u8,
}

impl PendingResume {
    /// An action is "trivial" when it is a plain continue with no
    /// signal to deliver -- the only kind of action a process-wide or
    /// global wildcard can stand in for (§4.4 rule 1).
    fn is_trivial(&self) -> bool {
        matches!(self.kind, ResumeKind::Continue) && self.signal == 0
    }
}

/// Per-thread resume state (§3 "Thread record", §9 "Resume state
/// machine"): the three-state replacement for the source's scattered
/// `resumed`/`pending_vcont` booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeState {
    NotResumed,
    ResumedPendingVcont(PendingResume),
    Resumed,
}

/// The view of one thread the coalescing algorithm needs. The thread
/// registry itself is an external collaborator (§1); this is the
/// minimal slice of it resume coalescing reads.
#[derive(Debug, Clone, Copy)]
pub struct ThreadView {
    pub ptid: Ptid,
    pub state: ResumeState,
    /// True if this thread has a pending fork/vfork/clone child event
    /// awaiting follow-up, which disqualifies its process from being
    /// wildcarded (§4.4 rule 2).
    pub has_pending_child_event: bool,
}

/// The result of one coalescing pass: the `vCont` packet bodies to
/// send, in order, and every ptid that was given a resume action
/// (individually or via a wildcard) and so transitions to `Resumed`
/// once the commit succeeds.
#[derive(Debug, Clone, Default)]
pub struct CoalescedResume {
    pub packets: Vec<Vec<u8>>,
    pub committed: Vec<Ptid>,
}

fn format_action(kind: ResumeKind, signal: u8) -> String {
    match kind {
        ResumeKind::Step if signal == 0 => "s".to_string(),
        ResumeKind::Step => format!("S{signal:02x}"),
        ResumeKind::Continue if signal == 0 => "c".to_string(),
        ResumeKind::Continue => format!("C{signal:02x}"),
        ResumeKind::RangeStep { start, end } => format!("r{start:x},{end:x}"),
    }
}

/// Assemble one or more `vCont` packets coalescing every
/// `ResumedPendingVcont` thread in `threads`, following the
/// narrowest-to-widest rules of §4.4. `max_payload` bounds the raw byte
/// length of each emitted packet body (header + actions); when the next
/// action would overflow it, the current packet is flushed and a new
/// one started (§4.4, §8 "a vCont build that cannot fit all actions
/// must flush and continue").
pub fn coalesce_vcont(threads: &[ThreadView], max_payload: usize) -> CoalescedResume {
    // Group by process to evaluate wildcard eligibility (rule 2): a
    // process is wildcard-eligible iff none of its threads are
    // NotResumed and none carry a pending child event.
    let mut by_process: BTreeMap<u32, Vec<&ThreadView>> = BTreeMap::new();
    for t in threads {
        if let Some(pid) = t.ptid.process_id() {
            by_process.entry(pid).or_default().push(t);
        }
    }
    let wildcard_eligible: BTreeMap<u32, bool> = by_process
        .iter()
        .map(|(&pid, members)| {
            let eligible = members
                .iter()
                .all(|t| !matches!(t.state, ResumeState::NotResumed) && !t.has_pending_child_event);
            (pid, eligible)
        })
        .collect();

    let mut individual: Vec<(Ptid, ResumeKind, u8)> = Vec::new();
    let mut wildcard_pids: Vec<u32> = Vec::new();
    let mut committed = Vec::new();

    for t in threads {
        let ResumeState::ResumedPendingVcont(pending) = t.state else { continue };
        committed.push(t.ptid);
        let pid_eligible = t.ptid.process_id().map(|p| wildcard_eligible[&p]).unwrap_or(false);
        if !pending.is_trivial() || !pid_eligible {
            individual.push((t.ptid, pending.kind, pending.signal));
        } else if let Some(pid) = t.ptid.process_id() {
            if !wildcard_pids.contains(&pid) {
                wildcard_pids.push(pid);
            }
        }
    }

    // Rule 3: a single global wildcard replaces all per-process
    // wildcards iff every process present is wildcard-eligible and no
    // thread needed an individual action.
    let all_eligible = wildcard_eligible.values().all(|&e| e);
    let mut actions: Vec<String> = individual
        .iter()
        .map(|(ptid, kind, sig)| format!("{}:{ptid}", format_action(*kind, *sig)))
        .collect();

    if individual.is_empty() && all_eligible && !wildcard_pids.is_empty() {
        actions.push(format_action(ResumeKind::Continue, 0));
    } else {
        for pid in &wildcard_pids {
            actions.push(format!("{}:{}", format_action(ResumeKind::Continue, 0), Ptid::process_wildcard(*pid)));
        }
    }

    let packets = pack_actions(&actions, max_payload);
    CoalescedResume { packets, committed }
}

/// Pack a list of already-formatted vCont action strings into one or
/// more `vCont;action;action...` packets, flushing before any action
/// that would overflow `max_payload`.
fn pack_actions(actions: &[String], max_payload: usize) -> Vec<Vec<u8>> {
    if actions.is_empty() {
        return Vec::new();
    }
    let mut packets = Vec::new();
    let mut current = String::from("vCont");
    for action in actions {
        let grown = current.len() + 1 + action.len();
        if grown > max_payload && current != "vCont" {
            packets.push(std::mem::replace(&mut current, String::from("vCont")).into_bytes());
        }
        current.push(';');
        current.push_str(action);
    }
    packets.push(current.into_bytes());
    packets
}

/// Build the legacy `Hc<ptid>` thread-selector preamble used ahead of a
/// bare `c`/`s`/`C`/`S` request when `vCont` is unsupported (§4.4).
pub fn build_hc_select(ptid: Ptid) -> Vec<u8> {
    format!("Hc{ptid}").into_bytes()
}

/// Build the legacy (non-vCont) resume packet for an all-stop resume
/// when the stub has no `vCont` support. Range stepping has no legacy
/// form; callers must not request one here.
pub fn build_legacy_resume(kind: ResumeKind, signal: u8) -> Vec<u8> {
    match kind {
        ResumeKind::Step if signal == 0 => b"s".to_vec(),
        ResumeKind::Step => format!("S{signal:02x}").into_bytes(),
        ResumeKind::Continue if signal == 0 => b"c".to_vec(),
        ResumeKind::Continue => format!("C{signal:02x}").into_bytes(),
        ResumeKind::RangeStep { .. } => {
            log::warn!("range stepping has no legacy resume form; falling back to continue");
            b"c".to_vec()
        }
    }
}

/// Build a reverse-execution resume packet (`bs`/`bc`). Reverse
/// execution disables vCont entirely; range steps and non-zero signals
/// are dropped with a warning rather than sent (§4.4).
pub fn build_reverse_resume(step: bool, requested_signal: u8) -> Vec<u8> {
    if requested_signal != 0 {
        log::warn!("dropping signal {requested_signal} on reverse-execution resume; unsupported on the wire");
    }
    if step {
        b"bs".to_vec()
    } else {
        b"bc".to_vec()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn trivial(ptid: Ptid) -> ThreadView {
        ThreadView {
            ptid,
            state: ResumeState::ResumedPendingVcont(PendingResume { kind: ResumeKind::Continue, signal: 0 }),
            has_pending_child_event: false,
        }
    }

    #[test]
    fn scenario_3_non_stop_coalescing() {
        // t1.1 steps, t1.2 continues trivially -> "vCont;s:p1.1;c:p1.-1".
        let t1_1 = ThreadView {
            ptid: Ptid::new(1, Some(1)),
            state: ResumeState::ResumedPendingVcont(PendingResume { kind: ResumeKind::Step, signal: 0 }),
            has_pending_child_event: false,
        };
        let t1_2 = trivial(Ptid::new(1, Some(2)));
        let result = coalesce_vcont(&[t1_1, t1_2], 400);
        assert_eq!(result.packets, vec![b"vCont;s:p1.1;c:p1.-1".to_vec()]);
        assert_eq!(result.committed.len(), 2);
    }

    #[test]
    fn all_eligible_processes_use_global_wildcard() {
        let t1 = trivial(Ptid::new(1, Some(1)));
        let t2 = trivial(Ptid::new(2, Some(1)));
        let result = coalesce_vcont(&[t1, t2], 400);
        assert_eq!(result.packets, vec![b"vCont;c".to_vec()]);
    }

    #[test]
    fn not_resumed_sibling_blocks_process_wildcard() {
        let t1 = trivial(Ptid::new(1, Some(1)));
        let t2 =
            ThreadView { ptid: Ptid::new(1, Some(2)), state: ResumeState::NotResumed, has_pending_child_event: false };
        let result = coalesce_vcont(&[t1, t2], 400);
        // t1 can't be process-wildcarded (sibling t1.2 is NotResumed), so
        // it gets an explicit action; t2 isn't pending-vcont at all.
        assert_eq!(result.packets, vec![b"vCont;c:p1.1".to_vec()]);
        assert_eq!(result.committed, vec![Ptid::new(1, Some(1))]);
    }

    #[test]
    fn pack_actions_flushes_when_budget_exceeded() {
        let actions = vec!["c:p1.1".to_string(), "c:p1.2".to_string()];
        let packets = pack_actions(&actions, 10);
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn legacy_resume_falls_back_on_range_step() {
        assert_eq!(build_legacy_resume(ResumeKind::RangeStep { start: 0, end: 4 }, 0), b"c");
    }
}
