//! The stop-reply data model (§3 "Stop reply", §9 "tagged waitstatus").
//!
//! A single sum type with per-variant payloads, replacing the base
//! class + virtual-method `target_waitstatus` the source uses.

use crate::ptid::Ptid;

/// Why a thread stopped, independent of the signal/exit-code payload
/// (§3 stop-reason).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No particular reason was reported.
    None,
    /// A software breakpoint (`swbreak:`).
    SoftwareBreakpoint,
    /// A hardware breakpoint (`hwbreak:`).
    HardwareBreakpoint,
    /// A watchpoint of some kind (`watch:`/`rwatch:`/`awatch:`).
    Watchpoint,
    /// A syscall entry/return (`syscall_entry:`/`syscall_return:`).
    Syscall,
}

/// One `(regnum, bytes)` pair expedited in a stop reply to save a round
/// trip (§3, glossary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpeditedRegister {
    /// The RSP-numbered register.
    pub regnum: u64,
    /// Its raw bytes, in target byte order.
    pub bytes: Vec<u8>,
}

/// The tagged sum of every event a stop reply can report (§3 "Stop
/// reply", §9 "Tagged waitstatus replaces inheritance").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStatus {
    /// Stopped by a signal (`T`/`S` reply).
    Stopped(u8),
    /// Exited normally (`W` reply).
    Exited(u8),
    /// Killed by a signal (`X` reply).
    Signalled(u8),
    /// `fork:` field: a new child process was created.
    Forked(Ptid),
    /// `vfork:` field: a new child process was created via vfork.
    VForked(Ptid),
    /// `exec:` field: the inferior called `exec`.
    Execd(Vec<u8>),
    /// `clone:` field: a new thread was created.
    Cloned(Ptid),
    /// `QThreadEvents`-reported thread creation.
    ThreadCreated,
    /// `QThreadEvents`-reported thread exit, with exit code.
    ThreadExited(u32),
    /// `library:` field: the shared-library list changed.
    LibraryLoaded,
    /// `replaylog:` field reporting the replay log boundary was hit.
    NoHistory,
    /// `syscall_entry:` field.
    SyscallEntry(u64),
    /// `syscall_return:` field.
    SyscallReturn(u64),
    /// `no-resumed` notification: the stub has no resumed threads left.
    NoResumed,
    /// Discarded per §4.6: "dropped but still acked".
    Ignore,
}

/// A parsed, queueable stop-reply event (§3 "Stop reply" lifecycle:
/// "parsed from a 'T'/'S'/'W'/'X'/'N'/'w' reply, enqueued, consumed
/// exactly once by a wait call").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReply {
    /// The thread this event is reported for. `None` when the reply
    /// carried no `thread:` field and disambiguation (§4.6) has not yet
    /// been applied.
    pub ptid: Option<Ptid>,
    /// What happened.
    pub status: WaitStatus,
    /// Why, if the status is `Stopped` and a reason field was present.
    pub reason: StopReason,
    /// Registers expedited in the reply.
    pub expedited_registers: Vec<ExpeditedRegister>,
    /// `core:` field, if present.
    pub core: Option<u64>,
    /// The watchpoint address, for `Watchpoint` stops.
    pub watch_address: Option<u64>,
}

impl StopReply {
    /// A minimal stop reply carrying only a signal and thread, as used
    /// when a `ResumedPendingVcont` thread's zero-signal stop is
    /// synthesised locally instead of sent over the wire (§4.5).
    pub fn synthesised_stop(ptid: Ptid, signal: u8) -> StopReply {
        StopReply {
            ptid: Some(ptid),
            status: WaitStatus::Stopped(signal),
            reason: StopReason::None,
            expedited_registers: Vec::new(),
            core: None,
            watch_address: None,
        }
    }

    /// True if this event should never be delivered to a `wait()` caller
    /// (§4.6: "dropped but still acked").
    pub fn is_ignored(&self) -> bool {
        matches!(self.status, WaitStatus::Ignore)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn synthesised_stop_carries_signal_and_ptid() {
        let ptid = Ptid::new(1, Some(1));
        let reply = StopReply::synthesised_stop(ptid, 0);
        assert_eq!(reply.ptid, Some(ptid));
        assert_eq!(reply.status, WaitStatus::Stopped(0));
        assert!(!reply.is_ignored());
    }

    #[test]
    fn ignore_status_is_ignored() {
        let reply = StopReply {
            ptid: None,
            status: WaitStatus::Ignore,
            reason: StopReason::None,
            expedited_registers: Vec::new(),
            core: None,
            watch_address: None,
        };
        assert!(reply.is_ignored());
    }
}
