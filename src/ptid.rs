//! Thread identifiers: the `pPID.TID` grammar of §6, and the special
//! `Any`/`All` forms used for wildcards.
//!
//! Generalized to the full wildcard semantics the execution controller
//! needs (§4.4): any process/any thread, all threads of a process, and
//! the concrete `pPID.TID` form.

use std::fmt;

/// One component (process or thread) of a [`Ptid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Id {
    /// A concrete process or thread id. Must not be zero.
    Id(u32),
    /// The wildcard form, written `-1` on the wire: "all of them".
    All,
    /// The "don't care" form, written `0` on the wire: "any one".
    Any,
}

impl Id {
    /// True if this is the `-1` wildcard.
    pub fn is_wildcard(self) -> bool {
        matches!(self, Id::All)
    }
}

/// A process/thread identifier pair, as used throughout the RSP wire
/// format (`pPID.TID`) and the execution controller's resume logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ptid {
    /// The process id component.
    pub pid: Id,
    /// The thread id component.
    pub tid: Id,
}

impl Ptid {
    /// Construct a ptid from plain process/thread numbers. `tid` of `None`
    /// means "any thread of this process".
    pub fn new(pid: u32, tid: Option<u32>) -> Ptid {
        assert!(pid > 0, "process id must be nonzero");
        Ptid {
            pid: Id::Id(pid),
            tid: match tid {
                Some(t) => {
                    assert!(t > 0, "thread id must be nonzero");
                    Id::Id(t)
                }
                None => Id::Any,
            },
        }
    }

    /// The wildcard ptid meaning "all processes, all threads".
    pub const ALL: Ptid = Ptid { pid: Id::All, tid: Id::All };

    /// A ptid meaning "all threads of process `pid`" (`pPID.-1`), used by
    /// per-process wildcard vCont actions (§4.4 rule 4).
    pub fn process_wildcard(pid: u32) -> Ptid {
        Ptid { pid: Id::Id(pid), tid: Id::All }
    }

    /// True if this ptid has a concrete, non-wildcard process id.
    pub fn process_id(self) -> Option<u32> {
        match self.pid {
            Id::Id(v) => Some(v),
            _ => None,
        }
    }

    /// True if `tid` is the `-1` (all-threads) wildcard.
    pub fn is_process_wildcard(self) -> bool {
        self.tid.is_wildcard()
    }
}

impl fmt::Display for Ptid {
    /// Render in the `pPID.TID` wire form (§6). The non-multiprocess bare
    /// `TID` form is never emitted by this core; a multiprocess-capable
    /// stub is assumed once a `Ptid` exists at all.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p")?;
        match self.pid {
            Id::Id(v) => write!(f, "{v:x}")?,
            Id::All => write!(f, "-1")?,
            Id::Any => write!(f, "0")?,
        }
        write!(f, ".")?;
        match self.tid {
            Id::Id(v) => write!(f, "{v:x}"),
            Id::All => write!(f, "-1"),
            Id::Any => write!(f, "0"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn displays_wire_form() {
        assert_eq!(Ptid::new(1, Some(2)).to_string(), "p1.2");
        assert_eq!(Ptid::process_wildcard(1).to_string(), "p1.-1");
        assert_eq!(Ptid::ALL.to_string(), "p-1.-1");
    }

    #[test]
    fn process_wildcard_detection() {
        assert!(Ptid::process_wildcard(3).is_process_wildcard());
        assert!(!Ptid::new(3, Some(1)).is_process_wildcard());
    }
}
