//! External collaborator traits (§1 "deliberately OUT of scope" /
//! §5 "event loop and async wakeup").
//!
//! This core consumes these from its embedder rather than owning them:
//! a register-layout description, a thread/inferior registry, an event
//! loop with an async wakeup primitive, and a symbol resolver. Defining
//! them as traits here (rather than depending on a concrete
//! implementation) keeps the core usable against whatever debugger
//! front-end embeds it, the same separation the source draws between
//! `remote.c` and `gdbarch`/`inferior`/`event-loop.c`.

use crate::ptid::Ptid;
use crate::regs::RegisterSpec;

/// Supplies the register layout for the inferior's current
/// architecture. An embedder typically backs this with a `gdbarch`-like
/// per-architecture table; this core only needs the flat list of
/// `(name, size, remote_number)` triples to build a [`crate::regs::RegisterTable`].
pub trait RegisterLayout {
    fn registers(&self) -> Vec<RegisterSpec>;
}

/// The thread/inferior registry (§3 "Thread record", "Inferior
/// record"). The core holds back-references (ptids) into this registry
/// rather than owning thread state itself.
pub trait ThreadRegistry {
    /// Every thread currently known, in registry insertion order (§5:
    /// "Resume coalescing is deterministic ... among threads in
    /// insertion order of the thread registry").
    fn threads(&self) -> Vec<Ptid>;

    /// Whether `pid` is a process this registry knows about.
    fn has_process(&self, pid: u32) -> bool;
}

/// A minimal external event-loop/async-wakeup primitive (§5): the core
/// registers its transport for readability notifications and never
/// spawns threads or blocks an executor itself.
pub trait EventSource {
    /// Register `token` to be notified when the transport has bytes
    /// available to read.
    fn notify_readable(&mut self, token: usize);

    /// Deregister a previously registered token, e.g. on disconnect.
    fn cancel(&mut self, token: usize);
}

/// Resolves a symbol name to an address for `qSymbol` exchanges (§1:
/// "a symbol resolver" collaborator). Returns `None` if the symbol is
/// unknown to the embedder, matching `qSymbol`'s "I don't know this
/// one" reply form.
pub trait SymbolResolver {
    fn resolve(&self, name: &[u8]) -> Option<u64>;
}

#[cfg(test)]
mod test {
    use super::*;

    struct FixedLayout;
    impl RegisterLayout for FixedLayout {
        fn registers(&self) -> Vec<RegisterSpec> {
            vec![RegisterSpec { name: "pc", size: 8, remote_number: 0 }]
        }
    }

    #[test]
    fn register_layout_trait_is_object_safe_enough_for_a_fixed_impl() {
        let layout = FixedLayout;
        assert_eq!(layout.registers().len(), 1);
    }
}
