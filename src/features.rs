//! The feature registry and `qSupported` negotiation (§4.2).
//!
//! Grounded on §9's redesign note: a single table indexed by a densely
//! numbered packet-kind enum, replacing the source's two parallel global
//! arrays (`remote_protocol_packets` descriptions and per-target
//! configs).

use std::collections::HashMap;

/// A user override for whether a packet may be used at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Override {
    /// Use whatever the stub reports or what probing discovers.
    #[default]
    Auto,
    /// Force the packet on; an empty reply from the stub is then a
    /// protocol error rather than "unsupported" (§4.2, §8).
    On,
    /// Force the packet off; it must never be sent.
    Off,
}

/// What negotiation or probing has discovered about a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discovered {
    /// Not yet negotiated via `qSupported` or probed by first use.
    #[default]
    Unknown,
    /// The stub has confirmed support.
    Enabled,
    /// The stub returned an empty reply (auto-probed) or an explicit `-`
    /// in `qSupported`.
    Disabled,
}

/// Effective support for a packet: the override if set, else discovered
/// state. `Off` is never surfaced here as a "go ahead" -- see
/// [`FeatureRegistry::may_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    /// Not yet known either way; the caller should probe.
    Unknown,
    /// May be used.
    Enabled,
    /// Must not be used.
    Disabled,
}

/// The known packet kinds the feature registry tracks. This is not the
/// exhaustive ~90-entry list gdb itself carries (most of which concern
/// collaborators explicitly out of scope, e.g. tracepoints); it covers
/// every packet this core's modules actually send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PacketKind {
    /// `qSupported` itself -- always sent once, never gated.
    QSupported,
    /// Multiprocess-extension ptid syntax.
    Multiprocess,
    /// `swbreak:` stop-reply field.
    SwBreak,
    /// `hwbreak:` stop-reply field.
    HwBreak,
    /// `fork:` stop-reply field / fork-follow support.
    ForkEvents,
    /// `vfork:`/`vforkdone:` stop-reply fields.
    VforkEvents,
    /// `exec:` stop-reply field.
    ExecEvents,
    /// `vCont?` supported-actions query and `vCont` itself.
    VContSupported,
    /// `QThreadEvents` (thread created/exited notifications).
    QThreadEvents,
    /// `QThreadOptions`.
    QThreadOptions,
    /// `no-resumed` stop reply / feature token.
    NoResumed,
    /// Memory-tagging extensions.
    MemoryTagging,
    /// `qRelocInsn`.
    QRelocInsn,
    /// XML target-description registers (`qXfer:features:read`).
    XmlRegisters,
    /// `X` binary memory write.
    BinaryWrite,
    /// `P` single-register write.
    PWrite,
    /// `p` single-register read.
    PRead,
    /// Range stepping (`vCont;r`).
    RangeStepping,
    /// `QStartNoAckMode`.
    NoAckMode,
    /// `QNonStop`.
    NonStop,
    /// `vFile:*` Host I/O packets.
    VFile,
    /// `QCatchSyscalls`.
    CatchSyscalls,
    /// `QPassSignals`.
    PassSignals,
    /// `QProgramSignals`.
    ProgramSignals,
    /// `QDisableRandomization`.
    DisableRandomization,
    /// Reverse-execution `bs`/`bc`.
    ReverseStep,
}

/// One entry in the registry: the packet's wire name (for logging and
/// `qSupported` construction) plus its override and discovered state.
#[derive(Debug, Clone)]
struct Entry {
    name: &'static str,
    override_: Override,
    discovered: Discovered,
}

/// Tracks, for every known [`PacketKind`], whether it may be used.
///
/// Invariant (§4.2, §8): once a probed packet is marked [`Discovered::Disabled`]
/// it is never re-probed -- `record_probe_result` is the only way
/// discovered state changes, and it never regresses `Disabled` back to
/// `Unknown`.
pub struct FeatureRegistry {
    entries: HashMap<PacketKind, Entry>,
}

impl FeatureRegistry {
    /// Build a fresh registry with every packet reset to
    /// `{Auto, Unknown}`, as happens at connection open (§4.2).
    pub fn new() -> Self {
        use PacketKind::*;
        let known: &[(PacketKind, &'static str)] = &[
            (QSupported, "qSupported"),
            (Multiprocess, "multiprocess"),
            (SwBreak, "swbreak"),
            (HwBreak, "hwbreak"),
            (ForkEvents, "fork-events"),
            (VforkEvents, "vfork-events"),
            (ExecEvents, "exec-events"),
            (VContSupported, "vContSupported"),
            (QThreadEvents, "QThreadEvents"),
            (QThreadOptions, "QThreadOptions"),
            (NoResumed, "no-resumed"),
            (MemoryTagging, "memory-tagging"),
            (QRelocInsn, "qRelocInsn"),
            (XmlRegisters, "xmlRegisters"),
            (BinaryWrite, "X"),
            (PWrite, "P"),
            (PRead, "p"),
            (RangeStepping, "vContSupported;r"),
            (NoAckMode, "QStartNoAckMode"),
            (NonStop, "QNonStop"),
            (VFile, "vFile"),
            (CatchSyscalls, "QCatchSyscalls"),
            (PassSignals, "QPassSignals"),
            (ProgramSignals, "QProgramSignals"),
            (DisableRandomization, "QDisableRandomization"),
            (ReverseStep, "ReverseStep"),
        ];
        let entries = known
            .iter()
            .map(|(kind, name)| {
                (*kind, Entry { name, override_: Override::default(), discovered: Discovered::default() })
            })
            .collect();
        FeatureRegistry { entries }
    }

    /// The feature tokens this core asks for in its own `qSupported:`
    /// request (§4.2), in the order they are first probed.
    pub fn requested_features() -> &'static [&'static str] {
        &[
            "multiprocess+",
            "swbreak+",
            "hwbreak+",
            "fork-events+",
            "vfork-events+",
            "exec-events+",
            "vContSupported+",
            "QThreadEvents+",
            "QThreadOptions+",
            "no-resumed+",
        ]
    }

    fn entry(&self, kind: PacketKind) -> &Entry {
        self.entries.get(&kind).expect("all PacketKind variants are registered in FeatureRegistry::new")
    }

    fn entry_mut(&mut self, kind: PacketKind) -> &mut Entry {
        self.entries.get_mut(&kind).expect("all PacketKind variants are registered in FeatureRegistry::new")
    }

    /// Force a packet's override, bypassing negotiation/probing.
    pub fn set_override(&mut self, kind: PacketKind, value: Override) {
        self.entry_mut(kind).override_ = value;
    }

    /// Effective support: override when not `Auto`, else discovered state.
    pub fn support(&self, kind: PacketKind) -> Support {
        let entry = self.entry(kind);
        match entry.override_ {
            Override::On => Support::Enabled,
            Override::Off => Support::Disabled,
            Override::Auto => match entry.discovered {
                Discovered::Unknown => Support::Unknown,
                Discovered::Enabled => Support::Enabled,
                Discovered::Disabled => Support::Disabled,
            },
        }
    }

    /// True if this packet may be sent right now (not forced or
    /// discovered off).
    pub fn may_send(&self, kind: PacketKind) -> bool {
        !matches!(self.support(kind), Support::Disabled)
    }

    /// Apply one `qSupported` reply token (`<name><+|-|?>` or
    /// `<name>=<value>`). Returns the parsed `PacketSize=` value, if any,
    /// so the caller can resize the packet buffer.
    pub fn apply_qsupported_token(&mut self, token: &str) -> Option<u64> {
        if let Some((name, value)) = token.split_once('=') {
            if name == "PacketSize" {
                return u64::from_str_radix(value, 16).ok();
            }
            // Other `name=value` tokens (e.g. future extensions) are
            // accepted but not otherwise interpreted.
            return None;
        }

        let (name, polarity) = token.split_at(token.len() - 1);
        let discovered = match polarity {
            "+" => Discovered::Enabled,
            "-" => Discovered::Disabled,
            "?" => Discovered::Unknown,
            _ => return None,
        };
        if let Some(kind) = self.entries.iter().find(|(_, e)| e.name == name).map(|(k, _)| *k) {
            self.record_discovery(kind, discovered);
        }
        None
    }

    fn record_discovery(&mut self, kind: PacketKind, discovered: Discovered) {
        log::debug!("feature {:?} discovered as {:?}", kind, discovered);
        self.entry_mut(kind).discovered = discovered;
    }

    /// Record the result of lazily probing a packet not mentioned in
    /// `qSupported` (§4.2): an empty reply means unsupported; any other
    /// well-formed reply (including `E<xx>`) means supported.
    ///
    /// Once a probe disables a packet it is never re-probed -- calling
    /// this again with `Enabled` after a prior `Disabled` is a logic
    /// error the monotonicity invariant forbids, so it is ignored with a
    /// warning rather than silently un-disabling the packet.
    pub fn record_probe_result(&mut self, kind: PacketKind, reply_was_empty: bool) {
        let entry = self.entry(kind);
        if entry.discovered == Discovered::Disabled {
            log::warn!("ignoring re-probe of already-disabled packet {:?}", kind);
            return;
        }
        let discovered = if reply_was_empty { Discovered::Disabled } else { Discovered::Enabled };
        self.record_discovery(kind, discovered);
    }
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_registry_is_unknown_auto() {
        let reg = FeatureRegistry::new();
        assert_eq!(reg.support(PacketKind::SwBreak), Support::Unknown);
        assert!(reg.may_send(PacketKind::SwBreak));
    }

    #[test]
    fn qsupported_reply_sets_discovered_state() {
        let mut reg = FeatureRegistry::new();
        reg.apply_qsupported_token("multiprocess+");
        reg.apply_qsupported_token("swbreak-");
        assert_eq!(reg.support(PacketKind::Multiprocess), Support::Enabled);
        assert_eq!(reg.support(PacketKind::SwBreak), Support::Disabled);
        assert!(!reg.may_send(PacketKind::SwBreak));
    }

    #[test]
    fn packet_size_token_is_parsed_and_not_stored_as_a_feature() {
        let mut reg = FeatureRegistry::new();
        let size = reg.apply_qsupported_token("PacketSize=1000");
        assert_eq!(size, Some(0x1000));
    }

    #[test]
    fn override_wins_over_discovered() {
        let mut reg = FeatureRegistry::new();
        reg.record_probe_result(PacketKind::PWrite, true);
        assert_eq!(reg.support(PacketKind::PWrite), Support::Disabled);
        reg.set_override(PacketKind::PWrite, Override::On);
        assert_eq!(reg.support(PacketKind::PWrite), Support::Enabled);
    }

    #[test]
    fn probe_is_monotone_once_disabled() {
        let mut reg = FeatureRegistry::new();
        reg.record_probe_result(PacketKind::RangeStepping, true);
        assert_eq!(reg.support(PacketKind::RangeStepping), Support::Disabled);
        // A later call claiming it's enabled must not revive it.
        reg.record_probe_result(PacketKind::RangeStepping, false);
        assert_eq!(reg.support(PacketKind::RangeStepping), Support::Disabled);
    }
}
