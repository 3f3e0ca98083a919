//! Connection tunables (expansion, §1.1 / §3 `ConnectionConfig`).
//!
//! Reifies the handful of `set remote ...`-style knobs (retry budget,
//! watchdog, interrupt sequence, memory-read window) into a small
//! `Default`-constructible struct, instead of scattering constants
//! through the implementation.

use std::time::Duration;

/// Which byte sequence `Connection::interrupt` writes to request an
/// all-stop stop (§4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSequence {
    /// ASCII ETX (0x03), the default and most common choice.
    Etx,
    /// A transport-level BREAK condition.
    Break,
    /// A transport BREAK immediately followed by the literal byte `'g'`
    /// (Magic SysRq), for stubs layered over a Linux sysrq handler.
    BreakG,
}

impl Default for InterruptSequence {
    fn default() -> Self {
        InterruptSequence::Etx
    }
}

/// Tunables for a single [`crate::connection::Connection`].
///
/// Every field corresponds to a knob named in §3 ("ConnectionConfig
/// (expansion)") but never reified as a type of its own.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for an ordinary packet read. Default 2s, per §5.
    pub packet_timeout: Duration,
    /// Timeout applied during a "forever" wait (e.g. all-stop blocking on
    /// the outstanding resume). `None` means unbounded, the default.
    pub watchdog: Option<Duration>,
    /// Maximum number of ack retries before giving up with
    /// [`crate::error::RspError::TooManyRetries`]. `None` means unlimited.
    pub max_ack_retries: Option<u16>,
    /// Which byte sequence is used to request an all-stop interrupt.
    pub interrupt_sequence: InterruptSequence,
    /// Initial size of the growable packet buffer (§3 Connection: "initial
    /// 400 bytes, doubled on demand").
    pub initial_packet_size: usize,
    /// A hard cap on the memory-read window independent of the negotiated
    /// packet size, or `None` to let the negotiated size and g-packet size
    /// alone determine it (§4.3).
    pub memory_read_window: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            packet_timeout: Duration::from_secs(2),
            watchdog: None,
            max_ack_retries: Some(3),
            interrupt_sequence: InterruptSequence::default(),
            initial_packet_size: 400,
            memory_read_window: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.packet_timeout, Duration::from_secs(2));
        assert_eq!(cfg.watchdog, None);
        assert_eq!(cfg.max_ack_retries, Some(3));
        assert_eq!(cfg.interrupt_sequence, InterruptSequence::Etx);
        assert_eq!(cfg.initial_packet_size, 400);
    }
}
