//! The per-architecture register table (§3 "Register table", §4.3
//! register read/write semantics).
//!
//! The register *descriptions* (names, sizes, remote protocol numbers)
//! come from an external collaborator -- this core only knows how to
//! lay them out into a `g`/`G` packet and track which ones a short
//! reply left out, generalized from one register at a time to the
//! full g-packet layout §4.3 requires.

use crate::error::ProtocolError;
use crate::util::decode_hex_bytes;

/// One register as described by the external register-layout
/// collaborator (§1 "architecture/register descriptions" is out of
/// scope; this is its minimal shape).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSpec {
    /// Name, for diagnostics only.
    pub name: &'static str,
    /// Size in bytes on the wire (target byte order).
    pub size: usize,
    /// The stub's own protocol number for this register.
    pub remote_number: u64,
}

/// A register as tracked by the table: its description plus where it
/// lands in the `g`/`G` packet, if anywhere.
#[derive(Debug, Clone)]
struct Entry {
    spec: RegisterSpec,
    /// Byte offset within the g-packet, once this register is known to
    /// participate in it.
    offset: usize,
    /// Size in bytes, copied out of `spec` for convenient access.
    size: usize,
    /// Whether a `g` reply has been observed short enough to exclude
    /// this register (§4.3 "marked not-in-g").
    in_g_packet: bool,
}

/// The value of one register after a read, distinguishing a normal
/// value from one the stub reported as unavailable (a reply byte of
/// `'x'` at that position, §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterValue {
    Bytes(Vec<u8>),
    Unavailable,
}

/// A dense, architecture-specific register layout (§3 "Register table
/// (per architecture)").
///
/// Invariant: `offset` is a prefix sum over registers currently marked
/// `in_g_packet`, in ascending `remote_number` order -- the same order
/// the stub lays registers out in its `g`/`G` reply.
pub struct RegisterTable {
    entries: Vec<Entry>,
    /// The g-packet size established by the first observed `g` reply,
    /// once known.
    g_packet_size: Option<usize>,
}

impl RegisterTable {
    /// Build a table from the architecture's register descriptions,
    /// sorting by remote protocol number and computing the initial
    /// (optimistic: every register participates) prefix-sum layout.
    pub fn new(specs: impl IntoIterator<Item = RegisterSpec>) -> Self {
        let mut specs: Vec<RegisterSpec> = specs.into_iter().collect();
        specs.sort_by_key(|s| s.remote_number);

        let mut offset = 0usize;
        let entries = specs
            .into_iter()
            .map(|spec| {
                let entry = Entry { offset, in_g_packet: true, size: spec.size, spec };
                offset += entry.size;
                entry
            })
            .collect();
        RegisterTable { entries, g_packet_size: None }
    }

    /// Number of registers this table describes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_of_remote(&self, remote_number: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.spec.remote_number == remote_number)
    }

    /// The description of the internal register at `index`, if any.
    pub fn spec(&self, index: usize) -> Option<&RegisterSpec> {
        self.entries.get(index).map(|e| &e.spec)
    }

    /// Whether the register at `index` currently participates in the
    /// `g`/`G` packet.
    pub fn in_g_packet(&self, index: usize) -> bool {
        self.entries.get(index).map(|e| e.in_g_packet).unwrap_or(false)
    }

    /// The sum of sizes of every register currently marked as
    /// participating in the g-packet -- what this table expects a full
    /// `g` reply to be, before any reply has narrowed it down.
    pub fn expected_g_packet_size(&self) -> usize {
        self.entries.iter().filter(|e| e.in_g_packet).map(|e| e.size).sum()
    }

    /// The g-packet size established by the first observed `g` reply.
    pub fn g_packet_size(&self) -> Option<usize> {
        self.g_packet_size
    }

    /// Record the byte length of the first `g` reply ever seen on this
    /// connection (§4.3: "first 'g' after (re)connect establishes the
    /// actual g-packet size"). Any register whose offset plus size
    /// falls beyond `len` is marked not-in-g and must be fetched
    /// individually with `p<pnum>` from then on.
    pub fn observe_g_packet_size(&mut self, len: usize) {
        if self.g_packet_size.is_some() {
            return;
        }
        self.g_packet_size = Some(len);
        for entry in &mut self.entries {
            if entry.offset + entry.size > len {
                entry.in_g_packet = false;
            }
        }
        // Recompute offsets so they remain a prefix sum over only the
        // registers still participating.
        let mut offset = 0usize;
        for entry in &mut self.entries {
            if entry.in_g_packet {
                entry.offset = offset;
                offset += entry.size;
            }
        }
    }

    /// Split a raw (still hex-encoded) `g` reply into one
    /// [`RegisterValue`] per participating register, in table order. A
    /// register whose field is filled with the literal ASCII byte `'x'`
    /// (as opposed to the hex digits `"78"` decoding to that same
    /// value) is unavailable rather than an ordinary value, so this
    /// works on the raw hex text instead of pre-decoded bytes -- `'x'`
    /// is not a hex digit and `decode_hex_bytes` would otherwise reject
    /// the whole reply. A reply shorter than the expected
    /// participating-register span is [`ProtocolError::TruncatedRegisters`]
    /// rather than silently truncated, since that would desynchronize
    /// every later offset.
    pub fn split_g_reply(&self, raw: &[u8]) -> Result<Vec<RegisterValue>, ProtocolError> {
        let mut values = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !entry.in_g_packet {
                values.push(RegisterValue::Unavailable);
                continue;
            }
            let start = entry.offset * 2;
            let end = start + entry.size * 2;
            if end > raw.len() {
                return Err(ProtocolError::TruncatedRegisters(entry.offset));
            }
            let field = &raw[start..end];
            if field.iter().all(|&b| b == b'x') {
                values.push(RegisterValue::Unavailable);
            } else {
                let bytes =
                    decode_hex_bytes(field).ok_or_else(|| ProtocolError::Unrecognized(field.to_vec()))?;
                values.push(RegisterValue::Bytes(bytes));
            }
        }
        Ok(values)
    }

    /// Assemble a full `G` packet body from a complete set of register
    /// values (read-modify-write: callers fill in untouched registers
    /// from a prior read before calling this, per §4.3 register write).
    pub fn assemble_g_packet(&self, values: &[RegisterValue]) -> Vec<u8> {
        let mut out = Vec::new();
        for (entry, value) in self.entries.iter().zip(values) {
            if !entry.in_g_packet {
                continue;
            }
            match value {
                RegisterValue::Bytes(bytes) => out.extend_from_slice(bytes),
                RegisterValue::Unavailable => out.extend(std::iter::repeat(b'x').take(entry.size)),
            }
        }
        out
    }

    /// The remote protocol number for `p<pnum>`/`P<pnum>=` single
    /// register access, looked up by internal index.
    pub fn remote_number(&self, index: usize) -> Option<u64> {
        self.entries.get(index).map(|e| e.spec.remote_number)
    }

    /// Internal index for a given remote protocol number, e.g. to
    /// resolve the `<pnum>` carried in a stop reply's expedited
    /// register field.
    pub fn index_for_remote(&self, remote_number: u64) -> Option<usize> {
        self.index_of_remote(remote_number)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn specs() -> Vec<RegisterSpec> {
        vec![
            RegisterSpec { name: "pc", size: 8, remote_number: 0 },
            RegisterSpec { name: "sp", size: 8, remote_number: 1 },
            RegisterSpec { name: "vec0", size: 16, remote_number: 2 },
        ]
    }

    #[test]
    fn layout_is_prefix_sum_over_sizes() {
        let table = RegisterTable::new(specs());
        assert_eq!(table.expected_g_packet_size(), 32);
        assert!(table.in_g_packet(2));
    }

    #[test]
    fn short_g_reply_marks_trailing_registers_not_in_g() {
        let mut table = RegisterTable::new(specs());
        table.observe_g_packet_size(16);
        assert!(table.in_g_packet(0));
        assert!(table.in_g_packet(1));
        assert!(!table.in_g_packet(2));
    }

    #[test]
    fn split_g_reply_detects_unavailable_registers() {
        let table = RegisterTable::new(specs());
        // 32 raw bytes hex-encode to 64 chars; fill the vec0 register's
        // 32-char field (offset 16 onward) with the unavailable marker.
        let mut raw = vec![b'0'; 64];
        for b in &mut raw[32..64] {
            *b = b'x';
        }
        let values = table.split_g_reply(&raw).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2], RegisterValue::Unavailable);
    }

    #[test]
    fn split_g_reply_rejects_truncated_data() {
        let table = RegisterTable::new(specs());
        let raw = vec![b'0'; 40];
        assert!(matches!(table.split_g_reply(&raw), Err(ProtocolError::TruncatedRegisters(16))));
    }

    #[test]
    fn assemble_g_packet_pads_unavailable_registers_with_x() {
        let table = RegisterTable::new(specs());
        let values = vec![
            RegisterValue::Bytes(vec![1; 8]),
            RegisterValue::Unavailable,
            RegisterValue::Bytes(vec![2; 16]),
        ];
        let packet = table.assemble_g_packet(&values);
        assert_eq!(&packet[8..16], b"xxxxxxxx");
    }
}
