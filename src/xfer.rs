//! Memory and register transfer: packet construction and chunking for
//! `m`/`M`/`X`/`g`/`G`/`P`/`p` (§4.3).
//!
//! This module only builds packet bodies and works out how to split a
//! large transfer across several packets; sending them and matching up
//! replies is [`crate::connection`]'s job, generalized from one-shot
//! fixed-size requests to the dynamic, packet-size-aware chunking
//! §4.3 actually requires.

use crate::error::{ClientError, ProtocolError};
use crate::parse::{parse_memory_reply, parse_simple_reply};
use crate::regs::{RegisterTable, RegisterValue};
use crate::util::encode_hex_bytes;

/// Build an `m<addr>,<len>` memory read request.
pub fn build_read_memory(addr: u64, len: usize) -> Vec<u8> {
    format!("m{addr:x},{len:x}").into_bytes()
}

/// Parse the reply to a memory read.
pub fn read_memory_reply(payload: &[u8]) -> Result<Vec<u8>, ClientError> {
    parse_memory_reply(payload)
}

/// Build an `M<addr>,<len>:<hex-data>` memory write request (the
/// fallback used when binary writes are unsupported).
pub fn build_write_memory_hex(addr: u64, data: &[u8]) -> Vec<u8> {
    let mut out = format!("M{addr:x},{:x}:", data.len()).into_bytes();
    out.extend(encode_hex_bytes(data).into_bytes());
    out
}

/// Build an `X<addr>,<len>:<binary-data>` memory write request. `data`
/// must already be escaped (§4.1) by the caller; `len` is the number of
/// *raw* (pre-escape) bytes, which is what the header reports.
pub fn build_write_memory_binary(addr: u64, raw_len: usize, escaped_data: &[u8]) -> Vec<u8> {
    let mut out = format!("X{addr:x},{raw_len:x}:").into_bytes();
    out.extend_from_slice(escaped_data);
    out
}

/// The zero-length `X<addr>,0:` handshake used to probe binary-write
/// support once per connection (§4.3).
pub fn build_binary_write_probe(addr: u64) -> Vec<u8> {
    format!("X{addr:x},0:").into_bytes()
}

/// Read the current memory-read window: the largest single `m` request
/// this connection should issue, derived from the configured window,
/// the negotiated packet size, and the g-packet size once known (§4.3).
pub fn memory_read_window(
    configured: Option<usize>,
    remote_packet_size: Option<usize>,
    g_packet_size: Option<usize>,
) -> usize {
    // A conservative default when nothing else is known yet: the
    // initial packet buffer size from `ConnectionConfig::default()`,
    // minus a small allowance for the packet header.
    let mut window = 400usize.saturating_sub(16);
    if let Some(c) = configured {
        window = window.min(c);
    }
    if let Some(p) = remote_packet_size {
        // A memory reply hex-encodes each byte as two characters, plus
        // the `$`/`#cc` framing overhead already accounted for by the
        // caller's packet-size budget.
        window = window.min(p / 2);
    }
    if let Some(g) = g_packet_size {
        window = window.min(g);
    }
    window.max(1)
}

/// One chunk of a (possibly multi-packet) memory write: `addr` and the
/// number of raw bytes to send starting at `data[offset..offset+len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteChunk {
    pub addr: u64,
    pub offset: usize,
    pub len: usize,
}

/// Split a memory write of `total_len` bytes starting at `addr` into
/// chunks no larger than `max_payload` raw bytes each, aligning every
/// chunk after the first to a 16-byte address boundary (§4.3, §8
/// boundary behavior: "packet size exactly equal to the negotiated
/// maximum must succeed").
pub fn plan_memory_write(addr: u64, total_len: usize, max_payload: usize) -> Vec<WriteChunk> {
    if max_payload == 0 || total_len == 0 {
        return Vec::new();
    }
    if total_len <= max_payload {
        return vec![WriteChunk { addr, offset: 0, len: total_len }];
    }

    let mut chunks = Vec::new();
    let misalignment = (addr % 16) as usize;
    let mut offset = 0usize;
    let mut cursor = addr;

    if misalignment != 0 {
        let to_boundary = (16 - misalignment).min(max_payload).min(total_len);
        chunks.push(WriteChunk { addr: cursor, offset, len: to_boundary });
        offset += to_boundary;
        cursor += to_boundary as u64;
    }

    let aligned_chunk = (max_payload / 16).max(1) * 16;
    while offset < total_len {
        let remaining = total_len - offset;
        let len = remaining.min(aligned_chunk);
        chunks.push(WriteChunk { addr: cursor, offset, len });
        offset += len;
        cursor += len as u64;
    }
    chunks
}

/// Correct the reported byte count for a binary write whose escaped
/// form grew past the available payload budget: truncate the raw byte
/// count to however many *raw* bytes actually fit once escaped, so the
/// peer's length field matches what was really sent (§4.3, §8 boundary
/// behavior).
pub fn fit_escaped_payload(raw: &[u8], max_escaped_len: usize) -> &[u8] {
    let mut escaped_len = 0usize;
    for (i, &b) in raw.iter().enumerate() {
        let cost = if matches!(b, b'$' | b'#' | b'}' | b'*') { 2 } else { 1 };
        if escaped_len + cost > max_escaped_len {
            return &raw[..i];
        }
        escaped_len += cost;
    }
    raw
}

/// Build a `g` (read all registers) request.
pub fn build_read_all_registers() -> Vec<u8> {
    b"g".to_vec()
}

/// Build a `G<hex>` (write all registers) request from an assembled
/// g-packet body.
pub fn build_write_all_registers(g_packet_body: &[u8]) -> Vec<u8> {
    let mut out = vec![b'G'];
    out.extend(encode_hex_bytes(g_packet_body).into_bytes());
    out
}

/// Build a `p<pnum>` (read one register) request.
pub fn build_read_register(remote_number: u64) -> Vec<u8> {
    format!("p{remote_number:x}").into_bytes()
}

/// Build a `P<pnum>=<hex>` (write one register) request.
pub fn build_write_register(remote_number: u64, value: &[u8]) -> Vec<u8> {
    let mut out = format!("P{remote_number:x}=").into_bytes();
    out.extend(encode_hex_bytes(value).into_bytes());
    out
}

/// Parse a `g` reply's hex body and hand it to `table` to split into
/// per-register values, first recording its length as the connection's
/// g-packet size if this is the first one seen (§4.3).
///
/// The body is handed to the table still hex-encoded rather than
/// decoded here: a missing register's field is the literal ASCII byte
/// `'x'` repeated, which isn't a hex digit, so decoding the whole reply
/// up front would reject any reply containing an unavailable register
/// instead of letting the table recognize that field as such.
pub fn apply_g_reply(
    table: &mut RegisterTable,
    payload: &[u8],
) -> Result<Vec<RegisterValue>, ClientError> {
    if payload.is_empty() {
        return Err(ClientError::Unsupported);
    }
    if payload.len() % 2 != 0 || !payload.iter().all(|&b| b.is_ascii_hexdigit() || b == b'x') {
        return Err(ClientError::Protocol(ProtocolError::Unrecognized(payload.to_vec())));
    }
    table.observe_g_packet_size(payload.len() / 2);
    Ok(table.split_g_reply(payload)?)
}

/// Parse a `p<pnum>` reply: hex bytes, `x`-filled unavailable marker,
/// or an error/empty reply.
pub fn read_register_reply(payload: &[u8]) -> Result<RegisterValue, ClientError> {
    if payload.is_empty() {
        return Err(ClientError::Unsupported);
    }
    if payload.iter().all(|&b| b == b'x') {
        return Ok(RegisterValue::Unavailable);
    }
    Ok(RegisterValue::Bytes(parse_memory_reply(payload)?))
}

/// Parse the simple `OK`/error reply to a register or memory write.
pub fn write_reply(payload: &[u8]) -> Result<(), ClientError> {
    parse_simple_reply(payload)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regs::RegisterSpec;

    #[test]
    fn build_read_memory_formats_hex() {
        assert_eq!(build_read_memory(0x1000, 0x40), b"m1000,40");
    }

    #[test]
    fn build_write_memory_hex_encodes_data() {
        assert_eq!(build_write_memory_hex(0x10, &[0xab, 0xcd]), b"M10,2:abcd");
    }

    #[test]
    fn plan_memory_write_fits_in_one_chunk() {
        let chunks = plan_memory_write(0x1000, 10, 32);
        assert_eq!(chunks, vec![WriteChunk { addr: 0x1000, offset: 0, len: 10 }]);
    }

    #[test]
    fn plan_memory_write_aligns_subsequent_chunks_to_16() {
        let chunks = plan_memory_write(0x1008, 100, 32);
        assert_eq!(chunks[0], WriteChunk { addr: 0x1008, offset: 0, len: 8 });
        assert_eq!(chunks[1].addr % 16, 0);
        let total: usize = chunks.iter().map(|c| c.len).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn fit_escaped_payload_truncates_when_escapes_overflow() {
        // Every byte needs escaping (costs 2), budget for 5 escaped bytes
        // fits only 2 raw bytes.
        let raw = [b'$', b'$', b'$', b'$'];
        let fit = fit_escaped_payload(&raw, 5);
        assert_eq!(fit.len(), 2);
    }

    #[test]
    fn apply_g_reply_splits_into_register_values() {
        let mut table = RegisterTable::new(vec![
            RegisterSpec { name: "pc", size: 4, remote_number: 0 },
            RegisterSpec { name: "sp", size: 4, remote_number: 1 },
        ]);
        let values = apply_g_reply(&mut table, b"0000000100000002").unwrap();
        assert_eq!(values[0], RegisterValue::Bytes(vec![0, 0, 0, 1]));
        assert_eq!(values[1], RegisterValue::Bytes(vec![0, 0, 0, 2]));
        assert_eq!(table.g_packet_size(), Some(8));
    }

    #[test]
    fn read_register_reply_detects_unavailable() {
        assert_eq!(read_register_reply(b"xxxxxxxx").unwrap(), RegisterValue::Unavailable);
    }

    #[test]
    fn apply_g_reply_detects_unavailable_register() {
        let mut table = RegisterTable::new(vec![
            RegisterSpec { name: "pc", size: 4, remote_number: 0 },
            RegisterSpec { name: "sp", size: 4, remote_number: 1 },
        ]);
        let values = apply_g_reply(&mut table, b"00000001xxxxxxxx").unwrap();
        assert_eq!(values[0], RegisterValue::Bytes(vec![0, 0, 0, 1]));
        assert_eq!(values[1], RegisterValue::Unavailable);
    }
}
