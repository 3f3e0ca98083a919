//! The framing and acknowledgement layer (§4.1).
//!
//! Owns exactly the wire framing -- escape/RLE, checksum, ack/retry --
//! and nothing about packet *content*. Content belongs to
//! [`crate::xfer`] and [`crate::connection`].
//!
//! Enforcing the packet-read timeout and watchdog of
//! [`crate::config::ConnectionConfig`] is left to the transport: this is
//! a framing layer over a generic [`Read`] + [`Write`] stream, and a
//! blocking read has no portable timeout without knowing the concrete
//! transport (see §1 Non-goals: "not a transport implementation").

use std::io::{self, Read, Write};

use crate::error::{RspError, RspResult};
use crate::util::checksum;

/// Whether a received frame was a normal packet or a `%`-prefixed
/// asynchronous notification (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A `$...#cc` reply to a request, or an unsolicited console/file-I/O
    /// packet.
    Normal,
    /// A `%Stop:...#cc` (or other kind) asynchronous notification.
    Notification,
}

const START_NORMAL: u8 = b'$';
const START_NOTIF: u8 = b'%';
const END: u8 = b'#';
const ESCAPE: u8 = b'}';
const RLE: u8 = b'*';

fn needs_escape(b: u8) -> bool {
    matches!(b, b'$' | b'#' | b'}' | b'*')
}

/// Escape `$`, `#`, `}` and `*` in `data` per §4.1, for inclusion in a
/// packet payload (e.g. binary data written by an `X` memory write).
pub fn escape_binary(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if needs_escape(b) {
            out.push(ESCAPE);
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    out
}

/// Run-length-encode `data` using the scheme of §4.1, only ever emitting
/// runs the decoder can reproduce (repeat count in `1..=97`, encoded
/// byte printable). Used by tests to exercise the round-trip property of
/// §8; the framer does not need to emit RLE on its own packets.
pub fn rle_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        let mut run = 1usize;
        while i + run < data.len() && data[i + run] == byte && run < 97 {
            run += 1;
        }
        out.push(byte);
        if needs_escape(byte) {
            // RLE only ever follows a *literal* character in the wire
            // grammar, so skip it for bytes that must be escaped and
            // just repeat them plainly.
            for _ in 1..run {
                out.push(byte);
            }
        } else if run >= 4 {
            // Count n = run + 29 - 1, and the encoded repeat char must
            // itself be printable and not require escaping.
            let n = (run as u16 + 28) as u8;
            out.push(RLE);
            out.push(n);
        } else {
            for _ in 1..run {
                out.push(byte);
            }
        }
        i += run;
    }
    out
}

/// The byte-stream framing layer: turns a `Read + Write` transport into
/// an ack/retry'd sequence of RSP frames.
pub struct Framer<S> {
    stream: S,
    acking: bool,
    max_retries: Option<u16>,
    last_payload: Vec<u8>,
}

impl<S: Read + Write> Framer<S> {
    /// Wrap `stream` in a new framer. Acking starts enabled, as required
    /// at connection open; call [`Framer::disable_acking`] only after a
    /// successful `QStartNoAckMode` handshake.
    pub fn new(stream: S, max_retries: Option<u16>) -> Self {
        Framer { stream, acking: true, max_retries, last_payload: Vec::new() }
    }

    /// True if acks are currently sent/expected.
    pub fn is_acking(&self) -> bool {
        self.acking
    }

    /// Disable acking mode. There is no way back (§4.1).
    pub fn disable_acking(&mut self) {
        self.acking = false;
        self.last_payload = Vec::new();
    }

    /// Write raw bytes directly to the transport, bypassing packet
    /// framing entirely. Used for interrupt sequences (§4.5), which are
    /// not packets.
    pub fn write_raw(&mut self, bytes: &[u8]) -> RspResult<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_byte(&mut self) -> RspResult<u8> {
        let mut buf = [0u8; 1];
        self.stream.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn write_frame(&mut self, payload: &[u8]) -> RspResult<()> {
        let cksum = checksum(payload);
        self.stream.write_all(&[START_NORMAL])?;
        self.stream.write_all(payload)?;
        write!(self.stream, "#{cksum:02x}")?;
        self.stream.flush()?;
        Ok(())
    }

    /// Consume the remainder of a frame body (after the leading `$`/`%`
    /// has already been read) through its terminating checksum, without
    /// interpreting it. Used to discard a stray reply observed while
    /// waiting for our own ack.
    fn skip_frame_body(&mut self) -> RspResult<()> {
        loop {
            let ch = self.read_byte()?;
            if ch == END {
                break;
            }
            if ch == RLE {
                // The repeat-count byte; no further meaning when discarding.
                self.read_byte()?;
            }
        }
        self.read_byte()?; // checksum hi
        self.read_byte()?; // checksum lo
        Ok(())
    }

    /// Send one packet and wait for its ack, retrying on `'-'` or on a
    /// checksum-invalidating condition up to `max_retries` times.
    ///
    /// Any `%`-notification frames observed while waiting for the ack are
    /// collected and returned as raw payloads (without the leading `%` or
    /// trailing checksum) for the caller to hand to the notification
    /// layer (§4.6); stray normal frames (a delayed duplicate reply) are
    /// silently discarded and acked, per §4.1.
    pub fn send(&mut self, payload: &[u8]) -> RspResult<Vec<Vec<u8>>> {
        self.last_payload = payload.to_vec();
        self.write_frame(payload)?;

        if !self.acking {
            return Ok(Vec::new());
        }

        let mut notifications = Vec::new();
        let mut retries = 0u16;
        loop {
            let byte = self.read_byte()?;
            match byte {
                b'+' => return Ok(notifications),
                b'-' => {
                    if let Some(max) = self.max_retries {
                        retries += 1;
                        if retries > max {
                            return Err(RspError::TooManyRetries);
                        }
                    }
                    self.write_frame(&self.last_payload.clone())?;
                }
                START_NORMAL => {
                    // A stray prior reply arrived instead of our ack.
                    self.skip_frame_body()?;
                    self.stream.write_all(b"+")?;
                    self.stream.flush()?;
                }
                START_NOTIF => {
                    notifications.push(self.read_notification_payload()?);
                }
                _ => {
                    // Noise before the ack; ignore and keep waiting.
                }
            }
        }
    }

    fn read_notification_payload(&mut self) -> RspResult<Vec<u8>> {
        let (payload, ok) = self.collect_payload()?;
        // No acks are ever sent for notifications (§4.1), but we still
        // validate the checksum so a corrupt notification isn't silently
        // accepted into the pending-event slot.
        if self.acking && !ok {
            return Err(RspError::InvalidChecksum);
        }
        Ok(payload)
    }

    /// Collect a frame's escaped/RLE'd payload up to (not including) the
    /// checksum, then read and compare the checksum. Returns the decoded
    /// payload and whether the checksum matched (always `true` when not
    /// acking, since the check is skipped).
    fn collect_payload(&mut self) -> RspResult<(Vec<u8>, bool)> {
        let mut contents = Vec::new();
        let mut running = 0u8;
        let mut prev = START_NORMAL;

        loop {
            let ch = self.read_byte()?;
            match ch {
                END => break,
                RLE => {
                    let repeat_ch = self.read_byte()?;
                    running = running.wrapping_add(RLE).wrapping_add(repeat_ch);
                    let total = (repeat_ch as i16) - 29 + 1;
                    if !(1..=97).contains(&total) {
                        return Err(RspError::Io(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "illegal run-length repeat count",
                        )));
                    }
                    // `total` counts the preceding literal character too;
                    // push only the additional copies (§8 scenario 2).
                    for _ in 0..(total - 1) {
                        contents.push(prev);
                    }
                }
                ESCAPE => {
                    let escaped = self.read_byte()?;
                    running = running.wrapping_add(ESCAPE).wrapping_add(escaped);
                    let real = escaped ^ 0x20;
                    contents.push(real);
                    prev = real;
                }
                _ => {
                    running = running.wrapping_add(ch);
                    contents.push(ch);
                    prev = ch;
                }
            }
        }

        let hi = self.read_byte()?;
        let lo = self.read_byte()?;
        let ok = if self.acking {
            match crate::util::decode_hex(&[hi, lo]) {
                Some(v) => v as u8 == running,
                None => false,
            }
        } else {
            true
        };
        Ok((contents, ok))
    }

    /// Read one frame: skip bytes until `$` or `%`, decode its payload,
    /// and ack it (unless in no-ack mode or it was a notification).
    ///
    /// On checksum mismatch, `'-'` has already been sent and
    /// [`RspError::InvalidChecksum`] is returned; the caller should call
    /// `receive` again to get the retransmission.
    pub fn receive(&mut self) -> RspResult<(FrameKind, Vec<u8>)> {
        let kind = loop {
            let ch = self.read_byte()?;
            match ch {
                START_NORMAL => break FrameKind::Normal,
                START_NOTIF => break FrameKind::Notification,
                _ => continue,
            }
        };

        let (payload, ok) = self.collect_payload()?;

        if self.acking {
            match kind {
                FrameKind::Normal => {
                    if ok {
                        self.stream.write_all(b"+")?;
                        self.stream.flush()?;
                    } else {
                        self.stream.write_all(b"-")?;
                        self.stream.flush()?;
                        return Err(RspError::InvalidChecksum);
                    }
                }
                FrameKind::Notification => {
                    if !ok {
                        return Err(RspError::InvalidChecksum);
                    }
                }
            }
        }

        Ok((kind, payload))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    struct Loopback {
        read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.read.read(buf)
        }
    }
    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn loopback(incoming: &[u8]) -> Loopback {
        Loopback { read: Cursor::new(incoming.to_vec()), written: Vec::new() }
    }

    #[test]
    fn send_retries_on_nak_then_succeeds() {
        let mut lb = loopback(b"-+");
        let mut framer = Framer::new(&mut lb, Some(3));
        let notifs = framer.send(b"qTfP").unwrap();
        assert!(notifs.is_empty());
        // First send, then a retransmit after the '-'.
        assert_eq!(lb.written, b"$qTfP#7b$qTfP#7b");
    }

    #[test]
    fn send_gives_up_after_max_retries() {
        let mut lb = loopback(b"----");
        let mut framer = Framer::new(&mut lb, Some(3));
        let err = framer.send(b"qTfP").unwrap_err();
        assert!(matches!(err, RspError::TooManyRetries));
    }

    #[test]
    fn send_discards_stray_reply_then_sees_ack() {
        // A delayed duplicate reply ("$OK#9a") arrives before our ack.
        let mut lb = loopback(b"$OK#9a+");
        let mut framer = Framer::new(&mut lb, Some(3));
        framer.send(b"qTfP").unwrap();
        // We must have acked the stray frame with a bare '+'.
        assert!(lb.written.ends_with(b"+"));
    }

    #[test]
    fn receive_decodes_rle() {
        // "a*$" -> repeat 'a' (0x24 - 29 + 1 = 8 times), giving "aaaaaaaa" + "b"
        // (§8 scenario 2). Checksum is not verified since acking is off here.
        let mut lb = loopback(b"$a*$b#00");
        let mut framer = Framer::new(&mut lb, Some(3));
        framer.acking = false;
        let (kind, payload) = framer.receive().unwrap();
        assert_eq!(kind, FrameKind::Normal);
        assert_eq!(payload, b"aaaaaaaab");
    }

    #[test]
    fn receive_unescapes_reserved_bytes() {
        let payload = b"a$b";
        let escaped = escape_binary(payload);
        let frame_payload = escaped.clone();
        let cksum = checksum(&frame_payload);
        let mut frame = Vec::new();
        frame.push(b'$');
        frame.extend_from_slice(&frame_payload);
        frame.extend(format!("#{cksum:02x}").into_bytes());

        let mut lb = loopback(&frame);
        let mut framer = Framer::new(&mut lb, Some(3));
        framer.acking = false;
        let (_, decoded) = framer.receive().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn escape_then_parse_roundtrip_for_arbitrary_payload() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let escaped = escape_binary(&payload);
        let cksum = checksum(&escaped);
        let mut frame = Vec::new();
        frame.push(b'$');
        frame.extend_from_slice(&escaped);
        frame.extend(format!("#{cksum:02x}").into_bytes());

        let mut lb = loopback(&frame);
        let mut framer = Framer::new(&mut lb, Some(3));
        framer.acking = false;
        let (_, decoded) = framer.receive().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rle_encode_decode_roundtrip() {
        let original = b"xxxxxxxxxxhelloooooooooooooo";
        let encoded = rle_encode(original);
        let cksum = checksum(&encoded);
        let mut frame = vec![b'$'];
        frame.extend_from_slice(&encoded);
        frame.extend(format!("#{cksum:02x}").into_bytes());

        let mut lb = loopback(&frame);
        let mut framer = Framer::new(&mut lb, Some(3));
        let (_, decoded) = framer.receive().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn no_ack_mode_sends_without_waiting_for_plus() {
        let mut lb = loopback(b"");
        let mut framer = Framer::new(&mut lb, Some(3));
        framer.disable_acking();
        framer.send(b"vCont;c").unwrap();
        let cksum = checksum(b"vCont;c");
        let expected = format!("$vCont;c#{cksum:02x}").into_bytes();
        assert_eq!(lb.written, expected);
    }
}
