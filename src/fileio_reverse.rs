//! Host I/O, reverse direction: the stub asks the debugger to perform a
//! file-I/O syscall the target made, during a resumed wait (§4.7 "Hostio
//! also implements the reverse direction").
//!
//! Shares only the errno/openflag/mode conversions with the forward
//! direction ([`crate::hostio`]), per §9: the two protocols are
//! otherwise kept deliberately separate.

use crate::hostio::Errno;
use crate::util::decode_hex;

/// One decoded reverse File-I/O request (§4.7). The target made one of
/// these syscalls; the stub relayed it as an `F` packet for the
/// debugger to perform against the host and answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileIoRequest {
    Open { path: Vec<u8>, flags: u32, mode: u32 },
    Close { fd: i64 },
    Read { fd: i64, count: u64 },
    Write { fd: i64, data: Vec<u8> },
    LSeek { fd: i64, offset: i64, whence: i64 },
    Rename { old_path: Vec<u8>, new_path: Vec<u8> },
    Unlink { path: Vec<u8> },
    Stat { path: Vec<u8> },
    FStat { fd: i64 },
    GetTimeOfDay,
    IsATty { fd: i64 },
    System { command: Option<Vec<u8>> },
}

/// The reply to a reverse request: `F<retcode>[,<errno>][,C]` (§4.7),
/// where the trailing `C` flags that a Ctrl-C was observed mid-call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIoReply {
    pub retcode: i64,
    pub errno: Option<Errno>,
    pub ctrlc_seen: bool,
}

impl FileIoReply {
    pub fn ok(retcode: i64) -> FileIoReply {
        FileIoReply { retcode, errno: None, ctrlc_seen: false }
    }

    pub fn error(errno: Errno) -> FileIoReply {
        FileIoReply { retcode: -1, errno: Some(errno), ctrlc_seen: false }
    }

    pub fn with_ctrlc(mut self) -> FileIoReply {
        self.ctrlc_seen = true;
        self
    }

    /// Serialize to the wire form `F<retcode>[,<errno>][,C]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = if self.retcode < 0 {
            format!("F-{:x}", -self.retcode)
        } else {
            format!("F{:x}", self.retcode)
        };
        if let Some(errno) = self.errno {
            out.push_str(&format!(",{:x}", errno as u32));
        }
        if self.ctrlc_seen {
            out.push_str(",C");
        }
        out.into_bytes()
    }
}

/// Parse a reverse `F<op>,<args>` request body (the leading `F` already
/// stripped by the caller). The operation name is the first
/// comma-separated field.
pub fn parse_file_io_request(input: &[u8]) -> Option<FileIoRequest> {
    let mut fields = input.split(|&b| b == b',');
    let op = fields.next()?;
    match op {
        b"open" => {
            let path = decode_hex_bytes_field(fields.next()?)?;
            let flags = decode_hex(fields.next()?)? as u32;
            let mode = decode_hex(fields.next()?)? as u32;
            Some(FileIoRequest::Open { path, flags, mode })
        }
        b"close" => Some(FileIoRequest::Close { fd: parse_signed(fields.next()?)? }),
        b"read" => {
            let fd = parse_signed(fields.next()?)?;
            let count = decode_hex(fields.next()?)?;
            Some(FileIoRequest::Read { fd, count })
        }
        b"write" => {
            let fd = parse_signed(fields.next()?)?;
            let data = decode_hex_bytes_field(fields.next()?)?;
            Some(FileIoRequest::Write { fd, data })
        }
        b"lseek" => {
            let fd = parse_signed(fields.next()?)?;
            let offset = parse_signed(fields.next()?)?;
            let whence = parse_signed(fields.next()?)?;
            Some(FileIoRequest::LSeek { fd, offset, whence })
        }
        b"rename" => {
            let old_path = decode_hex_bytes_field(fields.next()?)?;
            let new_path = decode_hex_bytes_field(fields.next()?)?;
            Some(FileIoRequest::Rename { old_path, new_path })
        }
        b"unlink" => Some(FileIoRequest::Unlink { path: decode_hex_bytes_field(fields.next()?)? }),
        b"stat" => Some(FileIoRequest::Stat { path: decode_hex_bytes_field(fields.next()?)? }),
        b"fstat" => Some(FileIoRequest::FStat { fd: parse_signed(fields.next()?)? }),
        b"gettimeofday" => Some(FileIoRequest::GetTimeOfDay),
        b"isatty" => Some(FileIoRequest::IsATty { fd: parse_signed(fields.next()?)? }),
        b"system" => match fields.next() {
            Some(cmd) if !cmd.is_empty() => Some(FileIoRequest::System { command: decode_hex_bytes_field(cmd) }),
            _ => Some(FileIoRequest::System { command: None }),
        },
        _ => {
            log::debug!("unrecognized reverse File-I/O op {:?}", String::from_utf8_lossy(op));
            None
        }
    }
}

fn decode_hex_bytes_field(field: &[u8]) -> Option<Vec<u8>> {
    crate::util::decode_hex_bytes(field)
}

fn parse_signed(field: &[u8]) -> Option<i64> {
    if let Some(rest) = field.strip_prefix(b"-") {
        decode_hex(rest).map(|v| -(v as i64))
    } else {
        decode_hex(field).map(|v| v as i64)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hostio::open_flags;

    #[test]
    fn parses_open_request() {
        let req = parse_file_io_request(b"open,2f746d70,0,1a4").unwrap();
        assert_eq!(req, FileIoRequest::Open { path: b"/tmp".to_vec(), flags: open_flags::O_RDONLY, mode: 0x1a4 });
    }

    #[test]
    fn parses_lseek_with_negative_offset() {
        let req = parse_file_io_request(b"lseek,3,-8,1").unwrap();
        assert_eq!(req, FileIoRequest::LSeek { fd: 3, offset: -8, whence: 1 });
    }

    #[test]
    fn parses_bare_system_request() {
        assert_eq!(parse_file_io_request(b"system,"), Some(FileIoRequest::System { command: None }));
    }

    #[test]
    fn reply_formats_negative_retcode_with_errno() {
        let reply = FileIoReply::error(Errno::NoEnt);
        assert_eq!(reply.to_bytes(), b"F-1,2");
    }

    #[test]
    fn reply_flags_ctrlc() {
        let reply = FileIoReply::ok(0).with_ctrlc();
        assert_eq!(reply.to_bytes(), b"F0,C");
    }
}
