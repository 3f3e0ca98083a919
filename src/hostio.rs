//! Host I/O (vFile), forward direction: debugger-initiated file access
//! against the stub's filesystem (§4.7).
//!
//! The errno/openflag/mode enumerations and the `fio_stat` layout are
//! shared with the reverse direction in [`crate::fileio_reverse`]
//! (§9 "File-I/O two-way": "only the errno map and openflag/mode
//! conversion are reusable"). Grounded on §3's "Readahead cache" entity
//! and §4.7's operation table; packet shapes follow the same
//! hex/binary packet-building conventions used elsewhere in this
//! crate.

use crate::error::HostIoError;
use crate::util::{decode_hex, decode_hex_bytes, encode_hex_bytes};

/// The fixed Host I/O errno domain (§4.7). Never extended at runtime;
/// unmapped host errno values become [`Errno::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Errno {
    Perm = 1,
    NoEnt = 2,
    Intr = 4,
    Io = 5,
    BadF = 9,
    Access = 13,
    Fault = 14,
    Busy = 16,
    Exist = 17,
    NoDev = 19,
    NotDir = 20,
    IsDir = 21,
    Inval = 22,
    NFile = 23,
    MFile = 24,
    FBig = 27,
    NoSpc = 28,
    SPipe = 29,
    RoFs = 30,
    NoSys = 88,
    NameTooLong = 91,
    Unknown = 9999,
}

impl Errno {
    pub fn from_wire(value: u64) -> Errno {
        match value {
            1 => Errno::Perm,
            2 => Errno::NoEnt,
            4 => Errno::Intr,
            5 => Errno::Io,
            9 => Errno::BadF,
            13 => Errno::Access,
            14 => Errno::Fault,
            16 => Errno::Busy,
            17 => Errno::Exist,
            19 => Errno::NoDev,
            20 => Errno::NotDir,
            21 => Errno::IsDir,
            22 => Errno::Inval,
            23 => Errno::NFile,
            24 => Errno::MFile,
            27 => Errno::FBig,
            28 => Errno::NoSpc,
            29 => Errno::SPipe,
            30 => Errno::RoFs,
            88 => Errno::NoSys,
            91 => Errno::NameTooLong,
            _ => Errno::Unknown,
        }
    }

    /// Map a host `std::io::ErrorKind` to the wire errno domain, for the
    /// reverse direction and for local error reporting.
    pub fn from_io_error_kind(kind: std::io::ErrorKind) -> Errno {
        use std::io::ErrorKind::*;
        match kind {
            NotFound => Errno::NoEnt,
            PermissionDenied => Errno::Access,
            AlreadyExists => Errno::Exist,
            InvalidInput | InvalidData => Errno::Inval,
            _ => Errno::Unknown,
        }
    }
}

/// `vFile:open` flags (§4.7). Bits match the protocol's fixed values,
/// not the host platform's.
pub mod open_flags {
    pub const O_RDONLY: u32 = 0;
    pub const O_WRONLY: u32 = 1;
    pub const O_RDWR: u32 = 2;
    pub const O_APPEND: u32 = 8;
    pub const O_CREAT: u32 = 0x200;
    pub const O_TRUNC: u32 = 0x400;
    pub const O_EXCL: u32 = 0x800;
}

/// `vFile:open` mode bits and `fio_stat.mode` type bits (§4.7): the
/// type bits plus the standard UNIX permission bits, all at the
/// protocol's fixed values rather than the host platform's.
pub mod mode_bits {
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFCHR: u32 = 0o020000;

    pub const S_IRUSR: u32 = 0o000400;
    pub const S_IWUSR: u32 = 0o000200;
    pub const S_IXUSR: u32 = 0o000100;
    pub const S_IRGRP: u32 = 0o000040;
    pub const S_IWGRP: u32 = 0o000020;
    pub const S_IXGRP: u32 = 0o000010;
    pub const S_IROTH: u32 = 0o000004;
    pub const S_IWOTH: u32 = 0o000002;
    pub const S_IXOTH: u32 = 0o000001;
}

/// The 64-byte, big-endian `fio_stat` structure returned by
/// `vFile:fstat` (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FioStat {
    pub dev: u32,
    pub ino: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

impl FioStat {
    pub fn to_bytes(self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[0..4].copy_from_slice(&self.dev.to_be_bytes());
        out[4..8].copy_from_slice(&self.ino.to_be_bytes());
        out[8..12].copy_from_slice(&self.mode.to_be_bytes());
        out[12..16].copy_from_slice(&self.nlink.to_be_bytes());
        out[16..20].copy_from_slice(&self.uid.to_be_bytes());
        out[20..24].copy_from_slice(&self.gid.to_be_bytes());
        out[24..28].copy_from_slice(&self.rdev.to_be_bytes());
        out[28..36].copy_from_slice(&self.size.to_be_bytes());
        out[36..44].copy_from_slice(&self.blksize.to_be_bytes());
        out[44..52].copy_from_slice(&self.blocks.to_be_bytes());
        out[52..56].copy_from_slice(&self.atime.to_be_bytes());
        out[56..60].copy_from_slice(&self.mtime.to_be_bytes());
        out[60..64].copy_from_slice(&self.ctime.to_be_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8; 64]) -> FioStat {
        let u32_at = |o: usize| u32::from_be_bytes(buf[o..o + 4].try_into().unwrap());
        let u64_at = |o: usize| u64::from_be_bytes(buf[o..o + 8].try_into().unwrap());
        FioStat {
            dev: u32_at(0),
            ino: u32_at(4),
            mode: u32_at(8),
            nlink: u32_at(12),
            uid: u32_at(16),
            gid: u32_at(20),
            rdev: u32_at(24),
            size: u64_at(28),
            blksize: u64_at(36),
            blocks: u64_at(44),
            atime: u32_at(52),
            mtime: u32_at(56),
            ctime: u32_at(60),
        }
    }
}

/// The result of a `vFile` request: a non-negative return value, or a
/// negative return paired with an errno (§4.7). Carries an optional
/// binary "attachment" (e.g. the data a `pread` returned).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIoReply {
    pub retcode: i64,
    pub errno: Option<Errno>,
    pub attachment: Vec<u8>,
}

/// Build a `vFile:setfs:<pid>` request. The core caches the last value
/// sent and should only call this when the filesystem pid changes
/// (§4.7 "setfs").
pub fn build_setfs(pid: u64) -> Vec<u8> {
    format!("vFile:setfs:{pid:x}").into_bytes()
}

/// Build a `vFile:open:<hex-path>,<flags>,<mode>` request.
pub fn build_open(path: &[u8], flags: u32, mode: u32) -> Vec<u8> {
    let mut out = b"vFile:open:".to_vec();
    out.extend(encode_hex_bytes(path).into_bytes());
    out.extend(format!(",{flags:x},{mode:x}").into_bytes());
    out
}

/// Build a `vFile:close:<fd>` request.
pub fn build_close(fd: u64) -> Vec<u8> {
    format!("vFile:close:{fd:x}").into_bytes()
}

/// Build a `vFile:pread:<fd>,<count>,<offset>` request.
pub fn build_pread(fd: u64, count: u64, offset: u64) -> Vec<u8> {
    format!("vFile:pread:{fd:x},{count:x},{offset:x}").into_bytes()
}

/// Build a `vFile:pwrite:<fd>,<offset>,<binary-data>` request. `data`
/// must already be escaped per §4.1.
pub fn build_pwrite(fd: u64, offset: u64, escaped_data: &[u8]) -> Vec<u8> {
    let mut out = format!("vFile:pwrite:{fd:x},{offset:x},").into_bytes();
    out.extend_from_slice(escaped_data);
    out
}

/// Build a `vFile:fstat:<fd>` request.
pub fn build_fstat(fd: u64) -> Vec<u8> {
    format!("vFile:fstat:{fd:x}").into_bytes()
}

/// Build a `vFile:unlink:<hex-path>` request.
pub fn build_unlink(path: &[u8]) -> Vec<u8> {
    let mut out = b"vFile:unlink:".to_vec();
    out.extend(encode_hex_bytes(path).into_bytes());
    out
}

/// Build a `vFile:readlink:<hex-path>` request.
pub fn build_readlink(path: &[u8]) -> Vec<u8> {
    let mut out = b"vFile:readlink:".to_vec();
    out.extend(encode_hex_bytes(path).into_bytes());
    out
}

/// Parse an `F<retcode>[,<errno>][;<attachment>]` reply (§4.7). The
/// attachment, if present, still carries framer-level escaping; callers
/// that need it unescaped must run it back through the same decode the
/// Framer applies to ordinary payloads (it is handled before this
/// parser runs in practice, since the Framer already decoded the whole
/// packet by the time this sees it).
pub fn parse_host_io_reply(input: &[u8]) -> Result<HostIoReply, HostIoError> {
    let rest = input.strip_prefix(b"F").ok_or(HostIoError::Malformed)?;
    let (head, attachment) = match rest.iter().position(|&b| b == b';') {
        Some(i) => (&rest[..i], rest[i + 1..].to_vec()),
        None => (rest, Vec::new()),
    };

    let mut fields = head.split(|&b| b == b',');
    let retcode_field = fields.next().ok_or(HostIoError::Malformed)?;
    let retcode = parse_signed_hex(retcode_field).ok_or(HostIoError::Malformed)?;

    let errno = match fields.next() {
        Some(e) => {
            let v = decode_hex(e).ok_or(HostIoError::Malformed)?;
            Some(Errno::from_wire(v))
        }
        None => None,
    };

    if retcode < 0 && errno.is_none() {
        return Err(HostIoError::Malformed);
    }

    Ok(HostIoReply { retcode, errno, attachment })
}

fn parse_signed_hex(field: &[u8]) -> Option<i64> {
    if let Some(rest) = field.strip_prefix(b"-") {
        decode_hex(rest).map(|v| -(v as i64))
    } else {
        decode_hex(field).map(|v| v as i64)
    }
}

/// Parse a `pread` reply's attachment into raw bytes once the Framer
/// has already unescaped the surrounding packet -- a thin convenience
/// wrapper documenting that no further decoding is needed here.
pub fn pread_data(reply: &HostIoReply) -> &[u8] {
    &reply.attachment
}

/// Decode a `readlink`/binary hex attachment that was *not* sent
/// through framer-level escaping but instead hex-encoded inline
/// (some stubs do this for `readlink`); returns `None` if it isn't
/// valid hex.
pub fn decode_hex_attachment(attachment: &[u8]) -> Option<Vec<u8>> {
    decode_hex_bytes(attachment)
}

/// The single-fd pread cache (§3 "Readahead cache", §4.7).
///
/// Invariant: valid for at most one `(fd, window)` at a time; any
/// `pwrite` or `close` on `fd` invalidates it.
#[derive(Debug, Clone, Default)]
pub struct ReadaheadCache {
    slot: Option<CacheSlot>,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone)]
struct CacheSlot {
    fd: u64,
    offset: u64,
    data: Vec<u8>,
}

impl ReadaheadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `(fd, offset, len)` from the cache if it's fully covered,
    /// recording a hit. Returns `None` (and records a miss) if the
    /// cache doesn't cover the request, in which case the caller should
    /// issue a fresh `pread` sized to the negotiated packet window and
    /// call [`ReadaheadCache::fill`].
    pub fn try_read(&mut self, fd: u64, offset: u64, len: usize) -> Option<Vec<u8>> {
        if let Some(slot) = &self.slot {
            if slot.fd == fd && offset >= slot.offset {
                let start = (offset - slot.offset) as usize;
                let end = start + len;
                if end <= slot.data.len() {
                    self.hits += 1;
                    return Some(slot.data[start..end].to_vec());
                }
            }
        }
        self.misses += 1;
        None
    }

    /// Store a fresh window of data for `fd` starting at `offset`,
    /// replacing whatever was cached before.
    pub fn fill(&mut self, fd: u64, offset: u64, data: Vec<u8>) {
        self.slot = Some(CacheSlot { fd, offset, data });
    }

    /// Invalidate the cache for `fd` after a `pwrite` or `close`.
    pub fn invalidate(&mut self, fd: u64) {
        if self.slot.as_ref().is_some_and(|s| s.fd == fd) {
            self.slot = None;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_positive_reply_with_attachment() {
        let reply = parse_host_io_reply(b"F8;deadbeef").unwrap();
        assert_eq!(reply.retcode, 8);
        assert_eq!(reply.errno, None);
        assert_eq!(reply.attachment, b"deadbeef");
    }

    #[test]
    fn parses_negative_reply_with_errno() {
        let reply = parse_host_io_reply(b"F-1,2").unwrap();
        assert_eq!(reply.retcode, -1);
        assert_eq!(reply.errno, Some(Errno::NoEnt));
    }

    #[test]
    fn rejects_negative_reply_missing_errno() {
        assert!(matches!(parse_host_io_reply(b"F-1"), Err(HostIoError::Malformed)));
    }

    #[test]
    fn fio_stat_roundtrips_through_bytes() {
        let stat = FioStat { size: 0x1234, mode: mode_bits::S_IFREG, ..Default::default() };
        let bytes = stat.to_bytes();
        assert_eq!(FioStat::from_bytes(&bytes), stat);
    }

    #[test]
    fn readahead_cache_hit_scenario_4() {
        // cache = {fd=7, off=0x1000, len=0x400}; pread(fd=7, off=0x1100,
        // len=0x80) must be served entirely from cache (§8 scenario 4).
        let mut cache = ReadaheadCache::new();
        cache.fill(7, 0x1000, vec![0xAA; 0x400]);
        let data = cache.try_read(7, 0x1100, 0x80).unwrap();
        assert_eq!(data.len(), 0x80);
        assert_eq!(cache.hits, 1);
        assert_eq!(cache.misses, 0);
    }

    #[test]
    fn readahead_cache_invalidated_by_pwrite_on_same_fd() {
        let mut cache = ReadaheadCache::new();
        cache.fill(7, 0, vec![1, 2, 3]);
        cache.invalidate(7);
        assert!(cache.try_read(7, 0, 1).is_none());
        assert_eq!(cache.misses, 1);
    }

    #[test]
    fn build_pread_formats_hex_fields() {
        assert_eq!(build_pread(7, 0x80, 0x1100), b"vFile:pread:7,80,1100");
    }
}
