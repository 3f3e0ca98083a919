//! The error taxonomy of §7: transport close, protocol violation,
//! remote refusal, and the Host I/O errno domain.
//!
//! Each layer gets its own error type and converts into the next one up
//! with `#[from]`; `thiserror` removes the boilerplate that hand-written
//! `From` impls would otherwise need.

use std::io;
use thiserror::Error;

/// A low-level error from the framing layer (§4.1).
///
/// This is the framer's `Result` error type: I/O failures, a checksum
/// that never matches within the retry budget, and the fatal conditions
/// that force a disconnect.
#[derive(Debug, Error)]
pub enum RspError {
    /// The transport returned an I/O error (including EOF).
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// A received packet had a checksum that did not match its payload.
    /// Acking mode only; `'-'` has already been sent when this is returned.
    #[error("checksum mismatch")]
    InvalidChecksum,

    /// The ack retry budget (`ConnectionConfig::max_ack_retries`) was
    /// exhausted without receiving a `'+'`.
    #[error("too many retries sending a packet")]
    TooManyRetries,

    /// A packet read timed out against the configured or watchdog timeout.
    #[error("packet read timed out")]
    Timeout,

    /// The connection is being torn down; no further requests may be sent.
    #[error("connection closed")]
    Disconnected,
}

/// A remote refusal, i.e. a well-formed `E<hex>` or `E.<message>` reply.
///
/// §9 notes that the source treats these two spellings inconsistently;
/// this type unifies them deliberately (see `DESIGN.md`): both carry an
/// optional numeric code and an optional message, and callers match on
/// whichever is present rather than on which wire form was used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("remote error{}{}",
    code.map(|c| format!(" {c:#04x}")).unwrap_or_default(),
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct RemoteError {
    /// The two-hex-digit error code that follows a bare `E`, if any.
    pub code: Option<u8>,
    /// The human-readable message that follows `E.`, if any.
    pub message: Option<String>,
}

/// A malformed or unexpected reply to a packet that the feature registry
/// or the caller believed was supported.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The reply could not be parsed as any of the expected reply forms.
    #[error("unrecognized reply: {0:?}")]
    Unrecognized(Vec<u8>),

    /// A stop reply named a register number the register table doesn't know.
    #[error("stop reply referenced unknown register {0}")]
    UnknownRegister(u64),

    /// A `g`/`G` reply was truncated in the middle of a register's bytes.
    #[error("register reply truncated at offset {0}")]
    TruncatedRegisters(usize),

    /// A run-length sequence decoded to an illegal repeat count.
    #[error("illegal run-length repeat count {0}")]
    IllegalRunLength(i16),

    /// A packet the user forced on (`Support::On`) produced an empty reply.
    #[error("packet {0:?} is required but the stub does not support it")]
    RequiredPacketUnsupported(&'static str),
}

/// A malformed Host I/O (`vFile`/`F`-packet) reply (§4.7).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HostIoError {
    /// The reply didn't match the `F<retcode>[,<errno>][;<attach>]` grammar.
    #[error("malformed Host I/O reply")]
    Malformed,
}

/// The top-level error returned by the client-facing API (`Connection` and
/// the execution controller). Wraps every lower error plus remote refusals
/// and the "stub doesn't support this" case.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A framer-level error; always fatal to the connection.
    #[error(transparent)]
    Rsp(#[from] RspError),

    /// A malformed reply.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The stub declined the request with a well-formed error reply.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A malformed Host I/O reply.
    #[error(transparent)]
    HostIo(#[from] HostIoError),

    /// The stub replied with an empty packet to a packet that was being
    /// probed (not forced on); the caller should fall back.
    #[error("packet not supported by the stub")]
    Unsupported,
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Rsp(RspError::Io(e))
    }
}

/// The result type used throughout the framer.
pub type RspResult<T> = Result<T, RspError>;

/// The result type used throughout the client-facing API.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn remote_error_displays_message_when_present() {
        let with_msg = RemoteError { code: None, message: Some("no such file".into()) };
        assert_eq!(with_msg.to_string(), "remote error: no such file");

        let without_msg = RemoteError { code: Some(0x16), message: None };
        assert_eq!(without_msg.to_string(), "remote error 0x16");
    }

    #[test]
    fn client_error_wraps_io_error() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone");
        let client_err: ClientError = io_err.into();
        assert!(matches!(client_err, ClientError::Rsp(RspError::Io(_))));
    }
}
