//! Debugger-side core of the GDB Remote Serial Protocol: framing,
//! feature negotiation, memory/register transfer, execution control,
//! notifications, and Host I/O.
//!
//! This crate is deliberately not a whole debugger: it owns the wire
//! protocol and the state machines the protocol requires, and takes the
//! register layout, thread registry, event loop, and symbol resolver as
//! collaborator traits (see [`adapters`]) so an embedder can plug in
//! whatever front-end it has.

mod adapters;
mod config;
mod connection;
mod error;
mod features;
mod fileio_reverse;
mod framer;
mod hostio;
mod interrupt;
mod notif;
mod parse;
mod ptid;
mod regs;
mod resume;
mod util;
mod waitstatus;
mod xfer;

pub use adapters::{EventSource, RegisterLayout, SymbolResolver, ThreadRegistry};
pub use config::{ConnectionConfig, InterruptSequence};
pub use connection::{continue_request, step_request, Connection};
pub use error::{ClientError, ClientResult, HostIoError, ProtocolError, RemoteError, RspError, RspResult};
pub use features::{Discovered, FeatureRegistry, Override, PacketKind, Support};
pub use fileio_reverse::{FileIoReply, FileIoRequest};
pub use framer::FrameKind;
pub use hostio::{mode_bits, open_flags, Errno, FioStat, HostIoReply, ReadaheadCache};
pub use interrupt::{InterruptState, ScopedThread, StopScopePlan};
pub use notif::{NotificationKind, NotificationState};
pub use ptid::{Id, Ptid};
pub use regs::{RegisterSpec, RegisterTable, RegisterValue};
pub use resume::{CoalescedResume, PendingResume, ResumeKind, ResumeState, ThreadView};
pub use waitstatus::{ExpeditedRegister, StopReason, StopReply, WaitStatus};
