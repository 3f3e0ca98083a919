//! The top-level client-facing API: a `Connection` tying together the
//! Framer, feature registry, register table, notification/stop-reply
//! queue, readahead cache, and execution controller (§3 "Connection").
//!
//! The overall shape -- own a connection, expose one method per RSP
//! operation, read a simple reply after each -- is the natural one for
//! a stateful client; every method here is a complete implementation of
//! its packet's semantics.

use std::io::{Read, Write};

use crate::adapters::RegisterLayout;
use crate::config::ConnectionConfig;
use crate::error::{ClientError, ClientResult};
use crate::features::{FeatureRegistry, PacketKind};
use crate::framer::{FrameKind, Framer};
use crate::hostio::{self, Errno, FioStat, HostIoReply, ReadaheadCache};
use crate::interrupt::{self, InterruptState};
use crate::notif::NotificationState;
use crate::parse::{self, parse_simple_reply};
use crate::ptid::Ptid;
use crate::regs::{RegisterTable, RegisterValue};
use crate::resume::{self, CoalescedResume, PendingResume, ResumeKind, ResumeState, ThreadView};
use crate::waitstatus::StopReply;
use crate::xfer;

/// The debugger-side connection to one stub (§3 "Connection").
pub struct Connection<S> {
    framer: Framer<S>,
    features: FeatureRegistry,
    config: ConnectionConfig,
    notifications: NotificationState,
    registers: RegisterTable,
    readahead: ReadaheadCache,
    interrupt_state: InterruptState,
    non_stop: bool,
    remote_packet_size: Option<usize>,
    fs_pid: Option<u64>,
    current_thread: Ptid,
}

impl<S: Read + Write> Connection<S> {
    /// Open a connection over `stream`, with the register layout
    /// supplied by the embedder (§1 collaborator: register-layout
    /// description). Acking starts enabled; negotiation happens in
    /// [`Connection::handshake`], not here, since it requires wire I/O.
    pub fn new(stream: S, config: ConnectionConfig, layout: &dyn RegisterLayout) -> Self {
        let framer = Framer::new(stream, config.max_ack_retries);
        Connection {
            framer,
            features: FeatureRegistry::new(),
            registers: RegisterTable::new(layout.registers()),
            config,
            notifications: NotificationState::new(),
            readahead: ReadaheadCache::new(),
            interrupt_state: InterruptState::default(),
            non_stop: false,
            remote_packet_size: None,
            fs_pid: None,
            current_thread: Ptid::ALL,
        }
    }

    fn send_and_read(&mut self, payload: &[u8]) -> ClientResult<Vec<u8>> {
        self.send_only(payload)?;
        loop {
            let (kind, payload) = self.framer.receive()?;
            match kind {
                FrameKind::Normal => return Ok(payload),
                FrameKind::Notification => self.handle_inline_notification(&payload),
            }
        }
    }

    /// Send a packet and wait for its ack, without blocking for a
    /// subsequent reply frame. Used for all-stop resumes, whose actual
    /// result arrives later as a stop reply via [`Connection::wait_all_stop`]
    /// rather than synchronously (§4.4).
    fn send_only(&mut self, payload: &[u8]) -> ClientResult<()> {
        let notifications = self.framer.send(payload)?;
        for raw in notifications {
            self.handle_inline_notification(&raw);
        }
        Ok(())
    }

    fn handle_inline_notification(&mut self, raw: &[u8]) {
        let Some(body) = raw.strip_prefix(b"Stop:") else {
            log::debug!("ignoring notification of unknown kind {:?}", String::from_utf8_lossy(raw));
            return;
        };
        match parse::parse_stop_reply(body) {
            Ok(event) => self.notifications.record_notification(event),
            Err(e) => log::warn!("malformed Stop notification: {e}"),
        }
    }

    /// Drain every stop reply the stub owes us via `vStopped`, per the
    /// sequence in §4.6, pushing each onto the delivery queue.
    fn drain_stopped(&mut self) -> ClientResult<()> {
        let Some(first) = self.notifications.take_pending() else { return Ok(()) };
        self.notifications.push_drained(first);
        loop {
            let reply = self.send_and_read(b"vStopped")?;
            if reply == b"OK" {
                return Ok(());
            }
            let event = parse::parse_stop_reply(&reply)?;
            self.notifications.push_drained(event);
        }
    }

    /// Negotiate features via `qSupported` and, unless
    /// `require_acks` was requested by the embedder, switch to no-ack
    /// mode (§4.2).
    pub fn handshake(&mut self, require_acks: bool) -> ClientResult<()> {
        let mut request = b"qSupported:".to_vec();
        let mut sep = "";
        for feature in FeatureRegistry::requested_features() {
            request.extend(sep.as_bytes());
            request.extend(feature.as_bytes());
            sep = ";";
        }
        let reply = self.send_and_read(&request)?;
        if !reply.is_empty() {
            let text = String::from_utf8_lossy(&reply);
            for token in text.split(';') {
                if let Some(size) = self.features.apply_qsupported_token(token) {
                    self.remote_packet_size = Some(size as usize);
                }
            }
        }

        if !require_acks && self.features.may_send(PacketKind::NoAckMode) {
            let reply = self.send_and_read(b"QStartNoAckMode")?;
            if parse_simple_reply(&reply).is_ok() {
                self.framer.disable_acking();
            }
        }
        Ok(())
    }

    /// Switch between all-stop and non-stop via `QNonStop:0`/`QNonStop:1`.
    pub fn set_nonstop(&mut self, enable: bool) -> ClientResult<()> {
        let request: &[u8] = if enable { b"QNonStop:1" } else { b"QNonStop:0" };
        let reply = self.send_and_read(request)?;
        parse_simple_reply(&reply)?;
        self.non_stop = enable;
        Ok(())
    }

    fn memory_window(&self) -> usize {
        xfer::memory_read_window(self.config.memory_read_window, self.remote_packet_size, self.registers.g_packet_size())
    }

    /// Read inferior memory (`m`), clamped to the current memory-read
    /// window (§4.3).
    pub fn read_memory(&mut self, addr: u64, len: usize) -> ClientResult<Vec<u8>> {
        let window = self.memory_window();
        let clamped = len.min(window.max(1));
        let request = xfer::build_read_memory(addr, clamped);
        let reply = self.send_and_read(&request)?;
        xfer::read_memory_reply(&reply)
    }

    /// Write inferior memory (`X`, falling back to `M`), chunked to fit
    /// the negotiated packet size (§4.3).
    pub fn write_memory(&mut self, addr: u64, data: &[u8]) -> ClientResult<()> {
        let max_payload = self.remote_packet_size.unwrap_or(self.config.initial_packet_size).saturating_sub(16);
        let use_binary = self.features.may_send(PacketKind::BinaryWrite);
        for chunk in xfer::plan_memory_write(addr, data.len(), max_payload.max(1)) {
            let slice = &data[chunk.offset..chunk.offset + chunk.len];
            if use_binary {
                let fitted = xfer::fit_escaped_payload(slice, max_payload);
                let escaped = crate::framer::escape_binary(fitted);
                let request = xfer::build_write_memory_binary(chunk.addr, fitted.len(), &escaped);
                let reply = self.send_and_read(&request)?;
                if reply.is_empty() {
                    self.features.record_probe_result(PacketKind::BinaryWrite, true);
                    let fallback = xfer::build_write_memory_hex(chunk.addr, slice);
                    let reply = self.send_and_read(&fallback)?;
                    xfer::write_reply(&reply)?;
                } else {
                    self.features.record_probe_result(PacketKind::BinaryWrite, false);
                    xfer::write_reply(&reply)?;
                }
            } else {
                let request = xfer::build_write_memory_hex(chunk.addr, slice);
                let reply = self.send_and_read(&request)?;
                xfer::write_reply(&reply)?;
            }
        }
        Ok(())
    }

    /// Read all registers (`g`), establishing the connection's
    /// g-packet size on the first call (§4.3).
    pub fn read_all_registers(&mut self) -> ClientResult<Vec<RegisterValue>> {
        let request = xfer::build_read_all_registers();
        let reply = self.send_and_read(&request)?;
        xfer::apply_g_reply(&mut self.registers, &reply)
    }

    /// Read one register, preferring `p<pnum>` and falling back to a
    /// full `g` read the first time `p` is found unsupported (§4.3).
    pub fn read_register(&mut self, index: usize) -> ClientResult<RegisterValue> {
        let remote_number = self.registers.remote_number(index).ok_or(ClientError::Unsupported)?;
        if self.features.may_send(PacketKind::PRead) {
            let request = xfer::build_read_register(remote_number);
            let reply = self.send_and_read(&request)?;
            if reply.is_empty() {
                self.features.record_probe_result(PacketKind::PRead, true);
            } else {
                self.features.record_probe_result(PacketKind::PRead, false);
                return xfer::read_register_reply(&reply);
            }
        }
        let all = self.read_all_registers()?;
        all.into_iter().nth(index).ok_or(ClientError::Unsupported)
    }

    /// Write one register via `P<pnum>=`, falling back to a
    /// read-modify-write `G` when unsupported (§4.3).
    pub fn write_register(&mut self, index: usize, value: &[u8]) -> ClientResult<()> {
        let remote_number = self.registers.remote_number(index).ok_or(ClientError::Unsupported)?;
        if self.features.may_send(PacketKind::PWrite) {
            let request = xfer::build_write_register(remote_number, value);
            let reply = self.send_and_read(&request)?;
            if !reply.is_empty() {
                self.features.record_probe_result(PacketKind::PWrite, false);
                return xfer::write_reply(&reply);
            }
            self.features.record_probe_result(PacketKind::PWrite, true);
        }
        let mut all = self.read_all_registers()?;
        if let Some(slot) = all.get_mut(index) {
            *slot = RegisterValue::Bytes(value.to_vec());
        }
        let body = self.registers.assemble_g_packet(&all);
        let request = xfer::build_write_all_registers(&body);
        let reply = self.send_and_read(&request)?;
        xfer::write_reply(&reply)
    }

    /// Resume execution of `threads`, either via coalesced `vCont` or,
    /// when the stub doesn't support it, via the legacy `Hc`-selected
    /// `c`/`s`/`C`/`S` fallback (§4.4). The caller (owner of the thread
    /// registry) applies `committed` to its own records after a
    /// successful send.
    pub fn commit_resume(&mut self, threads: &[ThreadView]) -> ClientResult<CoalescedResume> {
        if self.features.may_send(PacketKind::VContSupported) {
            let max_payload = self.remote_packet_size.unwrap_or(self.config.initial_packet_size);
            let plan = resume::coalesce_vcont(threads, max_payload);
            for packet in &plan.packets {
                if self.non_stop {
                    let reply = self.send_and_read(packet)?;
                    parse_simple_reply(&reply)?;
                } else {
                    self.send_only(packet)?;
                }
            }
            return Ok(plan);
        }
        self.commit_legacy_resume(threads)
    }

    /// The `vCont`-less fallback of `commit_resume`: each pending thread
    /// is selected with `Hc<ptid>` (acked synchronously) and then given
    /// its action with the bare legacy packet, which -- like a `vCont`
    /// send in all-stop mode -- does not wait for an immediate reply
    /// frame, since the real result is the later async stop reply.
    /// Non-stop mode requires `vCont` and never reaches this path.
    fn commit_legacy_resume(&mut self, threads: &[ThreadView]) -> ClientResult<CoalescedResume> {
        let mut packets = Vec::new();
        let mut committed = Vec::new();
        for t in threads {
            let ResumeState::ResumedPendingVcont(pending) = t.state else { continue };
            let select = resume::build_hc_select(t.ptid);
            let select_reply = self.send_and_read(&select)?;
            parse_simple_reply(&select_reply)?;
            let action = resume::build_legacy_resume(pending.kind, pending.signal);
            self.send_only(&action)?;
            packets.push(select);
            packets.push(action);
            committed.push(t.ptid);
        }
        Ok(CoalescedResume { packets, committed })
    }

    /// Reverse-execution resume (`bs`/`bc`, §4.4): selects `ptid` with
    /// `Hc` first, since reverse execution has no per-thread action
    /// syntax of its own, then sends the reverse step/continue without
    /// waiting for an immediate reply -- the result is the later async
    /// stop reply, exactly as for a forward all-stop resume.
    pub fn commit_reverse_resume(&mut self, ptid: Ptid, step: bool, signal: u8) -> ClientResult<()> {
        if !self.features.may_send(PacketKind::ReverseStep) {
            return Err(ClientError::Unsupported);
        }
        let select_reply = self.send_and_read(&resume::build_hc_select(ptid))?;
        parse_simple_reply(&select_reply)?;
        let action = resume::build_reverse_resume(step, signal);
        self.send_only(&action)
    }

    /// Request an interrupt appropriate to the current mode (§4.5).
    pub fn interrupt(&mut self) -> ClientResult<()> {
        self.interrupt_state = self.interrupt_state.on_ctrlc();
        if self.interrupt_state.is_escalated() {
            log::warn!("second Ctrl-C observed before the first was serviced; escalating to disconnect");
            return Err(ClientError::Rsp(crate::error::RspError::Disconnected));
        }
        if self.non_stop {
            let reply = self.send_and_read(&interrupt::build_vctrlc())?;
            parse_simple_reply(&reply)?;
        } else {
            let bytes = interrupt::all_stop_interrupt_bytes(self.config.interrupt_sequence);
            if !bytes.is_empty() {
                self.framer.write_raw(&bytes)?;
            }
        }
        self.interrupt_state = self.interrupt_state.on_sent();
        Ok(())
    }

    /// Block for the next stop event, non-stop mode (§4.6): serves
    /// queued events first, else performs a blocking frame read.
    pub fn wait_nonstop(&mut self, ptid: Option<Ptid>) -> ClientResult<StopReply> {
        if let Some(event) = self.notifications.take_matching(ptid) {
            self.interrupt_state = self.interrupt_state.on_stop_observed();
            return Ok(event);
        }
        loop {
            let (kind, payload) = self.framer.receive()?;
            match kind {
                FrameKind::Notification => {
                    self.handle_inline_notification(&payload);
                    self.drain_stopped()?;
                    if let Some(event) = self.notifications.take_matching(ptid) {
                        self.interrupt_state = self.interrupt_state.on_stop_observed();
                        return Ok(event);
                    }
                }
                FrameKind::Normal => {
                    if let Some(text) = parse::parse_inferior_output(&payload) {
                        log::info!("inferior output: {}", String::from_utf8_lossy(&text));
                    }
                }
            }
        }
    }

    /// Block for the single stop reply owed for an outstanding
    /// all-stop resume (§4.6).
    pub fn wait_all_stop(&mut self) -> ClientResult<StopReply> {
        loop {
            let (kind, payload) = self.framer.receive()?;
            match kind {
                FrameKind::Normal => {
                    if let Some(text) = parse::parse_inferior_output(&payload) {
                        log::info!("inferior output: {}", String::from_utf8_lossy(&text));
                        continue;
                    }
                    let event = parse::parse_stop_reply(&payload)?;
                    self.interrupt_state = self.interrupt_state.on_stop_observed();
                    return Ok(event);
                }
                FrameKind::Notification => self.handle_inline_notification(&payload),
            }
        }
    }

    /// Resolve an ambiguous (no `thread:`) stop reply against
    /// currently-resumed threads (§4.6).
    pub fn disambiguate(&mut self, event: &mut StopReply, resumed_ptids: &[Ptid]) {
        self.notifications.disambiguate(event, resumed_ptids)
    }

    fn ensure_fs(&mut self, pid: u64) -> ClientResult<()> {
        if self.fs_pid == Some(pid) {
            return Ok(());
        }
        let reply = self.send_and_read(&hostio::build_setfs(pid))?;
        xfer::write_reply(&reply)?;
        self.fs_pid = Some(pid);
        Ok(())
    }

    /// `vFile:open` (§4.7). `fs_pid` of `0` selects the host's own
    /// filesystem namespace.
    pub fn hostio_open(&mut self, fs_pid: u64, path: &[u8], flags: u32, mode: u32) -> ClientResult<HostIoReply> {
        self.ensure_fs(fs_pid)?;
        let reply = self.send_and_read(&hostio::build_open(path, flags, mode))?;
        Ok(hostio::parse_host_io_reply(&reply)?)
    }

    /// `vFile:close`, invalidating the readahead cache for `fd` (§4.7).
    pub fn hostio_close(&mut self, fd: u64) -> ClientResult<HostIoReply> {
        let reply = self.send_and_read(&hostio::build_close(fd))?;
        self.readahead.invalidate(fd);
        Ok(hostio::parse_host_io_reply(&reply)?)
    }

    /// `vFile:pread`, served from the readahead cache when possible
    /// (§3 "Readahead cache", §4.7, §8 scenario 4).
    pub fn hostio_pread(&mut self, fd: u64, count: usize, offset: u64) -> ClientResult<Vec<u8>> {
        if let Some(data) = self.readahead.try_read(fd, offset, count) {
            return Ok(data);
        }
        let window = self.memory_window().max(count);
        let reply = self.send_and_read(&hostio::build_pread(fd, window as u64, offset))?;
        let parsed = hostio::parse_host_io_reply(&reply)?;
        if parsed.retcode < 0 {
            return Err(ClientError::HostIo(crate::error::HostIoError::Malformed));
        }
        self.readahead.fill(fd, offset, parsed.attachment.clone());
        Ok(self.readahead.try_read(fd, offset, count).unwrap_or(parsed.attachment))
    }

    /// `vFile:pwrite`, invalidating the readahead cache for `fd` (§4.7).
    pub fn hostio_pwrite(&mut self, fd: u64, offset: u64, data: &[u8]) -> ClientResult<i64> {
        let escaped = crate::framer::escape_binary(data);
        let reply = self.send_and_read(&hostio::build_pwrite(fd, offset, &escaped))?;
        self.readahead.invalidate(fd);
        let parsed = hostio::parse_host_io_reply(&reply)?;
        Ok(parsed.retcode)
    }

    /// `vFile:fstat` (§4.7).
    pub fn hostio_fstat(&mut self, fd: u64) -> ClientResult<FioStat> {
        let reply = self.send_and_read(&hostio::build_fstat(fd))?;
        let parsed = hostio::parse_host_io_reply(&reply)?;
        let bytes: [u8; 64] = parsed
            .attachment
            .get(..64)
            .and_then(|s| s.try_into().ok())
            .ok_or(ClientError::HostIo(crate::error::HostIoError::Malformed))?;
        Ok(FioStat::from_bytes(&bytes))
    }

    /// `vFile:unlink` (§4.7).
    pub fn hostio_unlink(&mut self, fs_pid: u64, path: &[u8]) -> ClientResult<HostIoReply> {
        self.ensure_fs(fs_pid)?;
        let reply = self.send_and_read(&hostio::build_unlink(path))?;
        Ok(hostio::parse_host_io_reply(&reply)?)
    }

    /// `vFile:readlink` (§4.7).
    pub fn hostio_readlink(&mut self, fs_pid: u64, path: &[u8]) -> ClientResult<Vec<u8>> {
        self.ensure_fs(fs_pid)?;
        let reply = self.send_and_read(&hostio::build_readlink(path))?;
        let parsed = hostio::parse_host_io_reply(&reply)?;
        Ok(parsed.attachment)
    }

    /// Answer one reverse File-I/O request with a fixed "not
    /// implemented" reply. A real embedder overrides the host
    /// operations it wants to support; this core only frames the
    /// reply (§4.7, §9 "File-I/O two-way").
    pub fn deny_reverse_request(&mut self) -> ClientResult<()> {
        let reply = crate::fileio_reverse::FileIoReply::error(Errno::NoSys);
        self.send_raw_reply(&reply.to_bytes())
    }

    fn send_raw_reply(&mut self, payload: &[u8]) -> ClientResult<()> {
        self.framer.send(payload)?;
        Ok(())
    }

    /// Detach from `pid` (or the whole connection if `None`).
    pub fn detach(&mut self, pid: Option<u32>) -> ClientResult<()> {
        let reply = match pid {
            Some(pid) => self.send_and_read(format!("D;{}", Ptid::new(pid, None)).as_bytes())?,
            None => self.send_and_read(b"D")?,
        };
        parse_simple_reply(&reply)
    }

    /// `qSymbol` exchange: report the address a previously-requested
    /// symbol resolved to, or `None` to ask the stub for the next one.
    pub fn send_qsymbol(&mut self, symbol: Option<(&[u8], u64)>) -> ClientResult<Option<Vec<u8>>> {
        let mut request = b"qSymbol:".to_vec();
        match symbol {
            None => request.push(b':'),
            Some((name, addr)) => {
                request.extend(format!("{addr:x}:").into_bytes());
                request.extend_from_slice(name);
            }
        }
        let reply = self.send_and_read(&request)?;
        if reply == b"OK" {
            return Ok(None);
        }
        Ok(Some(reply))
    }

    /// True if acks are currently being exchanged (for diagnostics).
    pub fn is_acking(&self) -> bool {
        self.framer.is_acking()
    }
}

/// Build a trivial `ThreadView` requesting a plain continue with no
/// signal, the common case for a user-level "continue" command.
pub fn continue_request(ptid: Ptid) -> ThreadView {
    ThreadView {
        ptid,
        state: ResumeState::ResumedPendingVcont(PendingResume { kind: ResumeKind::Continue, signal: 0 }),
        has_pending_child_event: false,
    }
}

/// Build a `ThreadView` requesting a single-step with an optional
/// signal to deliver.
pub fn step_request(ptid: Ptid, signal: u8) -> ThreadView {
    ThreadView {
        ptid,
        state: ResumeState::ResumedPendingVcont(PendingResume { kind: ResumeKind::Step, signal }),
        has_pending_child_event: false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adapters::RegisterLayout;
    use crate::regs::RegisterSpec;
    use std::io::Cursor;

    struct Loopback {
        read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }
    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read.read(buf)
        }
    }
    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct TestLayout;
    impl RegisterLayout for TestLayout {
        fn registers(&self) -> Vec<RegisterSpec> {
            vec![RegisterSpec { name: "pc", size: 4, remote_number: 0 }]
        }
    }

    fn conn_with(incoming: &[u8]) -> Connection<Loopback> {
        let lb = Loopback { read: Cursor::new(incoming.to_vec()), written: Vec::new() };
        Connection::new(lb, ConnectionConfig::default(), &TestLayout)
    }

    #[test]
    fn handshake_reads_packet_size_and_disables_acking() {
        let mut conn = conn_with(b"+$PacketSize=1000;multiprocess+#81+$OK#9a");
        conn.handshake(false).unwrap();
        assert_eq!(conn.remote_packet_size, Some(0x1000));
        assert!(!conn.is_acking());
    }

    #[test]
    fn read_memory_round_trips_hex_reply() {
        let mut conn = conn_with(b"$0011#11");
        conn.framer.disable_acking();
        let data = conn.read_memory(0x10, 2).unwrap();
        assert_eq!(data, vec![0x00, 0x11]);
    }

    #[test]
    fn commit_resume_falls_back_to_legacy_when_vcont_unsupported() {
        let mut conn = conn_with(b"$OK#9a");
        conn.framer.disable_acking();
        conn.features.set_override(crate::features::PacketKind::VContSupported, crate::features::Override::Off);
        let threads = vec![continue_request(Ptid::new(1, Some(1)))];
        let plan = conn.commit_resume(&threads).unwrap();
        assert_eq!(plan.packets, vec![b"Hcp1.1".to_vec(), b"c".to_vec()]);
        assert_eq!(plan.committed, vec![Ptid::new(1, Some(1))]);
    }

    #[test]
    fn commit_reverse_resume_selects_thread_then_sends_bc() {
        let mut conn = conn_with(b"$OK#9a");
        conn.framer.disable_acking();
        conn.commit_reverse_resume(Ptid::new(1, Some(1)), false, 0).unwrap();
    }

    #[test]
    fn commit_reverse_resume_rejects_when_unsupported() {
        let mut conn = conn_with(b"");
        conn.framer.disable_acking();
        conn.features.set_override(crate::features::PacketKind::ReverseStep, crate::features::Override::Off);
        assert!(matches!(
            conn.commit_reverse_resume(Ptid::new(1, Some(1)), false, 0),
            Err(ClientError::Unsupported)
        ));
    }
}
