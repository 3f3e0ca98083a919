//! Integration tests exercising a full `Connection` over an in-memory
//! loopback transport, for the scenarios that need more than one
//! module in isolation (non-stop resume coalescing end-to-end, and
//! ambiguous-stop disambiguation across two inferiors).

use std::io::{self, Cursor, Read, Write};

use gdb_rsp::{
    continue_request, step_request, Connection, ConnectionConfig, Ptid, RegisterLayout, RegisterSpec, WaitStatus,
};

struct Loopback {
    read: Cursor<Vec<u8>>,
    written: Vec<u8>,
}

impl Loopback {
    fn new(incoming: &[u8]) -> Self {
        Loopback { read: Cursor::new(incoming.to_vec()), written: Vec::new() }
    }
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

struct FixedLayout;
impl RegisterLayout for FixedLayout {
    fn registers(&self) -> Vec<RegisterSpec> {
        vec![RegisterSpec { name: "pc", size: 8, remote_number: 0 }]
    }
}

/// Scenario 3: two threads in one process, one stepping and one
/// continuing trivially, coalesce into a single `vCont` packet that
/// gives the stepping thread its own action and lets the continuing
/// thread ride the per-process wildcard.
#[test]
fn non_stop_coalescing_through_a_full_connection() {
    // One '+' ack for the single vCont packet the plan emits.
    let stream = Loopback::new(b"+");
    let mut conn = Connection::new(stream, ConnectionConfig::default(), &FixedLayout);

    let threads = vec![step_request(Ptid::new(1, Some(1)), 0), continue_request(Ptid::new(1, Some(2)))];
    let plan = conn.commit_resume(&threads).unwrap();

    assert_eq!(plan.packets, vec![b"vCont;s:p1.1;c:p1.-1".to_vec()]);
    assert_eq!(plan.committed.len(), 2);
}

/// Scenario 6: a `W00` reply with no `process:` field, observed while
/// two inferiors each have a resumed thread, is attributed to the
/// first resumed thread (in thread-registry order) exactly once.
#[test]
fn ambiguous_exit_reply_picked_up_by_first_resumed_inferior() {
    // "$W00#b7" -- checksum of "W00" is 0xb7.
    let stream = Loopback::new(b"$W00#b7");
    let mut conn = Connection::new(stream, ConnectionConfig::default(), &FixedLayout);

    let mut event = conn.wait_all_stop().unwrap();
    assert_eq!(event.ptid, None);
    assert_eq!(event.status, WaitStatus::Exited(0));

    let resumed = [Ptid::new(1, Some(1)), Ptid::new(2, Some(1))];
    conn.disambiguate(&mut event, &resumed);
    assert_eq!(event.ptid, Some(Ptid::new(1, Some(1))));
}
