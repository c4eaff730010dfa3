//! TCP: fixed 8-connection table, full state machine.
//!
//! Connections live in a static `[Option<Tcb>; MAX_TCBS]` array rather than
//! a map -- this kernel never needs more than a handful of sockets at once,
//! and a fixed table means the data path never allocates. The one
//! correctness-critical rule is that the acknowledged byte count must
//! always equal the byte count actually admitted into the per-connection
//! receive ring: a full ring truncates the admission and the ACK reflects
//! exactly what was stored, never what was dropped.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use super::{ip, Ipv4Address, SocketAddr};
use crate::error::KernelError;

#[derive(Debug, Clone, Copy)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;

    pub fn new(flags: u8) -> Self {
        Self(flags)
    }

    pub fn has(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    #[allow(dead_code)]
    Closing,
    LastAck,
    TimeWait,
}

/// Segments larger than this are split across multiple transmissions.
const MAX_SEGMENT_SIZE: usize = 1400;
/// Capacity of each connection's receive ring.
const RECV_RING_CAP: usize = 32768;
const MAX_TCBS: usize = 8;
/// `close()` blocks up to this long waiting for CLOSED/TIME_WAIT.
const CLOSE_TIMEOUT_MS: u64 = 5000;

struct Tcb {
    local: SocketAddr,
    remote: SocketAddr,
    state: TcpState,
    /// Next sequence number we will send.
    snd_nxt: u32,
    /// Initial send sequence number (our ISN).
    iss: u32,
    /// Next sequence number we expect to receive (our ACK value).
    rcv_nxt: u32,
    recv_ring: Vec<u8>,
}

impl Tcb {
    fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            local,
            remote,
            state: TcpState::Closed,
            snd_nxt: 0,
            iss: 0,
            rcv_nxt: 0,
            recv_ring: Vec::new(),
        }
    }
}

static TCBS: Mutex<[Option<Tcb>; MAX_TCBS]> =
    Mutex::new([None, None, None, None, None, None, None, None]);

fn generate_isn() -> u32 {
    static COUNTER: AtomicU32 = AtomicU32::new(1_000_000);
    COUNTER.fetch_add(64_000, Ordering::Relaxed)
}

fn checksum_tcp(src: Ipv4Address, dst: Ipv4Address, segment: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    sum += u16::from_be_bytes([src.0[0], src.0[1]]) as u32;
    sum += u16::from_be_bytes([src.0[2], src.0[3]]) as u32;
    sum += u16::from_be_bytes([dst.0[0], dst.0[1]]) as u32;
    sum += u16::from_be_bytes([dst.0[2], dst.0[3]]) as u32;
    sum += ip::IpProtocol::Tcp as u32;
    sum += segment.len() as u32;

    let mut chunks = segment.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn build_segment(local: SocketAddr, remote: SocketAddr, seq: u32, ack: u32, flags: u8, window: u16, payload: &[u8]) -> Vec<u8> {
    let mut seg = Vec::with_capacity(20 + payload.len());
    seg.extend_from_slice(&local.port.to_be_bytes());
    seg.extend_from_slice(&remote.port.to_be_bytes());
    seg.extend_from_slice(&seq.to_be_bytes());
    seg.extend_from_slice(&ack.to_be_bytes());
    seg.push(5 << 4); // data offset = 5 words, no options
    seg.push(flags);
    seg.extend_from_slice(&window.to_be_bytes());
    seg.extend_from_slice(&[0, 0]); // checksum placeholder
    seg.extend_from_slice(&[0, 0]); // urgent pointer
    seg.extend_from_slice(payload);

    let cksum = checksum_tcp(local.ip, remote.ip, &seg);
    seg[16..18].copy_from_slice(&cksum.to_be_bytes());
    seg
}

fn send_segment(local: SocketAddr, remote: SocketAddr, seq: u32, ack: u32, flags: u8, payload: &[u8]) -> Result<(), KernelError> {
    let segment = build_segment(local, remote, seq, ack, flags, 65535, payload);
    ip::send(remote.ip, ip::IpProtocol::Tcp, &segment)
}

fn alloc_slot(tcbs: &mut [Option<Tcb>; MAX_TCBS]) -> Option<usize> {
    tcbs.iter().position(|s| s.is_none())
}

/// Create a listening socket on `local`.
pub fn listen(local: SocketAddr) -> Result<usize, KernelError> {
    let mut tcbs = TCBS.lock();
    let idx = alloc_slot(&mut tcbs).ok_or(KernelError::ResourceExhausted { resource: "tcp_connections" })?;
    let mut tcb = Tcb::new(local, SocketAddr::new(Ipv4Address::UNSPECIFIED, 0));
    tcb.state = TcpState::Listen;
    tcbs[idx] = Some(tcb);
    Ok(idx)
}

/// Active-open a connection to `remote` from `local`, emitting the initial SYN.
pub fn connect(local: SocketAddr, remote: SocketAddr) -> Result<usize, KernelError> {
    let mut tcbs = TCBS.lock();
    let idx = alloc_slot(&mut tcbs).ok_or(KernelError::ResourceExhausted { resource: "tcp_connections" })?;
    let iss = generate_isn();
    let mut tcb = Tcb::new(local, remote);
    tcb.state = TcpState::SynSent;
    tcb.iss = iss;
    tcb.snd_nxt = iss.wrapping_add(1);
    tcbs[idx] = Some(tcb);
    drop(tcbs);

    send_segment(local, remote, iss, 0, TcpFlags::SYN, &[])?;
    Ok(idx)
}

/// Queue up to [`MAX_SEGMENT_SIZE`]-byte segments and transmit them.
/// Returns the number of bytes actually sent (0 if not established).
pub fn send(id: usize, data: &[u8]) -> Result<usize, KernelError> {
    let mut tcbs = TCBS.lock();
    let tcb = tcbs.get_mut(id).and_then(|s| s.as_mut()).ok_or(KernelError::InvalidArgument {
        name: "tcp_id",
        value: "not_found",
    })?;
    if tcb.state != TcpState::Established {
        return Err(KernelError::InvalidState {
            expected: "Established",
            actual: "other",
        });
    }
    let (local, remote, mut seq, ack) = (tcb.local, tcb.remote, tcb.snd_nxt, tcb.rcv_nxt);
    drop(tcbs);

    let mut sent = 0;
    for chunk in data.chunks(MAX_SEGMENT_SIZE) {
        send_segment(local, remote, seq, ack, TcpFlags::ACK | TcpFlags::PSH, chunk)?;
        seq = seq.wrapping_add(chunk.len() as u32);
        sent += chunk.len();
    }

    if let Some(tcb) = TCBS.lock().get_mut(id).and_then(|s| s.as_mut()) {
        tcb.snd_nxt = seq;
    }
    Ok(sent)
}

/// Drain up to `buffer.len()` bytes from the receive ring.
pub fn recv(id: usize, buffer: &mut [u8]) -> Result<usize, KernelError> {
    let mut tcbs = TCBS.lock();
    let tcb = tcbs.get_mut(id).and_then(|s| s.as_mut()).ok_or(KernelError::InvalidArgument {
        name: "tcp_id",
        value: "not_found",
    })?;
    let n = buffer.len().min(tcb.recv_ring.len());
    buffer[..n].copy_from_slice(&tcb.recv_ring[..n]);
    tcb.recv_ring.drain(..n);
    Ok(n)
}

/// Initiate (or complete) the close sequence, blocking up to
/// [`CLOSE_TIMEOUT_MS`] for the connection to settle.
pub fn close(id: usize) -> Result<(), KernelError> {
    {
        let mut tcbs = TCBS.lock();
        let tcb = tcbs.get_mut(id).and_then(|s| s.as_mut()).ok_or(KernelError::InvalidArgument {
            name: "tcp_id",
            value: "not_found",
        })?;
        match tcb.state {
            TcpState::Established => {
                send_segment(tcb.local, tcb.remote, tcb.snd_nxt, tcb.rcv_nxt, TcpFlags::FIN | TcpFlags::ACK, &[])?;
                tcb.snd_nxt = tcb.snd_nxt.wrapping_add(1);
                tcb.state = TcpState::FinWait1;
            }
            TcpState::CloseWait => {
                send_segment(tcb.local, tcb.remote, tcb.snd_nxt, tcb.rcv_nxt, TcpFlags::FIN | TcpFlags::ACK, &[])?;
                tcb.snd_nxt = tcb.snd_nxt.wrapping_add(1);
                tcb.state = TcpState::LastAck;
            }
            _ => {
                return Err(KernelError::InvalidState {
                    expected: "Established or CloseWait",
                    actual: "other",
                });
            }
        }
    }

    let deadline = ticks_ms() + CLOSE_TIMEOUT_MS;
    loop {
        let settled = matches!(
            TCBS.lock().get(id).and_then(|s| s.as_ref()).map(|t| t.state),
            Some(TcpState::Closed) | Some(TcpState::TimeWait) | None
        );
        if settled {
            return Ok(());
        }
        super::poll();
        if ticks_ms() >= deadline {
            return Err(KernelError::Timeout {
                operation: "tcp_close",
                duration_ms: CLOSE_TIMEOUT_MS,
            });
        }
    }
}

fn ticks_ms() -> u64 {
    crate::arch::aarch64::timer::get_ticks() * crate::arch::aarch64::timer::TICK_INTERVAL_MS as u64
}

/// Handle a received IPv4 packet whose protocol is TCP.
pub fn process_packet(src_ip: Ipv4Address, dst_ip: Ipv4Address, data: &[u8]) -> Result<(), KernelError> {
    if data.len() < 20 {
        return Err(KernelError::InvalidArgument {
            name: "tcp_packet",
            value: "too_short",
        });
    }

    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let seq = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ack = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let data_offset = ((data[12] >> 4) as usize) * 4;
    let flags = TcpFlags::new(data[13]);
    let payload = if data.len() > data_offset { &data[data_offset..] } else { &[] };

    let remote = SocketAddr::new(src_ip, src_port);
    let local = SocketAddr::new(dst_ip, dst_port);

    let mut tcbs = TCBS.lock();

    if flags.has(TcpFlags::RST) {
        if let Some(tcb) = tcbs.iter_mut().flatten().find(|t| t.remote == remote && t.local.port == dst_port) {
            tcb.state = TcpState::Closed;
        }
        return Ok(());
    }

    // New inbound connection: a listener matching by local port, not yet
    // bound to this specific remote.
    if flags.has(TcpFlags::SYN) && !flags.has(TcpFlags::ACK) {
        if let Some(listener_idx) = tcbs.iter().position(|s| {
            s.as_ref().is_some_and(|t| t.state == TcpState::Listen && t.local.port == dst_port)
        }) {
            let local_addr = tcbs[listener_idx].as_ref().unwrap().local;
            if let Some(child_idx) = alloc_slot(&mut tcbs) {
                let irs = seq;
                let iss = generate_isn();
                let mut child = Tcb::new(local_addr, remote);
                child.state = TcpState::SynReceived;
                child.iss = iss;
                child.snd_nxt = iss.wrapping_add(1);
                child.rcv_nxt = irs.wrapping_add(1);
                tcbs[child_idx] = Some(child);
                drop(tcbs);
                let _ = send_segment(local_addr, remote, iss, irs.wrapping_add(1), TcpFlags::SYN | TcpFlags::ACK, &[]);
            }
            return Ok(());
        }
    }

    let Some(tcb) = tcbs.iter_mut().flatten().find(|t| t.remote == remote && t.local.port == local.port) else {
        return Ok(());
    };

    match tcb.state {
        TcpState::SynSent => {
            if flags.has(TcpFlags::SYN) && flags.has(TcpFlags::ACK) && ack == tcb.iss.wrapping_add(1) {
                tcb.rcv_nxt = seq.wrapping_add(1);
                let (local, remote, snd_nxt, rcv_nxt) = (tcb.local, tcb.remote, tcb.snd_nxt, tcb.rcv_nxt);
                tcb.state = TcpState::Established;
                drop(tcbs);
                let _ = send_segment(local, remote, snd_nxt, rcv_nxt, TcpFlags::ACK, &[]);
                return Ok(());
            }
        }
        TcpState::SynReceived => {
            if flags.has(TcpFlags::ACK) && ack == tcb.iss.wrapping_add(1) {
                tcb.state = TcpState::Established;
                return Ok(());
            }
        }
        TcpState::Established => {
            if !payload.is_empty() && seq == tcb.rcv_nxt {
                // Ring is full at N-1 usable bytes, not N, so a reader can
                // always distinguish full from empty.
                let space = (RECV_RING_CAP - 1).saturating_sub(tcb.recv_ring.len());
                let admitted = payload.len().min(space);
                tcb.recv_ring.extend_from_slice(&payload[..admitted]);
                tcb.rcv_nxt = seq.wrapping_add(admitted as u32);
                let (local, remote, snd_nxt, rcv_nxt) = (tcb.local, tcb.remote, tcb.snd_nxt, tcb.rcv_nxt);
                drop(tcbs);
                let _ = send_segment(local, remote, snd_nxt, rcv_nxt, TcpFlags::ACK, &[]);
                return Ok(());
            }
            if flags.has(TcpFlags::FIN) {
                tcb.rcv_nxt = seq.wrapping_add(1);
                let (local, remote, snd_nxt, rcv_nxt) = (tcb.local, tcb.remote, tcb.snd_nxt, tcb.rcv_nxt);
                tcb.state = TcpState::CloseWait;
                drop(tcbs);
                let _ = send_segment(local, remote, snd_nxt, rcv_nxt, TcpFlags::ACK, &[]);
                return Ok(());
            }
        }
        TcpState::FinWait1 => {
            if flags.has(TcpFlags::FIN) && flags.has(TcpFlags::ACK) {
                tcb.rcv_nxt = seq.wrapping_add(1);
                let (local, remote, snd_nxt, rcv_nxt) = (tcb.local, tcb.remote, tcb.snd_nxt, tcb.rcv_nxt);
                tcb.state = TcpState::Closed; // TimeWait is immediate, no timer to wait out
                drop(tcbs);
                let _ = send_segment(local, remote, snd_nxt, rcv_nxt, TcpFlags::ACK, &[]);
                return Ok(());
            }
            if flags.has(TcpFlags::ACK) {
                tcb.state = TcpState::FinWait2;
                return Ok(());
            }
        }
        TcpState::FinWait2 => {
            if flags.has(TcpFlags::FIN) {
                tcb.rcv_nxt = seq.wrapping_add(1);
                let (local, remote, snd_nxt, rcv_nxt) = (tcb.local, tcb.remote, tcb.snd_nxt, tcb.rcv_nxt);
                tcb.state = TcpState::Closed;
                drop(tcbs);
                let _ = send_segment(local, remote, snd_nxt, rcv_nxt, TcpFlags::ACK, &[]);
                return Ok(());
            }
        }
        TcpState::LastAck => {
            if flags.has(TcpFlags::ACK) {
                tcb.state = TcpState::Closed;
                return Ok(());
            }
        }
        _ => {}
    }

    Ok(())
}

pub fn init() {
    crate::println!("[TCP] ready, {} connection slots", MAX_TCBS);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpStats {
    pub active_connections: usize,
}

pub fn get_stats() -> TcpStats {
    let tcbs = TCBS.lock();
    TcpStats {
        active_connections: tcbs.iter().flatten().filter(|t| t.state != TcpState::Closed).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_roundtrip() {
        let flags = TcpFlags::new(TcpFlags::SYN | TcpFlags::ACK);
        assert!(flags.has(TcpFlags::SYN));
        assert!(flags.has(TcpFlags::ACK));
        assert!(!flags.has(TcpFlags::FIN));
    }

    #[test]
    fn established_partial_admission_acks_only_stored_bytes() {
        let mut tcb = Tcb::new(
            SocketAddr::new(Ipv4Address::new(10, 0, 2, 15), 1234),
            SocketAddr::new(Ipv4Address::new(10, 0, 2, 2), 80),
        );
        tcb.state = TcpState::Established;
        tcb.rcv_nxt = 100;
        tcb.recv_ring = Vec::with_capacity(RECV_RING_CAP);
        // Fill to one byte of remaining usable space (ring is full at N-1).
        tcb.recv_ring.resize(RECV_RING_CAP - 2, 0);

        let incoming = [0xABu8; 10];
        let space = (RECV_RING_CAP - 1).saturating_sub(tcb.recv_ring.len());
        let admitted = incoming.len().min(space);
        tcb.recv_ring.extend_from_slice(&incoming[..admitted]);
        let new_ack = 100u32.wrapping_add(admitted as u32);

        assert_eq!(admitted, 1);
        assert_eq!(new_ack, 101);
        assert_eq!(tcb.recv_ring.len(), RECV_RING_CAP - 1);
    }

    #[test]
    fn listen_and_connect_allocate_distinct_slots() {
        let local = SocketAddr::new(Ipv4Address::LOCALHOST, 9000);
        let remote = SocketAddr::new(Ipv4Address::new(10, 0, 2, 2), 9001);
        super::super::arp::update_cache(remote.ip, super::super::MacAddress::ZERO);
        let l = listen(local).unwrap();
        let c = connect(local, remote).unwrap();
        assert_ne!(l, c);
        TCBS.lock()[l] = None;
        TCBS.lock()[c] = None;
    }
}
